//! Commission breakdowns for rentals and sales.
//!
//! [`CommissionCalculator::compute`] is pure and fail-open: any arithmetic failure yields a
//! zero-commission breakdown so fund capture is never blocked by commission logic.

use super::ids::ParticipantId;
use super::money::{CENT, round_cents};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

const ONE_HUNDRED: Decimal = dec!(100);

/// How the agency earns on a payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationshipType {
    /// Ongoing rental management: commission on every payment.
    Management,
    /// Tenant placement: commission once per tenant/property pair.
    Introduction,
    Sale,
}

/// Which side of a development split a ledger posting belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SplitRole {
    Owner,
    Collaborator,
}

impl SplitRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            SplitRole::Owner => "owner",
            SplitRole::Collaborator => "collaborator",
        }
    }
}

/// Division of the agent share between a development's creator and a collaborating agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSplit {
    pub owner_share: Decimal,
    pub collaborator_share: Decimal,
    pub owner_id: ParticipantId,
    pub collaborator_id: ParticipantId,
}

/// Decomposition of a payment into fees, shares, VAT and the owner's remainder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommissionBreakdown {
    pub total_commission: Decimal,
    pub prea_fee: Decimal,
    pub agent_share: Decimal,
    pub agency_share: Decimal,
    pub owner_amount: Decimal,
    /// Amount the components are computed against (gross less sale VAT).
    pub base_amount: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sale_vat: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vat_on_commission: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_split: Option<AgentSplit>,
}

impl CommissionBreakdown {
    /// No commission: the whole gross amount belongs to the owner.
    pub fn zero(gross_amount: Decimal) -> Self {
        Self {
            total_commission: Decimal::ZERO,
            prea_fee: Decimal::ZERO,
            agent_share: Decimal::ZERO,
            agency_share: Decimal::ZERO,
            owner_amount: gross_amount,
            base_amount: gross_amount,
            sale_vat: None,
            vat_on_commission: None,
            agent_split: None,
        }
    }

    /// Mirror image used by reversal payments.
    pub fn negated(&self) -> Self {
        Self {
            total_commission: -self.total_commission,
            prea_fee: -self.prea_fee,
            agent_share: -self.agent_share,
            agency_share: -self.agency_share,
            owner_amount: -self.owner_amount,
            base_amount: -self.base_amount,
            sale_vat: self.sale_vat.map(|v| -v),
            vat_on_commission: self.vat_on_commission.map(|v| -v),
            agent_split: self.agent_split.as_ref().map(|split| AgentSplit {
                owner_share: -split.owner_share,
                collaborator_share: -split.collaborator_share,
                owner_id: split.owner_id.clone(),
                collaborator_id: split.collaborator_id.clone(),
            }),
        }
    }

    pub fn has_commission(&self) -> bool {
        !self.total_commission.is_zero()
    }

    /// True when every component adds back up to the commissionable base.
    pub fn is_balanced(&self) -> bool {
        let sum = self.prea_fee
            + self.agent_share
            + self.agency_share
            + self.owner_amount
            + self.vat_on_commission.unwrap_or_default();
        let split_ok = self.agent_split.as_ref().is_none_or(|split| {
            (split.owner_share + split.collaborator_share - self.agent_share).abs() <= CENT
        });
        (sum - self.base_amount).abs() <= CENT && split_ok
    }

    /// Ledger credits implied by the agent share: one per participant, role-tagged when split.
    pub fn agent_credits(&self, agent_id: &ParticipantId) -> Vec<AgentCredit> {
        match &self.agent_split {
            Some(split) => [
                (&split.owner_id, SplitRole::Owner, split.owner_share),
                (
                    &split.collaborator_id,
                    SplitRole::Collaborator,
                    split.collaborator_share,
                ),
            ]
            .into_iter()
            .filter(|(_, _, amount)| !amount.is_zero())
            .map(|(participant, role, amount)| AgentCredit {
                participant_id: participant.clone(),
                role: Some(role),
                amount,
            })
            .collect(),
            None if !self.agent_share.is_zero() => vec![AgentCredit {
                participant_id: agent_id.clone(),
                role: None,
                amount: self.agent_share,
            }],
            None => Vec::new(),
        }
    }
}

/// A single ledger credit derived from a breakdown.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentCredit {
    pub participant_id: ParticipantId,
    pub role: Option<SplitRole>,
    pub amount: Decimal,
}

/// Company-level commission configuration. Fractions are expressed in [0, 1].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommissionSettings {
    pub prea_percent_of_total: Decimal,
    pub agent_percent_of_remaining: Decimal,
    pub agency_percent_of_remaining: Decimal,
    pub vat_on_commission_rate: Decimal,
    pub default_rental_commission_percent: Decimal,
    pub default_sale_commission_percent: Decimal,
}

impl Default for CommissionSettings {
    fn default() -> Self {
        Self {
            prea_percent_of_total: dec!(0.03),
            agent_percent_of_remaining: dec!(0.6),
            agency_percent_of_remaining: dec!(0.4),
            vat_on_commission_rate: dec!(0.155),
            default_rental_commission_percent: dec!(10),
            default_sale_commission_percent: dec!(5),
        }
    }
}

/// VAT treatment of a sale's gross amount.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct VatOptions {
    pub vat_included: bool,
    pub vat_rate: Decimal,
}

/// Creator/collaborator percentages of a multi-party development.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DevelopmentSplit {
    pub creator_id: ParticipantId,
    pub owner_percent: Decimal,
    pub collaborator_percent: Decimal,
}

/// Facts needed to apply the introduction rule.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct IntroductionContext {
    pub monthly_rent: Decimal,
    /// A previous payment for the same tenant/property pair already carried the commission.
    pub already_charged: bool,
}

#[derive(Debug, Clone)]
pub struct CommissionContext<'a> {
    pub agent_id: &'a ParticipantId,
    pub completed: bool,
    pub provisional: bool,
    pub introduction: Option<IntroductionContext>,
    pub development: Option<&'a DevelopmentSplit>,
}

#[derive(Debug, Clone)]
pub struct CommissionRequest<'a> {
    pub gross_amount: Decimal,
    pub deposit_amount: Decimal,
    pub relationship: RelationshipType,
    pub commission_percent: Option<Decimal>,
    pub settings: &'a CommissionSettings,
    pub vat: VatOptions,
    pub context: CommissionContext<'a>,
}

#[derive(Error, Debug, PartialEq)]
pub enum CommissionError {
    #[error("arithmetic overflow while computing {0}")]
    Overflow(&'static str),
}

type CommissionResult<T> = Result<T, CommissionError>;

fn mul(a: Decimal, b: Decimal, what: &'static str) -> CommissionResult<Decimal> {
    a.checked_mul(b).ok_or(CommissionError::Overflow(what))
}

fn div(a: Decimal, b: Decimal, what: &'static str) -> CommissionResult<Decimal> {
    a.checked_div(b).ok_or(CommissionError::Overflow(what))
}

fn sub(a: Decimal, b: Decimal, what: &'static str) -> CommissionResult<Decimal> {
    a.checked_sub(b).ok_or(CommissionError::Overflow(what))
}

fn clamp_percent(value: Decimal) -> Decimal {
    value.clamp(Decimal::ZERO, ONE_HUNDRED)
}

fn clamp_fraction(value: Decimal) -> Decimal {
    value.clamp(Decimal::ZERO, Decimal::ONE)
}

pub struct CommissionCalculator;

impl CommissionCalculator {
    /// Computes the breakdown for a payment. Never fails.
    pub fn compute(request: &CommissionRequest<'_>) -> CommissionBreakdown {
        match Self::try_compute(request) {
            Ok(breakdown) => breakdown,
            Err(err) => {
                warn!(
                    error = %err,
                    relationship = ?request.relationship,
                    gross = %request.gross_amount,
                    "commission computation failed, falling back to zero commission"
                );
                CommissionBreakdown::zero(request.gross_amount)
            }
        }
    }

    fn try_compute(request: &CommissionRequest<'_>) -> CommissionResult<CommissionBreakdown> {
        match request.relationship {
            RelationshipType::Management => Self::management(request),
            RelationshipType::Introduction => Self::introduction(request),
            RelationshipType::Sale => Self::sale(request),
        }
    }

    fn management(request: &CommissionRequest<'_>) -> CommissionResult<CommissionBreakdown> {
        let amount = request.gross_amount;
        if amount <= Decimal::ZERO {
            return Ok(CommissionBreakdown::zero(amount));
        }
        let percent = clamp_percent(
            request
                .commission_percent
                .unwrap_or(request.settings.default_rental_commission_percent),
        );
        Self::rental_on_base(amount, amount, percent, request.settings)
    }

    fn introduction(request: &CommissionRequest<'_>) -> CommissionResult<CommissionBreakdown> {
        let amount = request.gross_amount;
        let ctx = &request.context;
        let deposit_only = amount <= Decimal::ZERO && request.deposit_amount > Decimal::ZERO;
        let intro = ctx.introduction.unwrap_or_default();

        if amount <= Decimal::ZERO
            || deposit_only
            || !ctx.completed
            || ctx.provisional
            || intro.already_charged
        {
            return Ok(CommissionBreakdown::zero(amount));
        }

        let base = if intro.monthly_rent > Decimal::ZERO {
            amount.min(intro.monthly_rent)
        } else {
            amount
        };
        let percent = clamp_percent(
            request
                .commission_percent
                .unwrap_or(request.settings.default_rental_commission_percent),
        );
        Self::rental_on_base(amount, base, percent, request.settings)
    }

    fn rental_on_base(
        amount: Decimal,
        commission_base: Decimal,
        percent: Decimal,
        settings: &CommissionSettings,
    ) -> CommissionResult<CommissionBreakdown> {
        let total = round_cents(div(
            mul(commission_base, percent, "total commission")?,
            ONE_HUNDRED,
            "total commission",
        )?);
        let (prea_fee, agent_share, agency_share, unallocated) =
            Self::split_total(total, settings)?;

        Ok(CommissionBreakdown {
            total_commission: total,
            prea_fee,
            agent_share,
            agency_share,
            owner_amount: sub(amount, total, "owner amount")? + unallocated,
            base_amount: amount,
            sale_vat: None,
            vat_on_commission: None,
            agent_split: None,
        })
    }

    fn sale(request: &CommissionRequest<'_>) -> CommissionResult<CommissionBreakdown> {
        let gross = request.gross_amount;
        if gross <= Decimal::ZERO {
            return Ok(CommissionBreakdown::zero(gross));
        }
        let settings = request.settings;
        let percent = clamp_percent(
            request
                .commission_percent
                .unwrap_or(settings.default_sale_commission_percent),
        );

        let sale_vat = if request.vat.vat_included {
            let divisor = Decimal::ONE + clamp_fraction(request.vat.vat_rate);
            round_cents(sub(gross, div(gross, divisor, "sale VAT")?, "sale VAT")?)
        } else {
            Decimal::ZERO
        };
        let base = sub(gross, sale_vat, "commission base")?;

        let total = round_cents(div(
            mul(base, percent, "total commission")?,
            ONE_HUNDRED,
            "total commission",
        )?);
        let vat_on_commission = round_cents(mul(
            total,
            clamp_fraction(settings.vat_on_commission_rate),
            "VAT on commission",
        )?);
        let (prea_fee, agent_share, agency_share, unallocated) =
            Self::split_total(total, settings)?;
        let owner_amount = sub(
            sub(base, total, "owner amount")?,
            vat_on_commission,
            "owner amount",
        )? + unallocated;

        let agent_split = match request.context.development {
            Some(dev) if &dev.creator_id != request.context.agent_id => {
                let owner_share = round_cents(div(
                    mul(agent_share, clamp_percent(dev.owner_percent), "development split")?,
                    ONE_HUNDRED,
                    "development split",
                )?);
                Some(AgentSplit {
                    owner_share,
                    collaborator_share: sub(agent_share, owner_share, "development split")?,
                    owner_id: dev.creator_id.clone(),
                    collaborator_id: request.context.agent_id.clone(),
                })
            }
            _ => None,
        };

        Ok(CommissionBreakdown {
            total_commission: total,
            prea_fee,
            agent_share,
            agency_share,
            owner_amount,
            base_amount: base,
            sale_vat: Some(sale_vat),
            vat_on_commission: Some(vat_on_commission),
            agent_split,
        })
    }

    /// Splits a total commission into PREA fee, agent share and agency share.
    /// When the agent and agency fractions cover the whole remainder the agency share takes
    /// the cent residue. Otherwise the uncovered part is returned as the fourth element and
    /// stays with the owner.
    fn split_total(
        total: Decimal,
        settings: &CommissionSettings,
    ) -> CommissionResult<(Decimal, Decimal, Decimal, Decimal)> {
        let prea_fee = round_cents(mul(
            total,
            clamp_fraction(settings.prea_percent_of_total),
            "PREA fee",
        )?);
        let remaining = sub(total, prea_fee, "remaining commission")?;
        let agent_fraction = clamp_fraction(settings.agent_percent_of_remaining);
        let agency_fraction = clamp_fraction(settings.agency_percent_of_remaining);
        let agent_share = round_cents(mul(remaining, agent_fraction, "agent share")?);
        let residue = sub(remaining, agent_share, "agency share")?;
        if agent_fraction + agency_fraction >= Decimal::ONE {
            return Ok((prea_fee, agent_share, residue, Decimal::ZERO));
        }
        let agency_share =
            round_cents(mul(remaining, agency_fraction, "agency share")?).min(residue);
        let unallocated = sub(residue, agency_share, "unallocated commission")?;
        Ok((prea_fee, agent_share, agency_share, unallocated))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent() -> ParticipantId {
        ParticipantId::new("agent-1")
    }

    fn request<'a>(
        amount: Decimal,
        relationship: RelationshipType,
        settings: &'a CommissionSettings,
        agent: &'a ParticipantId,
    ) -> CommissionRequest<'a> {
        CommissionRequest {
            gross_amount: amount,
            deposit_amount: Decimal::ZERO,
            relationship,
            commission_percent: Some(dec!(10)),
            settings,
            vat: VatOptions::default(),
            context: CommissionContext {
                agent_id: agent,
                completed: true,
                provisional: false,
                introduction: None,
                development: None,
            },
        }
    }

    #[test]
    fn test_management_scenario() {
        let settings = CommissionSettings::default();
        let agent = agent();
        let breakdown = CommissionCalculator::compute(&request(
            dec!(1000),
            RelationshipType::Management,
            &settings,
            &agent,
        ));

        assert_eq!(breakdown.total_commission, dec!(100));
        assert_eq!(breakdown.prea_fee, dec!(3));
        assert_eq!(breakdown.agent_share, dec!(58.2));
        assert_eq!(breakdown.agency_share, dec!(38.8));
        assert_eq!(breakdown.owner_amount, dec!(900));
        assert!(breakdown.is_balanced());
    }

    #[test]
    fn test_agency_fraction_is_honored_when_shares_leave_a_gap() {
        let settings = CommissionSettings {
            agent_percent_of_remaining: dec!(0.5),
            agency_percent_of_remaining: dec!(0.3),
            ..CommissionSettings::default()
        };
        let agent = agent();
        let breakdown = CommissionCalculator::compute(&request(
            dec!(1000),
            RelationshipType::Management,
            &settings,
            &agent,
        ));

        assert_eq!(breakdown.prea_fee, dec!(3));
        assert_eq!(breakdown.agent_share, dec!(48.5));
        assert_eq!(breakdown.agency_share, dec!(29.1));
        assert_eq!(breakdown.owner_amount, dec!(919.4));
        assert!(breakdown.is_balanced());
    }

    #[test]
    fn test_management_conserves_awkward_amounts() {
        let settings = CommissionSettings::default();
        let agent = agent();
        for amount in [dec!(333.33), dec!(0.07), dec!(1234.57), dec!(99999.99)] {
            let breakdown = CommissionCalculator::compute(&request(
                amount,
                RelationshipType::Management,
                &settings,
                &agent,
            ));
            assert_eq!(breakdown.total_commission + breakdown.owner_amount, amount);
            assert!(breakdown.is_balanced(), "unbalanced for {amount}");
        }
    }

    #[test]
    fn test_missing_percent_uses_default_and_out_of_range_is_clamped() {
        let settings = CommissionSettings::default();
        let agent = agent();
        let mut req = request(dec!(500), RelationshipType::Management, &settings, &agent);
        req.commission_percent = None;
        assert_eq!(
            CommissionCalculator::compute(&req).total_commission,
            dec!(50)
        );

        req.commission_percent = Some(dec!(250));
        let breakdown = CommissionCalculator::compute(&req);
        assert_eq!(breakdown.total_commission, dec!(500));
        assert_eq!(breakdown.owner_amount, Decimal::ZERO);

        req.commission_percent = Some(dec!(-5));
        assert_eq!(
            CommissionCalculator::compute(&req).total_commission,
            Decimal::ZERO
        );
    }

    #[test]
    fn test_introduction_capped_at_one_month() {
        let settings = CommissionSettings::default();
        let agent = agent();
        let mut req = request(dec!(3000), RelationshipType::Introduction, &settings, &agent);
        req.context.introduction = Some(IntroductionContext {
            monthly_rent: dec!(1000),
            already_charged: false,
        });

        let breakdown = CommissionCalculator::compute(&req);
        assert_eq!(breakdown.total_commission, dec!(100));
        assert_eq!(breakdown.owner_amount, dec!(2900));
        assert!(breakdown.is_balanced());
    }

    #[test]
    fn test_introduction_charged_once() {
        let settings = CommissionSettings::default();
        let agent = agent();
        let mut req = request(dec!(1000), RelationshipType::Introduction, &settings, &agent);
        req.context.introduction = Some(IntroductionContext {
            monthly_rent: dec!(1000),
            already_charged: true,
        });

        let breakdown = CommissionCalculator::compute(&req);
        assert_eq!(breakdown.agent_share, Decimal::ZERO);
        assert_eq!(breakdown.owner_amount, dec!(1000));
    }

    #[test]
    fn test_introduction_skips_deposit_only_and_provisional() {
        let settings = CommissionSettings::default();
        let agent = agent();
        let mut req = request(Decimal::ZERO, RelationshipType::Introduction, &settings, &agent);
        req.deposit_amount = dec!(800);
        assert!(!CommissionCalculator::compute(&req).has_commission());

        let mut req = request(dec!(800), RelationshipType::Introduction, &settings, &agent);
        req.context.provisional = true;
        assert!(!CommissionCalculator::compute(&req).has_commission());
    }

    #[test]
    fn test_sale_with_included_vat_conserves() {
        let settings = CommissionSettings::default();
        let agent = agent();
        let mut req = request(dec!(115000), RelationshipType::Sale, &settings, &agent);
        req.commission_percent = Some(dec!(5));
        req.vat = VatOptions {
            vat_included: true,
            vat_rate: dec!(0.15),
        };

        let breakdown = CommissionCalculator::compute(&req);
        assert_eq!(breakdown.sale_vat, Some(dec!(15000)));
        assert_eq!(breakdown.base_amount, dec!(100000));
        assert_eq!(breakdown.total_commission, dec!(5000));
        assert_eq!(breakdown.vat_on_commission, Some(dec!(775)));
        let sum = breakdown.prea_fee
            + breakdown.agent_share
            + breakdown.agency_share
            + breakdown.owner_amount
            + breakdown.vat_on_commission.unwrap();
        assert_eq!(sum, dec!(115000) - dec!(15000));
    }

    #[test]
    fn test_sale_collaborator_split() {
        let settings = CommissionSettings::default();
        let collaborator = ParticipantId::new("collab");
        let development = DevelopmentSplit {
            creator_id: ParticipantId::new("creator"),
            owner_percent: dec!(50),
            collaborator_percent: dec!(50),
        };
        let mut req = request(dec!(200000), RelationshipType::Sale, &settings, &collaborator);
        req.context.development = Some(&development);

        let breakdown = CommissionCalculator::compute(&req);
        let split = breakdown.agent_split.clone().expect("split expected");
        assert_eq!(split.owner_id, development.creator_id);
        assert_eq!(split.collaborator_id, collaborator);
        assert_eq!(split.owner_share + split.collaborator_share, breakdown.agent_share);
        assert!(breakdown.is_balanced());

        let credits = breakdown.agent_credits(&collaborator);
        assert_eq!(credits.len(), 2);
        assert_eq!(credits[0].role, Some(SplitRole::Owner));
    }

    #[test]
    fn test_sale_by_creator_keeps_full_share() {
        let settings = CommissionSettings::default();
        let creator = ParticipantId::new("creator");
        let development = DevelopmentSplit {
            creator_id: creator.clone(),
            owner_percent: dec!(60),
            collaborator_percent: dec!(40),
        };
        let mut req = request(dec!(200000), RelationshipType::Sale, &settings, &creator);
        req.context.development = Some(&development);

        let breakdown = CommissionCalculator::compute(&req);
        assert!(breakdown.agent_split.is_none());
        let credits = breakdown.agent_credits(&creator);
        assert_eq!(credits.len(), 1);
        assert_eq!(credits[0].amount, breakdown.agent_share);
    }

    #[test]
    fn test_overflow_fails_open() {
        let settings = CommissionSettings::default();
        let agent = agent();
        let req = request(Decimal::MAX, RelationshipType::Management, &settings, &agent);

        let breakdown = CommissionCalculator::compute(&req);
        assert_eq!(breakdown.total_commission, Decimal::ZERO);
        assert_eq!(breakdown.owner_amount, Decimal::MAX);
    }

    #[test]
    fn test_negated_breakdown_cancels() {
        let settings = CommissionSettings::default();
        let agent = agent();
        let breakdown = CommissionCalculator::compute(&request(
            dec!(1000),
            RelationshipType::Management,
            &settings,
            &agent,
        ));
        let negated = breakdown.negated();
        assert_eq!(breakdown.agent_share + negated.agent_share, Decimal::ZERO);
        assert!(negated.is_balanced());
    }
}
