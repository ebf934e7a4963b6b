//! Per-participant append-only ledger.
//!
//! Cached aggregates are a pure fold over the entry log and are rebuilt after every mutation.

use super::commission::SplitRole;
use super::ids::{EntryId, ParticipantId, PaymentId, PayoutId};
use super::money::{Amount, Balance, from_cents, to_cents};
use crate::error::{ConflictReason, PaymentError};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    Commission,
    Payout,
    Penalty,
    Adjustment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Pending,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayoutStatus {
    Pending,
    Completed,
    Failed,
    Cancelled,
}

impl From<PayoutStatus> for EntryStatus {
    fn from(status: PayoutStatus) -> Self {
        match status {
            PayoutStatus::Pending => EntryStatus::Pending,
            PayoutStatus::Completed => EntryStatus::Completed,
            PayoutStatus::Failed => EntryStatus::Failed,
            PayoutStatus::Cancelled => EntryStatus::Cancelled,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: EntryId,
    pub r#type: EntryType,
    /// Payouts and penalties are stored positive; commissions and adjustments are signed.
    pub amount: Decimal,
    pub date: DateTime<Utc>,
    pub status: EntryStatus,
    pub reference: String,
    pub description: String,
    pub payment_id: Option<PaymentId>,
    pub role: Option<SplitRole>,
    pub payout_id: Option<PayoutId>,
    /// Derived during recompute.
    pub running_balance: Decimal,
}

/// Withdrawal request against a ledger, mirrored by a `payout` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentPayout {
    pub id: PayoutId,
    pub amount: Decimal,
    pub status: PayoutStatus,
    pub reference: String,
    pub recipient: String,
    pub requested_at: DateTime<Utc>,
}

/// Dedup key of a payment-backed commission posting.
pub fn posting_reference(payment_id: &PaymentId, role: Option<SplitRole>) -> String {
    match role {
        Some(role) => format!("{}-{}", payment_id, role.as_str()),
        None => payment_id.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommissionPosting {
    pub amount: Decimal,
    pub date: DateTime<Utc>,
    pub description: String,
    pub reference: String,
    pub payment_id: Option<PaymentId>,
    pub role: Option<SplitRole>,
}

impl CommissionPosting {
    /// Posting keyed by its payment; the reference is role-qualified for split payments.
    pub fn for_payment(
        payment_id: &PaymentId,
        role: Option<SplitRole>,
        amount: Decimal,
        date: DateTime<Utc>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            amount,
            date,
            description: description.into(),
            reference: posting_reference(payment_id, role),
            payment_id: Some(payment_id.clone()),
            role,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PenaltyPosting {
    pub amount: Amount,
    pub date: DateTime<Utc>,
    pub description: String,
    pub reference: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdjustmentPosting {
    pub amount: Decimal,
    pub date: DateTime<Utc>,
    pub description: String,
    pub reference: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayoutRequest {
    pub amount: Amount,
    pub date: DateTime<Utc>,
    pub reference: String,
    pub recipient: String,
    pub status: PayoutStatus,
}

/// A single mutation of a participant's ledger document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LedgerOp {
    Commission(CommissionPosting),
    Penalty(PenaltyPosting),
    Adjustment(AdjustmentPosting),
    Payout(PayoutRequest),
    PayoutStatus {
        payout_id: PayoutId,
        status: PayoutStatus,
    },
    /// Negates every completed commission entry of `original`, keyed by `reversal`.
    ReversePayment {
        original: PaymentId,
        reversal: PaymentId,
        date: DateTime<Utc>,
    },
    /// Repairs historical duplicates; `backfill` maps normalized references to payment ids.
    Reconcile {
        backfill: HashMap<String, PaymentId>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum PostOutcome {
    Posted(EntryId),
    Duplicate,
    Payout(AgentPayout),
    PayoutUpdated,
    Reversed(usize),
    Reconciled(ReconcileReport),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub backfilled: usize,
    pub removed: Vec<EntryId>,
}

/// Ledger document for one participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentAccount {
    pub participant_id: ParticipantId,
    pub entries: Vec<LedgerEntry>,
    pub payouts: Vec<AgentPayout>,
    pub total_commissions: Balance,
    pub total_payouts: Balance,
    pub total_penalties: Balance,
    pub total_adjustments: Balance,
    pub running_balance: Balance,
    pub last_updated: Option<DateTime<Utc>>,
}

impl AgentAccount {
    pub fn new(participant_id: ParticipantId) -> Self {
        Self {
            participant_id,
            entries: Vec::new(),
            payouts: Vec::new(),
            total_commissions: Balance::ZERO,
            total_payouts: Balance::ZERO,
            total_penalties: Balance::ZERO,
            total_adjustments: Balance::ZERO,
            running_balance: Balance::ZERO,
            last_updated: None,
        }
    }

    /// Applies one operation and rebuilds the aggregates.
    pub fn apply(&mut self, op: LedgerOp) -> Result<PostOutcome, PaymentError> {
        let outcome = match op {
            LedgerOp::Commission(posting) => self.add_commission(posting),
            LedgerOp::Penalty(posting) => self.add_penalty(posting),
            LedgerOp::Adjustment(posting) => self.add_adjustment(posting),
            LedgerOp::Payout(request) => self.record_payout(request)?,
            LedgerOp::PayoutStatus { payout_id, status } => {
                self.set_payout_status(&payout_id, status)?
            }
            LedgerOp::ReversePayment {
                original,
                reversal,
                date,
            } => PostOutcome::Reversed(self.reverse_payment(&original, &reversal, date)),
            LedgerOp::Reconcile { backfill } => PostOutcome::Reconciled(self.reconcile(&backfill)),
        };
        if !matches!(outcome, PostOutcome::Duplicate) {
            self.last_updated = Some(Utc::now());
        }
        self.recompute();
        Ok(outcome)
    }

    fn is_duplicate_commission(&self, posting: &CommissionPosting) -> bool {
        self.entries
            .iter()
            .filter(|e| e.r#type == EntryType::Commission)
            .any(|e| {
                (!posting.reference.is_empty() && e.reference == posting.reference)
                    || (posting.payment_id.is_some()
                        && e.payment_id == posting.payment_id
                        && e.role == posting.role)
            })
    }

    fn push(&mut self, r#type: EntryType, amount: Decimal, date: DateTime<Utc>) -> &mut LedgerEntry {
        self.entries.push(LedgerEntry {
            id: EntryId::generate(),
            r#type,
            amount,
            date,
            status: EntryStatus::Completed,
            reference: String::new(),
            description: String::new(),
            payment_id: None,
            role: None,
            payout_id: None,
            running_balance: Decimal::ZERO,
        });
        let last = self.entries.len() - 1;
        &mut self.entries[last]
    }

    fn add_commission(&mut self, posting: CommissionPosting) -> PostOutcome {
        if self.is_duplicate_commission(&posting) {
            return PostOutcome::Duplicate;
        }
        let entry = self.push(EntryType::Commission, posting.amount, posting.date);
        entry.reference = posting.reference;
        entry.description = posting.description;
        entry.payment_id = posting.payment_id;
        entry.role = posting.role;
        PostOutcome::Posted(entry.id.clone())
    }

    fn has_reference(&self, r#type: EntryType, reference: &str) -> bool {
        !reference.is_empty()
            && self
                .entries
                .iter()
                .any(|e| e.r#type == r#type && e.reference == reference)
    }

    fn add_penalty(&mut self, posting: PenaltyPosting) -> PostOutcome {
        if self.has_reference(EntryType::Penalty, &posting.reference) {
            return PostOutcome::Duplicate;
        }
        let entry = self.push(EntryType::Penalty, posting.amount.value(), posting.date);
        entry.reference = posting.reference;
        entry.description = posting.description;
        PostOutcome::Posted(entry.id.clone())
    }

    fn add_adjustment(&mut self, posting: AdjustmentPosting) -> PostOutcome {
        if self.has_reference(EntryType::Adjustment, &posting.reference) {
            return PostOutcome::Duplicate;
        }
        let entry = self.push(EntryType::Adjustment, posting.amount, posting.date);
        entry.reference = posting.reference;
        entry.description = posting.description;
        PostOutcome::Posted(entry.id.clone())
    }

    fn record_payout(&mut self, request: PayoutRequest) -> Result<PostOutcome, PaymentError> {
        if self.has_reference(EntryType::Payout, &request.reference) {
            return Ok(PostOutcome::Duplicate);
        }
        let available = self.available_for_payout(None);
        if available < request.amount.value() {
            return Err(PaymentError::InsufficientBalance {
                requested: request.amount.value(),
                available,
            });
        }

        let payout = AgentPayout {
            id: PayoutId::generate(),
            amount: request.amount.value(),
            status: request.status,
            reference: request.reference.clone(),
            recipient: request.recipient.clone(),
            requested_at: request.date,
        };
        let entry = self.push(EntryType::Payout, payout.amount, request.date);
        entry.status = request.status.into();
        entry.reference = request.reference;
        entry.description = format!("Payout to {}", request.recipient);
        entry.payout_id = Some(payout.id.clone());
        self.payouts.push(payout.clone());
        Ok(PostOutcome::Payout(payout))
    }

    /// Running balance less the payouts still pending, which already hold their funds.
    fn available_for_payout(&self, excluding: Option<&PayoutId>) -> Decimal {
        let reserved: Decimal = self
            .payouts
            .iter()
            .filter(|p| p.status == PayoutStatus::Pending && Some(&p.id) != excluding)
            .map(|p| p.amount)
            .sum();
        self.running_balance.value() - reserved
    }

    fn set_payout_status(
        &mut self,
        payout_id: &PayoutId,
        status: PayoutStatus,
    ) -> Result<PostOutcome, PaymentError> {
        let (current, amount) = self
            .payouts
            .iter()
            .find(|p| &p.id == payout_id)
            .map(|p| (p.status, p.amount))
            .ok_or_else(|| PaymentError::NotFound(format!("payout {payout_id}")))?;
        if matches!(current, PayoutStatus::Failed | PayoutStatus::Cancelled) {
            return Err(ConflictReason::PayoutClosed.into());
        }
        if current != PayoutStatus::Completed && status == PayoutStatus::Completed {
            let available = self.available_for_payout(Some(payout_id));
            if available < amount {
                return Err(PaymentError::InsufficientBalance {
                    requested: amount,
                    available,
                });
            }
        }
        if let Some(payout) = self.payouts.iter_mut().find(|p| &p.id == payout_id) {
            payout.status = status;
        }
        for entry in self
            .entries
            .iter_mut()
            .filter(|e| e.payout_id.as_ref() == Some(payout_id))
        {
            entry.status = status.into();
        }
        Ok(PostOutcome::PayoutUpdated)
    }

    fn reverse_payment(
        &mut self,
        original: &PaymentId,
        reversal: &PaymentId,
        date: DateTime<Utc>,
    ) -> usize {
        let to_negate: Vec<(Option<SplitRole>, Decimal, String)> = self
            .entries
            .iter()
            .filter(|e| {
                e.r#type == EntryType::Commission
                    && e.status == EntryStatus::Completed
                    && e.payment_id.as_ref() == Some(original)
            })
            .map(|e| (e.role, e.amount, e.description.clone()))
            .collect();

        let mut posted = 0;
        for (role, amount, description) in to_negate {
            let posting = CommissionPosting::for_payment(
                reversal,
                role,
                -amount,
                date,
                format!("Reversal: {description}"),
            );
            if let PostOutcome::Posted(_) = self.add_commission(posting) {
                posted += 1;
            }
        }
        posted
    }

    /// Repairs legacy duplicate commission entries.
    ///
    /// Entries without a payment id first get one from `backfill` when their reference resolves.
    /// Whatever remains unbacked is bucketed by (normalized reference, role, cents): the earliest
    /// entry of a bucket survives unless a payment-backed entry already covers it.
    fn reconcile(&mut self, backfill: &HashMap<String, PaymentId>) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        self.entries.sort_by(chronological);

        for entry in self
            .entries
            .iter_mut()
            .filter(|e| e.r#type == EntryType::Commission && e.payment_id.is_none())
        {
            let (base, suffix_role) = split_role_suffix(&normalize_reference(&entry.reference));
            if let Some(payment_id) = backfill.get(&base) {
                let role = entry.role.or(suffix_role);
                entry.payment_id = Some(payment_id.clone());
                entry.role = role;
                report.backfilled += 1;
            }
        }

        let mut seen_backed: HashSet<(PaymentId, Option<SplitRole>, i128)> = HashSet::new();
        let mut covered: HashSet<(String, Option<SplitRole>, i128)> = HashSet::new();
        let mut seen_legacy: HashSet<(String, Option<SplitRole>, i128)> = HashSet::new();
        let mut remove: HashSet<EntryId> = HashSet::new();

        // Backed entries: amount sign distinguishes originals from reversals.
        for entry in self
            .entries
            .iter()
            .filter(|e| e.r#type == EntryType::Commission)
        {
            if let Some(payment_id) = &entry.payment_id {
                let key = (payment_id.clone(), entry.role, to_cents(entry.amount));
                if !seen_backed.insert(key) {
                    remove.insert(entry.id.clone());
                    continue;
                }
                let (base, _) = split_role_suffix(&normalize_reference(&entry.reference));
                covered.insert((base, entry.role, to_cents(entry.amount)));
                covered.insert((
                    normalize_reference(payment_id.as_str()),
                    entry.role,
                    to_cents(entry.amount),
                ));
            }
        }

        for entry in self
            .entries
            .iter()
            .filter(|e| e.r#type == EntryType::Commission && e.payment_id.is_none())
        {
            let (base, suffix_role) = split_role_suffix(&normalize_reference(&entry.reference));
            let bucket = (base, entry.role.or(suffix_role), to_cents(entry.amount));
            if covered.contains(&bucket) || !seen_legacy.insert(bucket) {
                remove.insert(entry.id.clone());
            }
        }

        self.entries.retain(|e| !remove.contains(&e.id));
        report.removed = remove.into_iter().collect();
        report.removed.sort();
        report
    }

    /// Rebuilds running balances and aggregates from the log in integer cents.
    pub fn recompute(&mut self) {
        self.entries.sort_by(chronological);

        let (mut commissions, mut payouts, mut penalties, mut adjustments) =
            (0i128, 0i128, 0i128, 0i128);
        for entry in self.entries.iter_mut() {
            if entry.status == EntryStatus::Completed {
                let cents = to_cents(entry.amount);
                match entry.r#type {
                    EntryType::Commission => commissions += cents,
                    EntryType::Payout => payouts += cents,
                    EntryType::Penalty => penalties += cents,
                    EntryType::Adjustment => adjustments += cents,
                }
            }
            entry.running_balance = from_cents(commissions + adjustments - payouts - penalties);
        }

        self.total_commissions = Balance::from_cents(commissions);
        self.total_payouts = Balance::from_cents(payouts);
        self.total_penalties = Balance::from_cents(penalties);
        self.total_adjustments = Balance::from_cents(adjustments);
        self.running_balance =
            Balance::from_cents(commissions + adjustments - payouts - penalties);
    }

    /// Net completed effect of a payment's entries on this ledger.
    pub fn contribution_of(&self, payment_id: &PaymentId) -> Decimal {
        self.entries
            .iter()
            .filter(|e| e.status == EntryStatus::Completed && e.payment_id.as_ref() == Some(payment_id))
            .map(|e| e.amount)
            .sum()
    }

    /// References of legacy commission entries, normalized and stripped of role suffixes.
    pub fn legacy_references(&self) -> Vec<String> {
        let mut refs: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.r#type == EntryType::Commission && e.payment_id.is_none())
            .map(|e| split_role_suffix(&normalize_reference(&e.reference)).0)
            .filter(|r| !r.is_empty())
            .collect();
        refs.sort();
        refs.dedup();
        refs
    }
}

fn chronological(a: &LedgerEntry, b: &LedgerEntry) -> std::cmp::Ordering {
    a.date.cmp(&b.date).then_with(|| a.id.cmp(&b.id))
}

pub fn normalize_reference(reference: &str) -> String {
    reference
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn split_role_suffix(reference: &str) -> (String, Option<SplitRole>) {
    for role in [SplitRole::Owner, SplitRole::Collaborator] {
        let suffix = format!("-{}", role.as_str());
        if let Some(base) = reference.strip_suffix(&suffix) {
            return (base.to_string(), Some(role));
        }
    }
    (reference.to_string(), None)
}
