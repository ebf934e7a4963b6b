use super::commission::{CommissionBreakdown, RelationshipType, VatOptions};
use super::ids::{CompanyId, OwnerId, ParticipantId, PaymentId, PropertyId, TenantId};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Settlement status reported by the payer side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
}

/// Accounting state of a payment record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostingStatus {
    Draft,
    Posted,
    Reversed,
    Voided,
}

impl PostingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostingStatus::Draft => "draft",
            PostingStatus::Posted => "posted",
            PostingStatus::Reversed => "reversed",
            PostingStatus::Voided => "voided",
        }
    }
}

/// What the payment is attached to.
///
/// Provisional payments are captured before the property and tenant are known and carry no
/// financial effect until they are finalized into a linked payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Linkage {
    Linked {
        property_id: PropertyId,
        tenant_id: TenantId,
    },
    Provisional {
        manual_address: String,
        manual_name: String,
    },
}

impl Linkage {
    pub fn is_provisional(&self) -> bool {
        matches!(self, Linkage::Provisional { .. })
    }

    pub fn property_id(&self) -> Option<&PropertyId> {
        match self {
            Linkage::Linked { property_id, .. } => Some(property_id),
            Linkage::Provisional { .. } => None,
        }
    }

    pub fn tenant_id(&self) -> Option<&TenantId> {
        match self {
            Linkage::Linked { tenant_id, .. } => Some(tenant_id),
            Linkage::Provisional { .. } => None,
        }
    }
}

/// Calendar month a rental payment is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RentalPeriod {
    pub year: i32,
    pub month: u32,
}

impl RentalPeriod {
    pub fn new(year: i32, month: u32) -> Self {
        Self { year, month }
    }

    /// Months since year zero, used for range arithmetic.
    pub fn ordinal(&self) -> i64 {
        i64::from(self.year) * 12 + i64::from(self.month) - 1
    }

    pub fn is_valid(&self) -> bool {
        (1..=12).contains(&self.month)
    }
}

/// The unit of financial record. Mutated only by the lifecycle manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub company_id: CompanyId,
    pub relationship: RelationshipType,
    pub status: PaymentStatus,
    pub posting_status: PostingStatus,
    /// Signed; negative only on reversal entries.
    pub amount: Decimal,
    pub deposit_amount: Decimal,
    pub currency: String,
    pub payment_date: NaiveDate,
    pub participant_id: ParticipantId,
    pub linkage: Linkage,
    pub owner_id: Option<OwnerId>,
    pub rental_period: Option<RentalPeriod>,
    pub advance_months: u32,
    pub reference: String,
    pub vat: VatOptions,
    pub commission: CommissionBreakdown,
    pub commission_finalized: bool,
    pub in_suspense: bool,
    pub idempotency_key: Option<String>,
    pub reversal_of_payment_id: Option<PaymentId>,
    pub reversal_payment_id: Option<PaymentId>,
    pub corrected_payment_id: Option<PaymentId>,
    pub reversed_at: Option<DateTime<Utc>>,
    pub reversed_by: Option<ParticipantId>,
    pub reversal_reason: Option<String>,
    pub confirmed_emitted_at: Option<DateTime<Utc>>,
    pub reversed_emitted_at: Option<DateTime<Utc>>,
    pub created_by: ParticipantId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub notes: Option<String>,
}

impl Payment {
    pub fn is_provisional(&self) -> bool {
        self.linkage.is_provisional()
    }

    pub fn is_reversal_entry(&self) -> bool {
        self.reversal_of_payment_id.is_some()
    }

    pub fn is_deposit_only(&self) -> bool {
        self.amount <= Decimal::ZERO && self.deposit_amount > Decimal::ZERO
    }

    /// Counts towards rent already received for its period.
    pub fn is_active(&self) -> bool {
        matches!(
            self.posting_status,
            PostingStatus::Draft | PostingStatus::Posted
        ) && self.status != PaymentStatus::Failed
            && !self.is_reversal_entry()
    }

    /// Rental months covered, as `[start, end)` ordinals.
    pub fn covered_months(&self) -> Option<(i64, i64)> {
        self.rental_period.map(|period| {
            let start = period.ordinal();
            (start, start + i64::from(self.advance_months.max(1)))
        })
    }

    /// Whether this payment already carried an introduction commission.
    pub fn charged_introduction(&self) -> bool {
        self.relationship == RelationshipType::Introduction
            && self.posting_status == PostingStatus::Posted
            && !self.is_provisional()
            && !self.is_reversal_entry()
            && self.commission.has_commission()
    }
}

/// Caller input for [`create`](crate::application::lifecycle::PaymentLifecycleManager::create).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPayment {
    pub company_id: CompanyId,
    pub relationship: RelationshipType,
    pub status: PaymentStatus,
    pub amount: Decimal,
    #[serde(default)]
    pub deposit_amount: Decimal,
    pub currency: String,
    pub payment_date: NaiveDate,
    pub participant_id: ParticipantId,
    pub linkage: Linkage,
    #[serde(default)]
    pub rental_period: Option<RentalPeriod>,
    #[serde(default = "default_advance_months")]
    pub advance_months: u32,
    #[serde(default)]
    pub reference: String,
    #[serde(default)]
    pub vat: VatOptions,
    #[serde(default)]
    pub idempotency_key: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

fn default_advance_months() -> u32 {
    1
}

/// Fields a draft payment may change.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PaymentPatch {
    pub amount: Option<Decimal>,
    pub deposit_amount: Option<Decimal>,
    pub currency: Option<String>,
    pub payment_date: Option<NaiveDate>,
    pub participant_id: Option<ParticipantId>,
    pub rental_period: Option<RentalPeriod>,
    pub advance_months: Option<u32>,
    pub reference: Option<String>,
    pub status: Option<PaymentStatus>,
    pub notes: Option<String>,
}

impl PaymentPatch {
    pub fn status(status: PaymentStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn apply(&self, payment: &mut Payment) {
        if let Some(amount) = self.amount {
            payment.amount = amount;
        }
        if let Some(deposit) = self.deposit_amount {
            payment.deposit_amount = deposit;
        }
        if let Some(currency) = &self.currency {
            payment.currency = currency.clone();
        }
        if let Some(date) = self.payment_date {
            payment.payment_date = date;
        }
        if let Some(participant) = &self.participant_id {
            payment.participant_id = participant.clone();
        }
        if let Some(period) = self.rental_period {
            payment.rental_period = Some(period);
        }
        if let Some(months) = self.advance_months {
            payment.advance_months = months;
        }
        if let Some(reference) = &self.reference {
            payment.reference = reference.clone();
        }
        if let Some(status) = self.status {
            payment.status = status;
        }
        if let Some(notes) = &self.notes {
            payment.notes = Some(notes.clone());
        }
    }
}

/// Target linkage when a provisional payment is finalized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalizeLinkage {
    pub property_id: PropertyId,
    pub tenant_id: TenantId,
    pub relationship: RelationshipType,
    pub owner_id: Option<OwnerId>,
}
