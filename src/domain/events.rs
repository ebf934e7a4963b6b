use super::ids::{CompanyId, ParticipantId, PaymentId, PropertyId, RetryId, TenantId};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "payment.confirmed")]
    Confirmed,
    #[serde(rename = "payment.reversed")]
    Reversed,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Confirmed => "payment.confirmed",
            EventKind::Reversed => "payment.reversed",
        }
    }

    /// Stable id downstream consumers dedupe on.
    pub fn event_id(&self, payment_id: &PaymentId) -> String {
        format!("{}:{}", self.as_str(), payment_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentConfirmed {
    pub event_id: String,
    pub payment_id: PaymentId,
    pub property_id: Option<PropertyId>,
    pub payer_id: Option<TenantId>,
    pub amount: Decimal,
    pub reference: String,
    pub date: NaiveDate,
    pub company_id: CompanyId,
    pub performed_by: ParticipantId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentReversed {
    pub event_id: String,
    pub payment_id: PaymentId,
    pub reversal_payment_id: PaymentId,
    pub company_id: CompanyId,
    pub reason: String,
    pub performed_by: ParticipantId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DomainEvent {
    #[serde(rename = "payment.confirmed")]
    PaymentConfirmed(PaymentConfirmed),
    #[serde(rename = "payment.reversed")]
    PaymentReversed(PaymentReversed),
}

impl DomainEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            DomainEvent::PaymentConfirmed(_) => EventKind::Confirmed,
            DomainEvent::PaymentReversed(_) => EventKind::Reversed,
        }
    }

    pub fn event_id(&self) -> &str {
        match self {
            DomainEvent::PaymentConfirmed(e) => &e.event_id,
            DomainEvent::PaymentReversed(e) => &e.event_id,
        }
    }

    pub fn payment_id(&self) -> &PaymentId {
        match self {
            DomainEvent::PaymentConfirmed(e) => &e.payment_id,
            DomainEvent::PaymentReversed(e) => &e.payment_id,
        }
    }

    pub fn company_id(&self) -> &CompanyId {
        match self {
            DomainEvent::PaymentConfirmed(e) => &e.company_id,
            DomainEvent::PaymentReversed(e) => &e.company_id,
        }
    }
}

/// Undelivered event parked for out-of-band redelivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryItem {
    pub id: RetryId,
    pub event: DomainEvent,
    pub company_id: CompanyId,
    pub reason: String,
    pub attempts: u32,
    pub enqueued_at: DateTime<Utc>,
    pub last_attempt_at: Option<DateTime<Utc>>,
}
