use super::ids::{AuditId, CompanyId, ParticipantId, PaymentId};
use super::payment::Payment;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditAction {
    Create,
    Edit,
    Post,
    Reverse,
    Void,
    Delete,
}

/// Immutable record of one mutation. Never updated or deleted once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: AuditId,
    pub payment_id: PaymentId,
    pub company_id: CompanyId,
    pub action: AuditAction,
    pub old_values: Option<Value>,
    pub new_values: Option<Value>,
    pub reason: Option<String>,
    pub actor_id: ParticipantId,
    pub recorded_at: DateTime<Utc>,
}

/// Snapshot of the fields a lifecycle operation can change.
pub fn snapshot(payment: &Payment) -> Value {
    json!({
        "amount": payment.amount,
        "depositAmount": payment.deposit_amount,
        "currency": payment.currency,
        "paymentDate": payment.payment_date,
        "participantId": payment.participant_id,
        "status": payment.status,
        "postingStatus": payment.posting_status,
        "linkage": payment.linkage,
        "rentalPeriod": payment.rental_period,
        "advanceMonths": payment.advance_months,
        "reference": payment.reference,
        "commission": payment.commission,
        "commissionFinalized": payment.commission_finalized,
        "inSuspense": payment.in_suspense,
        "reversalPaymentId": payment.reversal_payment_id,
        "correctedPaymentId": payment.corrected_payment_id,
        "notes": payment.notes,
    })
}
