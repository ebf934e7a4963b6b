use crate::domain::audit::{AuditAction, AuditLogEntry, snapshot};
use crate::domain::ids::{AuditId, PaymentId};
use crate::domain::payment::Payment;
use crate::domain::ports::{Actor, StoreRef};
use crate::error::Result;
use chrono::Utc;
use tracing::warn;

/// Append-only mutation history for payments.
///
/// Recording is best-effort: a failed append is logged and never fails the operation that
/// triggered it.
pub struct AuditTrail {
    store: StoreRef,
}

impl AuditTrail {
    pub fn new(store: StoreRef) -> Self {
        Self { store }
    }

    /// Appends one entry with before/after snapshots of the payment.
    pub async fn record(
        &self,
        action: AuditAction,
        before: Option<&Payment>,
        after: Option<&Payment>,
        reason: Option<&str>,
        actor: &Actor,
    ) {
        let Some(subject) = after.or(before) else {
            return;
        };
        let entry = AuditLogEntry {
            id: AuditId::generate(),
            payment_id: subject.id.clone(),
            company_id: subject.company_id.clone(),
            action,
            old_values: before.map(snapshot),
            new_values: after.map(snapshot),
            reason: reason.map(str::to_string),
            actor_id: actor.id.clone(),
            recorded_at: Utc::now(),
        };
        if let Err(err) = self.store.append_audit(entry).await {
            warn!(
                payment_id = %subject.id,
                action = ?action,
                error = %err,
                "failed to append audit entry"
            );
        }
    }

    /// Entries for a payment, oldest first.
    pub async fn history(&self, payment_id: &PaymentId) -> Result<Vec<AuditLogEntry>> {
        let mut entries = self.store.audit_history(payment_id).await?;
        entries.sort_by(|a, b| a.recorded_at.cmp(&b.recorded_at));
        Ok(entries)
    }
}
