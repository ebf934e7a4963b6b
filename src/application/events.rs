use crate::domain::events::{DomainEvent, EventKind, PaymentConfirmed, PaymentReversed, RetryItem};
use crate::domain::ids::RetryId;
use crate::domain::payment::Payment;
use crate::domain::ports::{Actor, EventSinkRef, StoreRef};
use crate::error::Result;
use chrono::Utc;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitOutcome {
    Delivered,
    /// The payment's marker for this event was already set; nothing was sent.
    AlreadyEmitted,
    /// Delivery failed and the event was parked on the retry queue.
    Queued,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RedeliveryReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Publishes payment events at most once per payment and event kind.
///
/// The emitted marker on the payment is claimed with a conditional write before delivery. When
/// the claim or the delivery fails the event goes to the retry queue instead of failing the
/// caller.
pub struct EventPropagator {
    store: StoreRef,
    sink: EventSinkRef,
}

impl EventPropagator {
    pub fn new(store: StoreRef, sink: EventSinkRef) -> Self {
        Self { store, sink }
    }

    pub async fn payment_confirmed(&self, payment: &Payment, actor: &Actor) -> EmitOutcome {
        let event = DomainEvent::PaymentConfirmed(PaymentConfirmed {
            event_id: EventKind::Confirmed.event_id(&payment.id),
            payment_id: payment.id.clone(),
            property_id: payment.linkage.property_id().cloned(),
            payer_id: payment.linkage.tenant_id().cloned(),
            amount: payment.amount,
            reference: payment.reference.clone(),
            date: payment.payment_date,
            company_id: payment.company_id.clone(),
            performed_by: actor.id.clone(),
        });
        self.emit(event).await
    }

    pub async fn payment_reversed(
        &self,
        original: &Payment,
        reversal: &Payment,
        reason: &str,
        actor: &Actor,
    ) -> EmitOutcome {
        let event = DomainEvent::PaymentReversed(PaymentReversed {
            event_id: EventKind::Reversed.event_id(&original.id),
            payment_id: original.id.clone(),
            reversal_payment_id: reversal.id.clone(),
            company_id: original.company_id.clone(),
            reason: reason.to_string(),
            performed_by: actor.id.clone(),
        });
        self.emit(event).await
    }

    async fn emit(&self, event: DomainEvent) -> EmitOutcome {
        let payment_id = event.payment_id().clone();
        match self
            .store
            .mark_event_emitted(&payment_id, event.kind(), Utc::now())
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                debug!(event_id = event.event_id(), "event already emitted, skipping");
                return EmitOutcome::AlreadyEmitted;
            }
            Err(err) => {
                warn!(event_id = event.event_id(), error = %err, "failed to claim emitted marker");
                return self.park(event, format!("marker update failed: {err}")).await;
            }
        }

        match self.sink.deliver(&event).await {
            Ok(()) => {
                info!(event_id = event.event_id(), "event delivered");
                EmitOutcome::Delivered
            }
            Err(err) => {
                warn!(event_id = event.event_id(), error = %err, "event delivery failed");
                self.park(event, err.to_string()).await
            }
        }
    }

    async fn park(&self, event: DomainEvent, reason: String) -> EmitOutcome {
        let event_id = event.event_id().to_string();
        let item = RetryItem {
            id: RetryId::generate(),
            company_id: event.company_id().clone(),
            event,
            reason,
            attempts: 0,
            enqueued_at: Utc::now(),
            last_attempt_at: None,
        };
        if let Err(err) = self.store.enqueue_retry(item).await {
            error!(event_id = %event_id, error = %err, "failed to enqueue event for retry; event dropped");
        }
        EmitOutcome::Queued
    }

    /// Re-sends up to `limit` parked events, oldest first.
    pub async fn redeliver(&self, limit: usize) -> Result<RedeliveryReport> {
        let mut report = RedeliveryReport::default();
        for item in self.store.pending_retries(limit).await? {
            match self.sink.deliver(&item.event).await {
                Ok(()) => {
                    self.store.remove_retry(&item.id).await?;
                    report.delivered += 1;
                }
                Err(err) => {
                    warn!(
                        event_id = item.event.event_id(),
                        attempts = item.attempts + 1,
                        error = %err,
                        "redelivery failed"
                    );
                    self.store
                        .record_retry_failure(&item.id, &err.to_string(), Utc::now())
                        .await?;
                    report.failed += 1;
                }
            }
        }
        if report.delivered + report.failed > 0 {
            info!(delivered = report.delivered, failed = report.failed, "retry queue processed");
        }
        Ok(report)
    }
}
