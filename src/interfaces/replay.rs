use crate::application::lifecycle::PaymentLifecycleManager;
use crate::domain::commission::RelationshipType;
use crate::domain::ids::{ParticipantId, PropertyId, TenantId};
use crate::domain::ledger::{PayoutRequest, PayoutStatus, PenaltyPosting};
use crate::domain::money::Amount;
use crate::domain::payment::{
    FinalizeLinkage, Linkage, NewPayment, Payment, PaymentStatus, RentalPeriod,
};
use crate::domain::ports::Actor;
use crate::error::{PaymentError, Result, ValidationError};
use crate::interfaces::csv::command_reader::{CommandKind, CommandRecord};
use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use tracing::debug;

const DEFAULT_CURRENCY: &str = "USD";

/// Applies command-file rows to a lifecycle manager on behalf of one actor.
///
/// Payments are addressed by the `key` they were created with, so a command file can refer to
/// payments recorded by an earlier run against the same persistent store.
pub struct CommandReplayer<'a> {
    manager: &'a PaymentLifecycleManager,
    actor: Actor,
}

impl<'a> CommandReplayer<'a> {
    pub fn new(manager: &'a PaymentLifecycleManager, actor: Actor) -> Self {
        Self { manager, actor }
    }

    pub async fn apply(&self, command: CommandRecord) -> Result<()> {
        debug!(op = ?command.op, key = ?command.key, "applying command");
        match command.op {
            CommandKind::Payment => self.record_payment(command).await,
            CommandKind::Finalize => {
                let payment = self.by_key(&command).await?;
                let linkage = FinalizeLinkage {
                    property_id: PropertyId::new(required(command.property, "property")?),
                    tenant_id: TenantId::new(required(command.tenant, "tenant")?),
                    relationship: command
                        .relationship
                        .unwrap_or(RelationshipType::Management),
                    owner_id: None,
                };
                self.manager
                    .finalize(&payment.id, linkage, &self.actor)
                    .await?;
                Ok(())
            }
            CommandKind::Complete => {
                let payment = self.by_key(&command).await?;
                self.manager
                    .update_status(&payment.id, PaymentStatus::Completed, &self.actor)
                    .await?;
                Ok(())
            }
            CommandKind::Reverse => {
                let payment = self.by_key(&command).await?;
                let reason = command.reason.unwrap_or_default();
                self.manager
                    .reverse(&payment.id, &reason, &self.actor)
                    .await?;
                Ok(())
            }
            CommandKind::Void => {
                let payment = self.by_key(&command).await?;
                let reason = command.reason.unwrap_or_default();
                self.manager.void(&payment.id, &reason, &self.actor).await?;
                Ok(())
            }
            CommandKind::Payout => {
                let agent = ParticipantId::new(required(command.agent, "agent")?);
                let request = PayoutRequest {
                    amount: Amount::new(command.amount.unwrap_or_default())?,
                    date: day_start(required(command.date, "date")?),
                    reference: required(command.key, "key")?,
                    recipient: command.reason.unwrap_or_else(|| agent.to_string()),
                    status: PayoutStatus::Completed,
                };
                self.manager.ledger().record_payout(&agent, request).await?;
                Ok(())
            }
            CommandKind::Penalty => {
                let agent = ParticipantId::new(required(command.agent, "agent")?);
                let posting = PenaltyPosting {
                    amount: Amount::new(command.amount.unwrap_or_default())?,
                    date: day_start(required(command.date, "date")?),
                    description: command.reason.unwrap_or_else(|| "Penalty".to_string()),
                    reference: required(command.key, "key")?,
                };
                self.manager.ledger().add_penalty(&agent, posting).await?;
                Ok(())
            }
            CommandKind::Reconcile => {
                match command.agent {
                    Some(agent) => {
                        self.manager
                            .ledger()
                            .reconcile(&ParticipantId::new(agent))
                            .await?;
                    }
                    None => {
                        self.manager.ledger().reconcile_all().await?;
                    }
                }
                Ok(())
            }
        }
    }

    async fn record_payment(&self, command: CommandRecord) -> Result<()> {
        let date = required(command.date, "date")?;
        let relationship = command
            .relationship
            .unwrap_or(RelationshipType::Management);
        let linkage = match (command.property, command.tenant) {
            (Some(property), Some(tenant)) => Linkage::Linked {
                property_id: PropertyId::new(property),
                tenant_id: TenantId::new(tenant),
            },
            (_, tenant) => Linkage::Provisional {
                manual_address: command.reason.clone().unwrap_or_default(),
                manual_name: tenant.unwrap_or_default(),
            },
        };
        let rental_period = (relationship != RelationshipType::Sale)
            .then(|| RentalPeriod::new(date.year(), date.month()));

        let input = NewPayment {
            company_id: self.actor.company_id.clone(),
            relationship,
            status: command.status.unwrap_or(PaymentStatus::Completed),
            amount: command.amount.unwrap_or_default(),
            deposit_amount: command.deposit.unwrap_or(Decimal::ZERO),
            currency: DEFAULT_CURRENCY.to_string(),
            payment_date: date,
            participant_id: ParticipantId::new(required(command.agent, "agent")?),
            linkage,
            rental_period,
            advance_months: command.months.unwrap_or(1),
            reference: command.key.clone().unwrap_or_default(),
            vat: Default::default(),
            idempotency_key: command.key,
            notes: None,
        };
        self.manager.create(input, &self.actor).await?;
        Ok(())
    }

    async fn by_key(&self, command: &CommandRecord) -> Result<Payment> {
        let key = command
            .key
            .as_deref()
            .ok_or(PaymentError::ValidationError(ValidationError::MissingField(
                "key",
            )))?;
        self.manager.payment_by_key(key, &self.actor).await
    }
}

fn required<T>(value: Option<T>, field: &'static str) -> Result<T> {
    value.ok_or(PaymentError::ValidationError(ValidationError::MissingField(
        field,
    )))
}

fn day_start(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}
