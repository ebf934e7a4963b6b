use super::audit::AuditLogEntry;
use super::commission::{CommissionSettings, DevelopmentSplit, RelationshipType};
use super::events::{DomainEvent, EventKind, RetryItem};
use super::ids::{CompanyId, OwnerId, ParticipantId, PaymentId, PropertyId, RetryId, TenantId};
use super::ledger::{AgentAccount, LedgerOp, PostOutcome};
use super::payment::{Payment, PostingStatus};
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Agent,
    Accountant,
    Finance,
    Admin,
}

impl Role {
    pub fn can_reverse(&self) -> bool {
        matches!(self, Role::Finance | Role::Admin)
    }
}

/// Authenticated caller, as resolved by the identity layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Actor {
    pub id: ParticipantId,
    pub company_id: CompanyId,
    pub role: Role,
}

/// Property/lease facts the engine reads but never writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyRecord {
    pub id: PropertyId,
    pub company_id: CompanyId,
    pub agent_id: ParticipantId,
    pub owner_id: Option<OwnerId>,
    pub monthly_rent: Decimal,
    pub commission_percent: Option<Decimal>,
    pub relationship: RelationshipType,
    pub development: Option<DevelopmentSplit>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CompanyConfig {
    pub commission: CommissionSettings,
    /// Payments dated before this day can no longer be reversed.
    pub accounting_lock_date: Option<NaiveDate>,
}

/// Read-only lookups owned by other subsystems.
#[async_trait]
pub trait Directory: Send + Sync {
    async fn property(&self, id: &PropertyId) -> Result<Option<PropertyRecord>>;
    async fn tenant_exists(&self, id: &TenantId) -> Result<bool>;
    async fn company_config(&self, company_id: &CompanyId) -> Result<CompanyConfig>;
}

/// Downstream consumer of domain events (accounting export, trust ledger).
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn deliver(&self, event: &DomainEvent) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CounterKey {
    CompanyRevenue(CompanyId),
    OwnerBalance(OwnerId),
}

impl CounterKey {
    pub fn storage_key(&self) -> String {
        match self {
            CounterKey::CompanyRevenue(id) => format!("company-revenue:{id}"),
            CounterKey::OwnerBalance(id) => format!("owner-balance:{id}"),
        }
    }
}

/// A write that may take part in a multi-document unit.
#[derive(Debug, Clone, PartialEq)]
pub enum Write {
    /// Enforces unique (company, idempotency key) and unique reversal-of id.
    InsertPayment(Payment),
    /// Conditional replace: fails with `StaleState` unless the stored status equals `expected`.
    TransitionPayment {
        payment: Payment,
        expected: PostingStatus,
    },
    Ledger {
        participant_id: ParticipantId,
        op: LedgerOp,
    },
    Counter {
        key: CounterKey,
        delta: Decimal,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum WriteOutcome {
    Done,
    Ledger(PostOutcome),
}

#[async_trait]
pub trait PaymentStore: Send + Sync {
    async fn payment(&self, id: &PaymentId) -> Result<Option<Payment>>;
    async fn payment_by_idempotency_key(
        &self,
        company_id: &CompanyId,
        key: &str,
    ) -> Result<Option<Payment>>;
    async fn payments_for_pair(
        &self,
        company_id: &CompanyId,
        property_id: &PropertyId,
        tenant_id: &TenantId,
    ) -> Result<Vec<Payment>>;
    /// Posted or reversed payments (reversal entries excluded) whose reference or id matches
    /// `reference` after whitespace and case normalization.
    async fn payments_by_reference(&self, reference: &str) -> Result<Vec<Payment>>;
    async fn remove_payment(&self, id: &PaymentId) -> Result<()>;
    /// Sets the emitted marker for `kind` only if it is absent. Returns whether it was set.
    async fn mark_event_emitted(
        &self,
        id: &PaymentId,
        kind: EventKind,
        at: DateTime<Utc>,
    ) -> Result<bool>;
}

#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn account(&self, participant_id: &ParticipantId) -> Result<Option<AgentAccount>>;
    async fn accounts(&self) -> Result<Vec<AgentAccount>>;
}

#[async_trait]
pub trait CounterStore: Send + Sync {
    async fn counter(&self, key: &CounterKey) -> Result<Decimal>;
}

#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn append_audit(&self, entry: AuditLogEntry) -> Result<()>;
    async fn audit_history(&self, payment_id: &PaymentId) -> Result<Vec<AuditLogEntry>>;
}

#[async_trait]
pub trait RetryStore: Send + Sync {
    async fn enqueue_retry(&self, item: RetryItem) -> Result<()>;
    async fn pending_retries(&self, limit: usize) -> Result<Vec<RetryItem>>;
    async fn remove_retry(&self, id: &RetryId) -> Result<()>;
    async fn record_retry_failure(
        &self,
        id: &RetryId,
        reason: &str,
        at: DateTime<Utc>,
    ) -> Result<()>;
}

#[async_trait]
pub trait UnitOfWork: Send + Sync {
    /// Applies a single write with per-document atomicity.
    async fn apply(&self, write: Write) -> Result<WriteOutcome>;

    /// Applies all writes or none. Stores without multi-document transactions keep the default.
    async fn apply_atomic(&self, writes: Vec<Write>) -> Result<Vec<WriteOutcome>> {
        let _ = writes;
        Err(PaymentError::TransactionsUnsupported)
    }
}

/// Everything the engine needs from persistence.
pub trait Store:
    PaymentStore + AccountStore + CounterStore + AuditStore + RetryStore + UnitOfWork
{
}

impl<T> Store for T where
    T: PaymentStore + AccountStore + CounterStore + AuditStore + RetryStore + UnitOfWork
{
}

pub type StoreRef = Arc<dyn Store>;
pub type DirectoryRef = Arc<dyn Directory>;
pub type EventSinkRef = Arc<dyn EventSink>;
