use crate::domain::audit::AuditLogEntry;
use crate::domain::events::{DomainEvent, EventKind, RetryItem};
use crate::domain::ids::{CompanyId, ParticipantId, PaymentId, PropertyId, RetryId, TenantId};
use crate::domain::ledger::{AgentAccount, normalize_reference};
use crate::domain::payment::{Payment, PostingStatus};
use crate::domain::ports::{
    AccountStore, AuditStore, CompanyConfig, CounterKey, CounterStore, Directory, EventSink,
    PaymentStore, PropertyRecord, RetryStore, UnitOfWork, Write, WriteOutcome,
};
use crate::error::{ConflictReason, PaymentError, Result, UniqueKey};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, RwLock};

#[derive(Default, Clone)]
struct State {
    payments: HashMap<PaymentId, Payment>,
    idempotency: HashMap<(CompanyId, String), PaymentId>,
    reversals: HashMap<PaymentId, PaymentId>,
    accounts: HashMap<ParticipantId, AgentAccount>,
    counters: HashMap<CounterKey, Decimal>,
    audit: Vec<AuditLogEntry>,
    retries: Vec<RetryItem>,
}

impl State {
    fn apply(&mut self, write: Write) -> Result<WriteOutcome> {
        match write {
            Write::InsertPayment(payment) => {
                self.insert_payment(payment)?;
                Ok(WriteOutcome::Done)
            }
            Write::TransitionPayment { payment, expected } => {
                self.transition_payment(payment, expected)?;
                Ok(WriteOutcome::Done)
            }
            Write::Ledger { participant_id, op } => {
                let mut account = self
                    .accounts
                    .get(&participant_id)
                    .cloned()
                    .unwrap_or_else(|| AgentAccount::new(participant_id.clone()));
                let outcome = account.apply(op)?;
                self.accounts.insert(participant_id, account);
                Ok(WriteOutcome::Ledger(outcome))
            }
            Write::Counter { key, delta } => {
                *self.counters.entry(key).or_default() += delta;
                Ok(WriteOutcome::Done)
            }
        }
    }

    fn insert_payment(&mut self, payment: Payment) -> Result<()> {
        if self.payments.contains_key(&payment.id) {
            return Err(PaymentError::DuplicateKey(UniqueKey::PaymentId(
                payment.id.clone(),
            )));
        }
        let idempotency = payment
            .idempotency_key
            .as_ref()
            .map(|key| (payment.company_id.clone(), key.clone()));
        if let Some(slot) = &idempotency
            && self.idempotency.contains_key(slot)
        {
            return Err(PaymentError::DuplicateKey(UniqueKey::Idempotency {
                company: slot.0.clone(),
                key: slot.1.clone(),
            }));
        }
        if let Some(original) = &payment.reversal_of_payment_id
            && self.reversals.contains_key(original)
        {
            return Err(PaymentError::DuplicateKey(UniqueKey::ReversalOf(
                original.clone(),
            )));
        }

        if let Some(slot) = idempotency {
            self.idempotency.insert(slot, payment.id.clone());
        }
        if let Some(original) = &payment.reversal_of_payment_id {
            self.reversals.insert(original.clone(), payment.id.clone());
        }
        self.payments.insert(payment.id.clone(), payment);
        Ok(())
    }

    fn transition_payment(&mut self, mut payment: Payment, expected: PostingStatus) -> Result<()> {
        let current = self
            .payments
            .get(&payment.id)
            .ok_or_else(|| PaymentError::NotFound(format!("payment {}", payment.id)))?;
        if current.posting_status != expected {
            return Err(ConflictReason::StaleState.into());
        }
        // Emitted markers are only ever set through `mark_event_emitted`.
        payment.confirmed_emitted_at = current.confirmed_emitted_at;
        payment.reversed_emitted_at = current.reversed_emitted_at;
        self.payments.insert(payment.id.clone(), payment);
        Ok(())
    }

    fn remove_payment(&mut self, id: &PaymentId) {
        if let Some(payment) = self.payments.remove(id) {
            if let Some(key) = payment.idempotency_key {
                self.idempotency.remove(&(payment.company_id, key));
            }
            if let Some(original) = payment.reversal_of_payment_id {
                self.reversals.remove(&original);
            }
        }
    }
}

/// A thread-safe in-memory implementation of every storage port.
///
/// All collections live behind one `RwLock`, so a multi-document unit is applied against a
/// scratch copy and swapped in only when every write succeeded. Transaction support can be
/// switched off to exercise the sequential fallback.
#[derive(Clone)]
pub struct InMemoryStore {
    state: Arc<RwLock<State>>,
    transactions: bool,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    /// Creates an empty store with multi-document transactions.
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(State::default())),
            transactions: true,
        }
    }

    /// Creates an empty store that reports `TransactionsUnsupported`.
    pub fn without_transactions() -> Self {
        Self {
            transactions: false,
            ..Self::new()
        }
    }

    pub fn supports_transactions(&self) -> bool {
        self.transactions
    }
}

#[async_trait]
impl UnitOfWork for InMemoryStore {
    async fn apply(&self, write: Write) -> Result<WriteOutcome> {
        self.state.write().await.apply(write)
    }

    async fn apply_atomic(&self, writes: Vec<Write>) -> Result<Vec<WriteOutcome>> {
        if !self.transactions {
            return Err(PaymentError::TransactionsUnsupported);
        }
        let mut state = self.state.write().await;
        let mut scratch = state.clone();
        let outcomes = writes
            .into_iter()
            .map(|write| scratch.apply(write))
            .collect::<Result<Vec<_>>>()?;
        *state = scratch;
        Ok(outcomes)
    }
}

#[async_trait]
impl PaymentStore for InMemoryStore {
    async fn payment(&self, id: &PaymentId) -> Result<Option<Payment>> {
        Ok(self.state.read().await.payments.get(id).cloned())
    }

    async fn payment_by_idempotency_key(
        &self,
        company_id: &CompanyId,
        key: &str,
    ) -> Result<Option<Payment>> {
        let state = self.state.read().await;
        Ok(state
            .idempotency
            .get(&(company_id.clone(), key.to_string()))
            .and_then(|id| state.payments.get(id))
            .cloned())
    }

    async fn payments_for_pair(
        &self,
        company_id: &CompanyId,
        property_id: &PropertyId,
        tenant_id: &TenantId,
    ) -> Result<Vec<Payment>> {
        let state = self.state.read().await;
        let mut payments: Vec<Payment> = state
            .payments
            .values()
            .filter(|p| {
                &p.company_id == company_id
                    && p.linkage.property_id() == Some(property_id)
                    && p.linkage.tenant_id() == Some(tenant_id)
            })
            .cloned()
            .collect();
        payments.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(payments)
    }

    async fn payments_by_reference(&self, reference: &str) -> Result<Vec<Payment>> {
        let wanted = normalize_reference(reference);
        let state = self.state.read().await;
        Ok(state
            .payments
            .values()
            .filter(|p| {
                matches!(
                    p.posting_status,
                    PostingStatus::Posted | PostingStatus::Reversed
                ) && !p.is_reversal_entry()
                    && (normalize_reference(&p.reference) == wanted
                        || normalize_reference(p.id.as_str()) == wanted)
            })
            .cloned()
            .collect())
    }

    async fn remove_payment(&self, id: &PaymentId) -> Result<()> {
        self.state.write().await.remove_payment(id);
        Ok(())
    }

    async fn mark_event_emitted(
        &self,
        id: &PaymentId,
        kind: EventKind,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut state = self.state.write().await;
        let payment = state
            .payments
            .get_mut(id)
            .ok_or_else(|| PaymentError::NotFound(format!("payment {id}")))?;
        let marker = match kind {
            EventKind::Confirmed => &mut payment.confirmed_emitted_at,
            EventKind::Reversed => &mut payment.reversed_emitted_at,
        };
        if marker.is_some() {
            return Ok(false);
        }
        *marker = Some(at);
        Ok(true)
    }
}

#[async_trait]
impl AccountStore for InMemoryStore {
    async fn account(&self, participant_id: &ParticipantId) -> Result<Option<AgentAccount>> {
        Ok(self.state.read().await.accounts.get(participant_id).cloned())
    }

    async fn accounts(&self) -> Result<Vec<AgentAccount>> {
        let state = self.state.read().await;
        let mut accounts: Vec<AgentAccount> = state.accounts.values().cloned().collect();
        accounts.sort_by(|a, b| a.participant_id.cmp(&b.participant_id));
        Ok(accounts)
    }
}

#[async_trait]
impl CounterStore for InMemoryStore {
    async fn counter(&self, key: &CounterKey) -> Result<Decimal> {
        Ok(self
            .state
            .read()
            .await
            .counters
            .get(key)
            .copied()
            .unwrap_or_default())
    }
}

#[async_trait]
impl AuditStore for InMemoryStore {
    async fn append_audit(&self, entry: AuditLogEntry) -> Result<()> {
        self.state.write().await.audit.push(entry);
        Ok(())
    }

    async fn audit_history(&self, payment_id: &PaymentId) -> Result<Vec<AuditLogEntry>> {
        Ok(self
            .state
            .read()
            .await
            .audit
            .iter()
            .filter(|e| &e.payment_id == payment_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl RetryStore for InMemoryStore {
    async fn enqueue_retry(&self, item: RetryItem) -> Result<()> {
        self.state.write().await.retries.push(item);
        Ok(())
    }

    async fn pending_retries(&self, limit: usize) -> Result<Vec<RetryItem>> {
        let state = self.state.read().await;
        let mut items = state.retries.clone();
        items.sort_by(|a, b| a.enqueued_at.cmp(&b.enqueued_at));
        items.truncate(limit);
        Ok(items)
    }

    async fn remove_retry(&self, id: &RetryId) -> Result<()> {
        self.state.write().await.retries.retain(|item| &item.id != id);
        Ok(())
    }

    async fn record_retry_failure(
        &self,
        id: &RetryId,
        reason: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        let item = state
            .retries
            .iter_mut()
            .find(|item| &item.id == id)
            .ok_or_else(|| PaymentError::NotFound(format!("retry item {id}")))?;
        item.attempts += 1;
        item.reason = reason.to_string();
        item.last_attempt_at = Some(at);
        Ok(())
    }
}

/// Property, tenant and company lookups held in memory.
#[derive(Debug, Default, Clone)]
pub struct InMemoryDirectory {
    properties: HashMap<PropertyId, PropertyRecord>,
    tenants: HashSet<TenantId>,
    companies: HashMap<CompanyId, CompanyConfig>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_property(mut self, property: PropertyRecord) -> Self {
        self.properties.insert(property.id.clone(), property);
        self
    }

    pub fn with_tenant(mut self, tenant_id: TenantId) -> Self {
        self.tenants.insert(tenant_id);
        self
    }

    pub fn with_company(mut self, company_id: CompanyId, config: CompanyConfig) -> Self {
        self.companies.insert(company_id, config);
        self
    }

    pub fn len(&self) -> usize {
        self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }
}

#[async_trait]
impl Directory for InMemoryDirectory {
    async fn property(&self, id: &PropertyId) -> Result<Option<PropertyRecord>> {
        Ok(self.properties.get(id).cloned())
    }

    async fn tenant_exists(&self, id: &TenantId) -> Result<bool> {
        Ok(self.tenants.contains(id))
    }

    async fn company_config(&self, company_id: &CompanyId) -> Result<CompanyConfig> {
        self.companies
            .get(company_id)
            .cloned()
            .ok_or_else(|| PaymentError::NotFound(format!("company {company_id}")))
    }
}

/// Event sink that keeps delivered events in memory. Can be switched to fail every delivery.
#[derive(Debug, Default)]
pub struct RecordingSink {
    delivered: Mutex<Vec<DomainEvent>>,
    failing: AtomicBool,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        let sink = Self::default();
        sink.set_failing(true);
        sink
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub async fn delivered(&self) -> Vec<DomainEvent> {
        self.delivered.lock().await.clone()
    }
}

#[async_trait]
impl EventSink for RecordingSink {
    async fn deliver(&self, event: &DomainEvent) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(PaymentError::internal("event sink unavailable"));
        }
        self.delivered.lock().await.push(event.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::commission::{CommissionBreakdown, RelationshipType, VatOptions};
    use crate::domain::ledger::{CommissionPosting, LedgerOp};
    use crate::domain::payment::{Linkage, PaymentStatus};
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn payment(id: &str, key: Option<&str>) -> Payment {
        let now = Utc::now();
        Payment {
            id: PaymentId::new(id),
            company_id: CompanyId::new("co-1"),
            relationship: RelationshipType::Management,
            status: PaymentStatus::Completed,
            posting_status: PostingStatus::Posted,
            amount: dec!(100),
            deposit_amount: Decimal::ZERO,
            currency: "USD".to_string(),
            payment_date: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            participant_id: ParticipantId::new("agent-1"),
            linkage: Linkage::Linked {
                property_id: PropertyId::new("prop-1"),
                tenant_id: TenantId::new("tenant-1"),
            },
            owner_id: None,
            rental_period: None,
            advance_months: 1,
            reference: format!("RCPT {id}"),
            vat: VatOptions::default(),
            commission: CommissionBreakdown::zero(dec!(100)),
            commission_finalized: true,
            in_suspense: false,
            idempotency_key: key.map(str::to_string),
            reversal_of_payment_id: None,
            reversal_payment_id: None,
            corrected_payment_id: None,
            reversed_at: None,
            reversed_by: None,
            reversal_reason: None,
            confirmed_emitted_at: None,
            reversed_emitted_at: None,
            created_by: ParticipantId::new("user-1"),
            created_at: now,
            updated_at: now,
            notes: None,
        }
    }

    #[tokio::test]
    async fn test_idempotency_key_is_unique_per_company() {
        let store = InMemoryStore::new();
        store
            .apply(Write::InsertPayment(payment("p-1", Some("k-1"))))
            .await
            .unwrap();
        let err = store
            .apply(Write::InsertPayment(payment("p-2", Some("k-1"))))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PaymentError::DuplicateKey(UniqueKey::Idempotency { .. })
        ));

        let mut other_company = payment("p-3", Some("k-1"));
        other_company.company_id = CompanyId::new("co-2");
        store
            .apply(Write::InsertPayment(other_company))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_atomic_unit_rolls_back_on_failure() {
        let store = InMemoryStore::new();
        let agent = ParticipantId::new("agent-1");
        let writes = vec![
            Write::InsertPayment(payment("p-1", None)),
            Write::Ledger {
                participant_id: agent.clone(),
                op: LedgerOp::Commission(CommissionPosting::for_payment(
                    &PaymentId::new("p-1"),
                    None,
                    dec!(10),
                    Utc::now(),
                    "rent",
                )),
            },
            Write::TransitionPayment {
                payment: payment("missing", None),
                expected: PostingStatus::Posted,
            },
        ];
        assert!(store.apply_atomic(writes).await.is_err());
        assert!(store.payment(&PaymentId::new("p-1")).await.unwrap().is_none());
        assert!(store.account(&agent).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_transition_requires_expected_status() {
        let store = InMemoryStore::new();
        store
            .apply(Write::InsertPayment(payment("p-1", None)))
            .await
            .unwrap();
        let err = store
            .apply(Write::TransitionPayment {
                payment: payment("p-1", None),
                expected: PostingStatus::Draft,
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PaymentError::Conflict(ConflictReason::StaleState)
        ));
    }

    #[tokio::test]
    async fn test_emitted_marker_is_set_once() {
        let store = InMemoryStore::new();
        let id = PaymentId::new("p-1");
        store
            .apply(Write::InsertPayment(payment("p-1", None)))
            .await
            .unwrap();
        assert!(store.mark_event_emitted(&id, EventKind::Confirmed, Utc::now()).await.unwrap());
        assert!(!store.mark_event_emitted(&id, EventKind::Confirmed, Utc::now()).await.unwrap());
        assert!(store.mark_event_emitted(&id, EventKind::Reversed, Utc::now()).await.unwrap());
    }

    #[tokio::test]
    async fn test_reference_lookup_is_normalized() {
        let store = InMemoryStore::new();
        store
            .apply(Write::InsertPayment(payment("p-1", None)))
            .await
            .unwrap();
        let found = store.payments_by_reference("rcpt   P-1").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(store.payments_by_reference("P-1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_without_transactions_reports_unsupported() {
        let store = InMemoryStore::without_transactions();
        assert!(!store.supports_transactions());
        assert!(matches!(
            store.apply_atomic(Vec::new()).await,
            Err(PaymentError::TransactionsUnsupported)
        ));
    }
}
