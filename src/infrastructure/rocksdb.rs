use crate::domain::audit::AuditLogEntry;
use crate::domain::events::{EventKind, RetryItem};
use crate::domain::ids::{CompanyId, ParticipantId, PaymentId, PropertyId, RetryId, TenantId};
use crate::domain::ledger::{AgentAccount, normalize_reference};
use crate::domain::payment::{Payment, PostingStatus};
use crate::domain::ports::{
    AccountStore, AuditStore, CounterKey, CounterStore, PaymentStore, RetryStore, UnitOfWork,
    Write, WriteOutcome,
};
use crate::error::{ConflictReason, PaymentError, Result, UniqueKey};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, IteratorMode, Options, WriteBatch};
use rust_decimal::Decimal;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Column Family for payment documents, keyed by payment id.
pub const CF_PAYMENTS: &str = "payments";
/// Unique index of (company, idempotency key) to payment id.
pub const CF_IDEMPOTENCY: &str = "idempotency";
/// Unique index of original payment id to its reversal entry.
pub const CF_REVERSALS: &str = "reversals";
/// Column Family for participant ledger documents.
pub const CF_ACCOUNTS: &str = "accounts";
pub const CF_COUNTERS: &str = "counters";
pub const CF_AUDIT: &str = "audit";
pub const CF_RETRIES: &str = "retries";

const COLUMN_FAMILIES: [&str; 7] = [
    CF_PAYMENTS,
    CF_IDEMPOTENCY,
    CF_REVERSALS,
    CF_ACCOUNTS,
    CF_COUNTERS,
    CF_AUDIT,
    CF_RETRIES,
];

/// A persistent store implementation using RocksDB.
///
/// Each document (payment, ledger, counter) is written with single-key atomicity; index entries
/// travel in the same `WriteBatch` as their payment. Read-modify-write updates are serialized by
/// an async mutex. There are no multi-document transactions, so `apply_atomic` keeps the trait
/// default and callers fall back to sequential writes.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<DB>,
    write_lock: Arc<Mutex<()>>,
}

impl RocksDBStore {
    /// Opens or creates a RocksDB instance at the specified path, creating missing column
    /// families.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let descriptors = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()));
        let db = DB::open_cf_descriptors(&opts, path, descriptors)?;

        Ok(Self {
            db: Arc::new(db),
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| PaymentError::internal(format!("{name} column family not found")))
    }

    fn get_json<T: DeserializeOwned>(&self, cf_name: &str, key: &str) -> Result<Option<T>> {
        let cf = self.cf(cf_name)?;
        match self.db.get_pinned_cf(&cf, key.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn put_json<T: Serialize>(&self, cf_name: &str, key: &str, value: &T) -> Result<()> {
        let cf = self.cf(cf_name)?;
        self.db.put_cf(&cf, key.as_bytes(), serde_json::to_vec(value)?)?;
        Ok(())
    }

    fn exists(&self, cf_name: &str, key: &str) -> Result<bool> {
        let cf = self.cf(cf_name)?;
        Ok(self.db.get_pinned_cf(&cf, key.as_bytes())?.is_some())
    }

    fn scan<T: DeserializeOwned>(&self, cf_name: &str) -> Result<Vec<T>> {
        let cf = self.cf(cf_name)?;
        let mut values = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_key, value) = item?;
            values.push(serde_json::from_slice(&value)?);
        }
        Ok(values)
    }

    fn apply_locked(&self, write: Write) -> Result<WriteOutcome> {
        match write {
            Write::InsertPayment(payment) => {
                self.insert_payment(&payment)?;
                Ok(WriteOutcome::Done)
            }
            Write::TransitionPayment {
                mut payment,
                expected,
            } => {
                let current: Payment = self
                    .get_json(CF_PAYMENTS, payment.id.as_str())?
                    .ok_or_else(|| PaymentError::NotFound(format!("payment {}", payment.id)))?;
                if current.posting_status != expected {
                    return Err(ConflictReason::StaleState.into());
                }
                payment.confirmed_emitted_at = current.confirmed_emitted_at;
                payment.reversed_emitted_at = current.reversed_emitted_at;
                self.put_json(CF_PAYMENTS, payment.id.as_str(), &payment)?;
                Ok(WriteOutcome::Done)
            }
            Write::Ledger { participant_id, op } => {
                let mut account: AgentAccount = self
                    .get_json(CF_ACCOUNTS, participant_id.as_str())?
                    .unwrap_or_else(|| AgentAccount::new(participant_id.clone()));
                let outcome = account.apply(op)?;
                self.put_json(CF_ACCOUNTS, participant_id.as_str(), &account)?;
                Ok(WriteOutcome::Ledger(outcome))
            }
            Write::Counter { key, delta } => {
                let storage_key = key.storage_key();
                let current: Decimal = self.get_json(CF_COUNTERS, &storage_key)?.unwrap_or_default();
                self.put_json(CF_COUNTERS, &storage_key, &(current + delta))?;
                Ok(WriteOutcome::Done)
            }
        }
    }

    fn insert_payment(&self, payment: &Payment) -> Result<()> {
        if self.exists(CF_PAYMENTS, payment.id.as_str())? {
            return Err(PaymentError::DuplicateKey(UniqueKey::PaymentId(
                payment.id.clone(),
            )));
        }
        let idempotency_key = payment
            .idempotency_key
            .as_deref()
            .map(|key| idempotency_key(&payment.company_id, key));
        if let Some(slot) = &idempotency_key
            && self.exists(CF_IDEMPOTENCY, slot)?
        {
            return Err(PaymentError::DuplicateKey(UniqueKey::Idempotency {
                company: payment.company_id.clone(),
                key: payment.idempotency_key.clone().unwrap_or_default(),
            }));
        }
        if let Some(original) = &payment.reversal_of_payment_id
            && self.exists(CF_REVERSALS, original.as_str())?
        {
            return Err(PaymentError::DuplicateKey(UniqueKey::ReversalOf(
                original.clone(),
            )));
        }

        let mut batch = WriteBatch::default();
        batch.put_cf(
            self.cf(CF_PAYMENTS)?,
            payment.id.as_str(),
            serde_json::to_vec(payment)?,
        );
        if let Some(slot) = &idempotency_key {
            batch.put_cf(self.cf(CF_IDEMPOTENCY)?, slot, payment.id.as_str());
        }
        if let Some(original) = &payment.reversal_of_payment_id {
            batch.put_cf(
                self.cf(CF_REVERSALS)?,
                original.as_str(),
                payment.id.as_str(),
            );
        }
        self.db.write(batch)?;
        Ok(())
    }
}

fn idempotency_key(company_id: &CompanyId, key: &str) -> String {
    format!("{company_id}\u{1f}{key}")
}

#[async_trait]
impl UnitOfWork for RocksDBStore {
    async fn apply(&self, write: Write) -> Result<WriteOutcome> {
        let _guard = self.write_lock.lock().await;
        self.apply_locked(write)
    }
}

#[async_trait]
impl PaymentStore for RocksDBStore {
    async fn payment(&self, id: &PaymentId) -> Result<Option<Payment>> {
        self.get_json(CF_PAYMENTS, id.as_str())
    }

    async fn payment_by_idempotency_key(
        &self,
        company_id: &CompanyId,
        key: &str,
    ) -> Result<Option<Payment>> {
        let cf = self.cf(CF_IDEMPOTENCY)?;
        match self
            .db
            .get_pinned_cf(&cf, idempotency_key(company_id, key).as_bytes())?
        {
            Some(id) => {
                let id = String::from_utf8_lossy(&id).into_owned();
                self.get_json(CF_PAYMENTS, &id)
            }
            None => Ok(None),
        }
    }

    async fn payments_for_pair(
        &self,
        company_id: &CompanyId,
        property_id: &PropertyId,
        tenant_id: &TenantId,
    ) -> Result<Vec<Payment>> {
        let mut payments: Vec<Payment> = self
            .scan::<Payment>(CF_PAYMENTS)?
            .into_iter()
            .filter(|p| {
                &p.company_id == company_id
                    && p.linkage.property_id() == Some(property_id)
                    && p.linkage.tenant_id() == Some(tenant_id)
            })
            .collect();
        payments.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(payments)
    }

    async fn payments_by_reference(&self, reference: &str) -> Result<Vec<Payment>> {
        let wanted = normalize_reference(reference);
        Ok(self
            .scan::<Payment>(CF_PAYMENTS)?
            .into_iter()
            .filter(|p| {
                matches!(
                    p.posting_status,
                    PostingStatus::Posted | PostingStatus::Reversed
                ) && !p.is_reversal_entry()
                    && (normalize_reference(&p.reference) == wanted
                        || normalize_reference(p.id.as_str()) == wanted)
            })
            .collect())
    }

    async fn remove_payment(&self, id: &PaymentId) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let Some(payment) = self.get_json::<Payment>(CF_PAYMENTS, id.as_str())? else {
            return Ok(());
        };
        let mut batch = WriteBatch::default();
        batch.delete_cf(self.cf(CF_PAYMENTS)?, id.as_str());
        if let Some(key) = &payment.idempotency_key {
            batch.delete_cf(
                self.cf(CF_IDEMPOTENCY)?,
                idempotency_key(&payment.company_id, key),
            );
        }
        if let Some(original) = &payment.reversal_of_payment_id {
            batch.delete_cf(self.cf(CF_REVERSALS)?, original.as_str());
        }
        self.db.write(batch)?;
        Ok(())
    }

    async fn mark_event_emitted(
        &self,
        id: &PaymentId,
        kind: EventKind,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let mut payment: Payment = self
            .get_json(CF_PAYMENTS, id.as_str())?
            .ok_or_else(|| PaymentError::NotFound(format!("payment {id}")))?;
        let marker = match kind {
            EventKind::Confirmed => &mut payment.confirmed_emitted_at,
            EventKind::Reversed => &mut payment.reversed_emitted_at,
        };
        if marker.is_some() {
            return Ok(false);
        }
        *marker = Some(at);
        self.put_json(CF_PAYMENTS, id.as_str(), &payment)?;
        Ok(true)
    }
}

#[async_trait]
impl AccountStore for RocksDBStore {
    async fn account(&self, participant_id: &ParticipantId) -> Result<Option<AgentAccount>> {
        self.get_json(CF_ACCOUNTS, participant_id.as_str())
    }

    async fn accounts(&self) -> Result<Vec<AgentAccount>> {
        self.scan(CF_ACCOUNTS)
    }
}

#[async_trait]
impl CounterStore for RocksDBStore {
    async fn counter(&self, key: &CounterKey) -> Result<Decimal> {
        Ok(self
            .get_json(CF_COUNTERS, &key.storage_key())?
            .unwrap_or_default())
    }
}

#[async_trait]
impl AuditStore for RocksDBStore {
    async fn append_audit(&self, entry: AuditLogEntry) -> Result<()> {
        // Key sorts by payment, then time, so a scan returns each history in order.
        let key = format!(
            "{}\u{1f}{:020}\u{1f}{}",
            entry.payment_id,
            entry.recorded_at.timestamp_nanos_opt().unwrap_or_default(),
            entry.id
        );
        self.put_json(CF_AUDIT, &key, &entry)
    }

    async fn audit_history(&self, payment_id: &PaymentId) -> Result<Vec<AuditLogEntry>> {
        Ok(self
            .scan::<AuditLogEntry>(CF_AUDIT)?
            .into_iter()
            .filter(|e| &e.payment_id == payment_id)
            .collect())
    }
}

#[async_trait]
impl RetryStore for RocksDBStore {
    async fn enqueue_retry(&self, item: RetryItem) -> Result<()> {
        self.put_json(CF_RETRIES, item.id.as_str(), &item)
    }

    async fn pending_retries(&self, limit: usize) -> Result<Vec<RetryItem>> {
        let mut items: Vec<RetryItem> = self.scan(CF_RETRIES)?;
        items.sort_by(|a, b| a.enqueued_at.cmp(&b.enqueued_at));
        items.truncate(limit);
        Ok(items)
    }

    async fn remove_retry(&self, id: &RetryId) -> Result<()> {
        let cf = self.cf(CF_RETRIES)?;
        self.db.delete_cf(&cf, id.as_str())?;
        Ok(())
    }

    async fn record_retry_failure(
        &self,
        id: &RetryId,
        reason: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut item: RetryItem = self
            .get_json(CF_RETRIES, id.as_str())?
            .ok_or_else(|| PaymentError::NotFound(format!("retry item {id}")))?;
        item.attempts += 1;
        item.reason = reason.to_string();
        item.last_attempt_at = Some(at);
        self.put_json(CF_RETRIES, id.as_str(), &item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ledger::{CommissionPosting, LedgerOp};
    use rust_decimal_macros::dec;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_rocksdb_open_cf() {
        let dir = tempdir().unwrap();
        let store = RocksDBStore::open(dir.path()).expect("Failed to open RocksDB");

        for name in COLUMN_FAMILIES {
            assert!(store.db.cf_handle(name).is_some(), "missing {name}");
        }
    }

    #[tokio::test]
    async fn test_rocksdb_has_no_multi_document_transactions() {
        let dir = tempdir().unwrap();
        let store = RocksDBStore::open(dir.path()).unwrap();
        assert!(matches!(
            store.apply_atomic(Vec::new()).await,
            Err(PaymentError::TransactionsUnsupported)
        ));
    }

    #[tokio::test]
    async fn test_rocksdb_ledger_and_counter_survive_reopen() {
        let dir = tempdir().unwrap();
        let agent = ParticipantId::new("agent-1");
        let revenue = CounterKey::CompanyRevenue(CompanyId::new("co-1"));
        {
            let store = RocksDBStore::open(dir.path()).unwrap();
            let posting = CommissionPosting::for_payment(
                &PaymentId::new("p-1"),
                None,
                dec!(58.2),
                Utc::now(),
                "rent",
            );
            store
                .apply(Write::Ledger {
                    participant_id: agent.clone(),
                    op: LedgerOp::Commission(posting.clone()),
                })
                .await
                .unwrap();
            let duplicate = store
                .apply(Write::Ledger {
                    participant_id: agent.clone(),
                    op: LedgerOp::Commission(posting),
                })
                .await
                .unwrap();
            assert_eq!(
                duplicate,
                WriteOutcome::Ledger(crate::domain::ledger::PostOutcome::Duplicate)
            );
            store
                .apply(Write::Counter {
                    key: revenue.clone(),
                    delta: dec!(38.8),
                })
                .await
                .unwrap();
        }

        let store = RocksDBStore::open(dir.path()).unwrap();
        let account = store.account(&agent).await.unwrap().unwrap();
        assert_eq!(account.entries.len(), 1);
        assert_eq!(account.running_balance.value(), dec!(58.2));
        assert_eq!(store.counter(&revenue).await.unwrap(), dec!(38.8));
    }
}
