use crate::domain::ids::{ParticipantId, PaymentId, PayoutId};
use crate::domain::ledger::{
    AdjustmentPosting, AgentAccount, AgentPayout, CommissionPosting, LedgerEntry, LedgerOp,
    PayoutRequest, PayoutStatus, PenaltyPosting, PostOutcome, ReconcileReport,
};
use crate::domain::money::Balance;
use crate::domain::payment::Payment;
use crate::domain::ports::{CounterKey, StoreRef, Write, WriteOutcome};
use crate::error::{PaymentError, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, error, info};

/// Read model of a participant's ledger.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentStatement {
    pub participant_id: ParticipantId,
    pub entries: Vec<LedgerEntry>,
    pub payouts: Vec<AgentPayout>,
    pub total_commissions: Balance,
    pub total_payouts: Balance,
    pub total_penalties: Balance,
    pub total_adjustments: Balance,
    pub running_balance: Balance,
}

impl From<AgentAccount> for AgentStatement {
    fn from(account: AgentAccount) -> Self {
        Self {
            participant_id: account.participant_id,
            entries: account.entries,
            payouts: account.payouts,
            total_commissions: account.total_commissions,
            total_payouts: account.total_payouts,
            total_penalties: account.total_penalties,
            total_adjustments: account.total_adjustments,
            running_balance: account.running_balance,
        }
    }
}

/// Posts commissions, penalties and payouts to participant ledgers.
///
/// Every mutation is a single [`Write::Ledger`] applied atomically by the store against one
/// ledger document. Duplicate postings are detected inside that write, so retries are safe.
pub struct LedgerPoster {
    store: StoreRef,
    read_timeout: Duration,
}

impl LedgerPoster {
    pub fn new(store: StoreRef, read_timeout: Duration) -> Self {
        Self {
            store,
            read_timeout,
        }
    }

    pub async fn add_commission(
        &self,
        participant_id: &ParticipantId,
        posting: CommissionPosting,
    ) -> Result<PostOutcome> {
        self.post(participant_id, LedgerOp::Commission(posting)).await
    }

    pub async fn add_penalty(
        &self,
        participant_id: &ParticipantId,
        posting: PenaltyPosting,
    ) -> Result<PostOutcome> {
        self.post(participant_id, LedgerOp::Penalty(posting)).await
    }

    pub async fn add_adjustment(
        &self,
        participant_id: &ParticipantId,
        posting: AdjustmentPosting,
    ) -> Result<PostOutcome> {
        self.post(participant_id, LedgerOp::Adjustment(posting)).await
    }

    /// Records a withdrawal. A repeated reference returns the payout already on file.
    pub async fn record_payout(
        &self,
        participant_id: &ParticipantId,
        request: PayoutRequest,
    ) -> Result<AgentPayout> {
        let reference = request.reference.clone();
        match self.post(participant_id, LedgerOp::Payout(request)).await? {
            PostOutcome::Payout(payout) => {
                info!(
                    participant_id = %participant_id,
                    payout_id = %payout.id,
                    amount = %payout.amount,
                    "payout recorded"
                );
                Ok(payout)
            }
            PostOutcome::Duplicate => {
                let account = self.account(participant_id).await?;
                account
                    .payouts
                    .into_iter()
                    .find(|p| p.reference == reference)
                    .ok_or_else(|| PaymentError::internal("duplicate payout without a record"))
            }
            other => Err(PaymentError::internal(format!(
                "unexpected payout outcome {other:?}"
            ))),
        }
    }

    pub async fn update_payout_status(
        &self,
        participant_id: &ParticipantId,
        payout_id: &PayoutId,
        status: PayoutStatus,
    ) -> Result<()> {
        self.post(
            participant_id,
            LedgerOp::PayoutStatus {
                payout_id: payout_id.clone(),
                status,
            },
        )
        .await?;
        info!(participant_id = %participant_id, payout_id = %payout_id, status = ?status, "payout status updated");
        Ok(())
    }

    /// Offsets a payment's commission entries on one ledger. Returns the number of entries posted.
    pub async fn reverse_payment(
        &self,
        participant_id: &ParticipantId,
        original: &PaymentId,
        reversal: &PaymentId,
        date: DateTime<Utc>,
    ) -> Result<usize> {
        let op = LedgerOp::ReversePayment {
            original: original.clone(),
            reversal: reversal.clone(),
            date,
        };
        match self.post(participant_id, op).await? {
            PostOutcome::Reversed(count) => Ok(count),
            other => Err(PaymentError::internal(format!(
                "unexpected reversal outcome {other:?}"
            ))),
        }
    }

    /// Removes duplicate legacy commission entries from one ledger.
    ///
    /// References of entries that predate payment ids are resolved against the payment store
    /// first; a reference is backfilled only when it matches exactly one payment.
    pub async fn reconcile(&self, participant_id: &ParticipantId) -> Result<ReconcileReport> {
        let account = self.account(participant_id).await?;
        let mut backfill = HashMap::new();
        for reference in account.legacy_references() {
            let matches = self.store.payments_by_reference(&reference).await?;
            if let [payment] = matches.as_slice() {
                backfill.insert(reference, payment.id.clone());
            } else if matches.len() > 1 {
                debug!(reference = %reference, matches = matches.len(), "ambiguous legacy reference left unbacked");
            }
        }

        match self.post(participant_id, LedgerOp::Reconcile { backfill }).await? {
            PostOutcome::Reconciled(report) => {
                info!(
                    participant_id = %participant_id,
                    backfilled = report.backfilled,
                    removed = report.removed.len(),
                    "ledger reconciled"
                );
                Ok(report)
            }
            other => Err(PaymentError::internal(format!(
                "unexpected reconcile outcome {other:?}"
            ))),
        }
    }

    /// Reconciles every ledger in the store.
    pub async fn reconcile_all(&self) -> Result<Vec<(ParticipantId, ReconcileReport)>> {
        let accounts = self.bounded(self.store.accounts()).await?;
        let mut reports = Vec::with_capacity(accounts.len());
        for account in accounts {
            let report = self.reconcile(&account.participant_id).await?;
            reports.push((account.participant_id, report));
        }
        Ok(reports)
    }

    /// Full ledger view. Participants without postings get an empty statement.
    pub async fn statement(&self, participant_id: &ParticipantId) -> Result<AgentStatement> {
        Ok(self.account(participant_id).await?.into())
    }

    pub async fn balance(&self, participant_id: &ParticipantId) -> Result<Balance> {
        Ok(self.account(participant_id).await?.running_balance)
    }

    pub async fn statements(&self) -> Result<Vec<AgentStatement>> {
        let mut accounts = self.bounded(self.store.accounts()).await?;
        accounts.sort_by(|a, b| a.participant_id.cmp(&b.participant_id));
        Ok(accounts.into_iter().map(AgentStatement::from).collect())
    }

    pub async fn counter(&self, key: &CounterKey) -> Result<Decimal> {
        self.bounded(self.store.counter(key)).await
    }

    async fn account(&self, participant_id: &ParticipantId) -> Result<AgentAccount> {
        Ok(self
            .bounded(self.store.account(participant_id))
            .await?
            .unwrap_or_else(|| AgentAccount::new(participant_id.clone())))
    }

    async fn bounded<T>(&self, read: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::time::timeout(self.read_timeout, read)
            .await
            .map_err(|_| PaymentError::Timeout(self.read_timeout))?
    }

    async fn post(&self, participant_id: &ParticipantId, op: LedgerOp) -> Result<PostOutcome> {
        let write = Write::Ledger {
            participant_id: participant_id.clone(),
            op,
        };
        match self.store.apply(write).await? {
            WriteOutcome::Ledger(outcome) => Ok(outcome),
            WriteOutcome::Done => Err(PaymentError::internal("ledger write returned no outcome")),
        }
    }

    /// Ledger and counter writes implied by posting `payment`.
    ///
    /// Meant to be committed in the same unit as the payment's own state change.
    pub fn posting_writes(payment: &Payment) -> Vec<Write> {
        let date = day_start(payment.payment_date);
        let description = format!(
            "Commission on {} ({:?})",
            if payment.reference.is_empty() {
                payment.id.as_str()
            } else {
                payment.reference.as_str()
            },
            payment.relationship
        );

        let mut writes: Vec<Write> = payment
            .commission
            .agent_credits(&payment.participant_id)
            .into_iter()
            .map(|credit| Write::Ledger {
                participant_id: credit.participant_id,
                op: LedgerOp::Commission(CommissionPosting::for_payment(
                    &payment.id,
                    credit.role,
                    credit.amount,
                    date,
                    description.clone(),
                )),
            })
            .collect();
        writes.extend(Self::counter_writes(payment, Decimal::ONE));
        writes
    }

    fn counter_writes(payment: &Payment, sign: Decimal) -> Vec<Write> {
        let mut writes = Vec::new();
        let revenue = payment.commission.agency_share * sign;
        if !revenue.is_zero() {
            writes.push(Write::Counter {
                key: CounterKey::CompanyRevenue(payment.company_id.clone()),
                delta: revenue,
            });
        }
        if let Some(owner_id) = &payment.owner_id {
            let owed = payment.commission.owner_amount * sign;
            if !owed.is_zero() {
                writes.push(Write::Counter {
                    key: CounterKey::OwnerBalance(owner_id.clone()),
                    delta: owed,
                });
            }
        }
        writes
    }

    /// Applies the ledger side of a committed reversal.
    ///
    /// Runs after the payment records are committed. Failures are logged per ledger and do not
    /// undo the reversal; the returned count covers the entries that were posted.
    pub async fn propagate_reversal(&self, original: &Payment, reversal: &Payment) -> usize {
        let date = day_start(reversal.payment_date);
        let mut participants: Vec<ParticipantId> = original
            .commission
            .agent_credits(&original.participant_id)
            .into_iter()
            .map(|credit| credit.participant_id)
            .collect();
        participants.dedup();

        let mut posted = 0;
        for participant_id in participants {
            match self
                .reverse_payment(&participant_id, &original.id, &reversal.id, date)
                .await
            {
                Ok(count) => posted += count,
                Err(err) => error!(
                    participant_id = %participant_id,
                    payment_id = %original.id,
                    reversal_id = %reversal.id,
                    error = %err,
                    "ledger reversal failed after payment reversal was committed"
                ),
            }
        }

        for write in Self::counter_writes(original, Decimal::NEGATIVE_ONE) {
            if let Err(err) = self.store.apply(write).await {
                error!(payment_id = %original.id, error = %err, "counter reversal failed");
            }
        }
        posted
    }
}

fn day_start(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(chrono::NaiveTime::MIN).and_utc()
}
