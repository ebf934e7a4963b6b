use crate::domain::ports::{Store, Write, WriteOutcome};
use crate::error::{PaymentError, Result};
use tracing::{error, warn};

/// How a unit of writes reached the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitMode {
    /// All writes applied in one multi-document transaction.
    Atomic,
    /// The store lacks transactions; writes were applied one by one.
    Sequential,
}

#[derive(Debug)]
pub struct Committed {
    pub mode: CommitMode,
    pub outcomes: Vec<WriteOutcome>,
}

/// Commits `writes` as one logical unit.
///
/// Tries the store's multi-document transaction first. On `TransactionsUnsupported` the same
/// writes are replayed sequentially, in order, and the fallback is logged. Any other error
/// propagates unchanged. A sequential replay that fails part-way is logged as an error with the
/// number of writes already applied.
pub async fn commit(store: &dyn Store, writes: Vec<Write>, operation: &'static str) -> Result<Committed> {
    match store.apply_atomic(writes.clone()).await {
        Ok(outcomes) => Ok(Committed {
            mode: CommitMode::Atomic,
            outcomes,
        }),
        Err(PaymentError::TransactionsUnsupported) => {
            warn!(
                operation,
                writes = writes.len(),
                "multi-document transactions unsupported, falling back to sequential writes"
            );
            let mut outcomes = Vec::with_capacity(writes.len());
            for (applied, write) in writes.into_iter().enumerate() {
                match store.apply(write).await {
                    Ok(outcome) => outcomes.push(outcome),
                    Err(err) => {
                        if applied > 0 {
                            error!(
                                operation,
                                applied,
                                error = %err,
                                "sequential commit failed part-way; earlier writes remain applied"
                            );
                        }
                        return Err(err);
                    }
                }
            }
            Ok(Committed {
                mode: CommitMode::Sequential,
                outcomes,
            })
        }
        Err(err) => Err(err),
    }
}
