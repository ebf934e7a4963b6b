//! Application layer orchestrating the payment lifecycle.
//!
//! [`lifecycle::PaymentLifecycleManager`] is the entry point for every payment mutation. It
//! delegates ledger postings to [`ledger::LedgerPoster`], history to [`audit::AuditTrail`] and
//! downstream notification to [`events::EventPropagator`]. Multi-document writes go through
//! [`atomic::commit`], which owns the transaction-capability fallback.

pub mod atomic;
pub mod audit;
pub mod events;
pub mod ledger;
pub mod lifecycle;
pub mod validation;
