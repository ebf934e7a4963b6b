//! Domain model: payments, commission breakdowns, ledgers, audit records, events and the
//! ports the application layer depends on.

pub mod audit;
pub mod commission;
pub mod events;
pub mod ids;
pub mod ledger;
pub mod money;
pub mod payment;
pub mod ports;
