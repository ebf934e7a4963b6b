use crate::domain::commission::RelationshipType;
use crate::domain::payment::PaymentStatus;
use crate::error::{PaymentError, Result};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::io::Read;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandKind {
    /// Record a payment. Without a property it is captured as provisional.
    Payment,
    /// Link a provisional payment to `property`/`tenant`.
    Finalize,
    /// Mark a draft completed, posting it.
    Complete,
    Reverse,
    Void,
    Payout,
    Penalty,
    Reconcile,
}

/// One row of a command file.
///
/// `key` names the payment across rows (it doubles as the idempotency key); for payouts and
/// penalties it is the ledger reference.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CommandRecord {
    pub op: CommandKind,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub agent: Option<String>,
    #[serde(default)]
    pub property: Option<String>,
    #[serde(default)]
    pub tenant: Option<String>,
    #[serde(default)]
    pub amount: Option<Decimal>,
    #[serde(default)]
    pub deposit: Option<Decimal>,
    #[serde(default)]
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub months: Option<u32>,
    #[serde(default)]
    pub relationship: Option<RelationshipType>,
    #[serde(default)]
    pub status: Option<PaymentStatus>,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Reads payment commands from a CSV source.
///
/// Whitespace is trimmed and records may omit trailing columns.
pub struct CommandReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> CommandReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Lazily deserializes commands; a malformed row yields an error without ending the stream.
    pub fn commands(self) -> impl Iterator<Item = Result<CommandRecord>> {
        self.reader
            .into_deserialize()
            .map(|result| result.map_err(PaymentError::from))
    }
}
