use crate::domain::ids::{CompanyId, PaymentId};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::time::Duration;
use thiserror::Error;

/// Client-side validation failures. Each variant maps to a stable machine-readable code.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
    #[error("invalid identifier for `{0}`")]
    InvalidId(&'static str),
    #[error("amount must be positive")]
    NonPositiveAmount,
    #[error("rental period month must be between 1 and 12, got {0}")]
    InvalidRentalPeriod(u32),
    #[error("advance months must be at least 1")]
    InvalidAdvanceMonths,
    #[error("amount {actual} must equal rent × months ({expected})")]
    AdvanceAmountMismatch { expected: Decimal, actual: Decimal },
    #[error("advance period overlaps an existing payment for this tenant and property")]
    OverlappingAdvancePeriod,
    #[error("amount {requested} exceeds remaining balance {remaining} for the rental period")]
    ExceedsRemainingBalance {
        requested: Decimal,
        remaining: Decimal,
    },
    #[error("a reason is required")]
    MissingReason,
    #[error("property {0} does not exist")]
    UnknownProperty(String),
    #[error("tenant {0} does not exist")]
    UnknownTenant(String),
}

impl ValidationError {
    pub fn code(&self) -> &'static str {
        match self {
            ValidationError::MissingField(_) => "missing_field",
            ValidationError::InvalidId(_) => "invalid_id",
            ValidationError::NonPositiveAmount => "non_positive_amount",
            ValidationError::InvalidRentalPeriod(_) => "invalid_rental_period",
            ValidationError::InvalidAdvanceMonths => "invalid_advance_months",
            ValidationError::AdvanceAmountMismatch { .. } => "advance_amount_mismatch",
            ValidationError::OverlappingAdvancePeriod => "overlapping_advance_period",
            ValidationError::ExceedsRemainingBalance { .. } => "exceeds_remaining_balance",
            ValidationError::MissingReason => "missing_reason",
            ValidationError::UnknownProperty(_) => "unknown_property",
            ValidationError::UnknownTenant(_) => "unknown_tenant",
        }
    }
}

/// State conflicts: the request is well-formed but the payment is in the wrong state for it.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConflictReason {
    #[error("posted payments cannot be edited; reverse the payment instead")]
    PostedPaymentImmutable,
    #[error("only posted payments can be reversed")]
    NotPosted,
    #[error("payment has already been reversed")]
    AlreadyReversed,
    #[error("reversal entries cannot be reversed")]
    ReversalEntry,
    #[error("accounting period is locked through {0}")]
    PeriodLocked(NaiveDate),
    #[error("payment is not provisional")]
    NotProvisional,
    #[error("only draft payments allow this operation")]
    NotDraft,
    #[error("payment changed concurrently; reload and retry")]
    StaleState,
    #[error("payout is already failed or cancelled")]
    PayoutClosed,
}

/// Store-level unique constraints.
#[derive(Debug, Clone, PartialEq)]
pub enum UniqueKey {
    Idempotency { company: CompanyId, key: String },
    ReversalOf(PaymentId),
    PaymentId(PaymentId),
}

impl std::fmt::Display for UniqueKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UniqueKey::Idempotency { company, key } => {
                write!(f, "idempotency key {key} for company {company}")
            }
            UniqueKey::ReversalOf(id) => write!(f, "reversal of payment {id}"),
            UniqueKey::PaymentId(id) => write!(f, "payment id {id}"),
        }
    }
}

#[derive(Error, Debug)]
pub enum PaymentError {
    #[error("Validation error: {0}")]
    ValidationError(#[from] ValidationError),
    #[error("Conflict: {0}")]
    Conflict(#[from] ConflictReason),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error("Duplicate key: {0}")]
    DuplicateKey(UniqueKey),
    #[error("Insufficient balance: requested {requested}, available {available}")]
    InsufficientBalance {
        requested: Decimal,
        available: Decimal,
    },
    #[error("Multi-document transactions are not supported by this store")]
    TransactionsUnsupported,
    #[error("Read exceeded maximum execution time of {0:?}")]
    Timeout(Duration),
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[cfg(feature = "storage-rocksdb")]
    #[error("Storage error: {0}")]
    StorageError(#[from] rocksdb::Error),
    #[error("Internal error: {0}")]
    InternalError(Box<dyn std::error::Error + Send + Sync>),
}

impl PaymentError {
    pub fn internal(message: impl Into<String>) -> Self {
        PaymentError::InternalError(Box::new(std::io::Error::other(message.into())))
    }
}

impl From<serde_json::Error> for PaymentError {
    fn from(err: serde_json::Error) -> Self {
        PaymentError::InternalError(Box::new(err))
    }
}

pub type Result<T> = std::result::Result<T, PaymentError>;

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_validation_codes_are_stable() {
        let err = ValidationError::AdvanceAmountMismatch {
            expected: dec!(600),
            actual: dec!(500),
        };
        assert_eq!(err.code(), "advance_amount_mismatch");
        assert!(err.to_string().contains("must equal rent × months"));
    }

    #[test]
    fn test_conflict_is_distinct_from_validation() {
        let conflict: PaymentError = ConflictReason::PostedPaymentImmutable.into();
        assert!(matches!(conflict, PaymentError::Conflict(_)));

        let validation: PaymentError = ValidationError::NonPositiveAmount.into();
        assert!(matches!(validation, PaymentError::ValidationError(_)));
    }
}
