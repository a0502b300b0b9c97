//! Rejection reasons
//!
//! Pure domain errors raised while validating an inbound event.
//! They never depend on infrastructure and are never queued.

use thiserror::Error;

use super::AmountError;

/// Why an inbound event was rejected. Only the first failing check is reported.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RejectionReason {
    /// A required field is absent or blank
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    /// Amount is zero, negative, too precise, or too large
    #[error("Invalid amount: {0}")]
    InvalidAmount(#[from] AmountError),

    #[error("Unknown direction: {0}")]
    UnknownDirection(String),

    #[error("Unknown transaction type: {0}")]
    UnknownTransactionType(String),

    /// created_at is later than processed_at
    #[error("created_at must not be later than processed_at")]
    CreatedAfterProcessed,

    /// Identifier contains disallowed characters or has a bad length
    #[error("Malformed identifier in {field}: {value:?}")]
    MalformedIdentifier { field: &'static str, value: String },

    #[error("Unknown account type: {0}")]
    UnknownAccountType(String),

    #[error("Unknown currency: {0}")]
    UnknownCurrency(String),
}

impl RejectionReason {
    /// Stable machine-readable code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingField(_) => "missing_field",
            Self::InvalidAmount(_) => "invalid_amount",
            Self::UnknownDirection(_) => "unknown_direction",
            Self::UnknownTransactionType(_) => "unknown_transaction_type",
            Self::CreatedAfterProcessed => "created_after_processed",
            Self::MalformedIdentifier { .. } => "malformed_identifier",
            Self::UnknownAccountType(_) => "unknown_account_type",
            Self::UnknownCurrency(_) => "unknown_currency",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    #[test]
    fn test_rejection_codes() {
        assert_eq!(RejectionReason::MissingField("user_id").code(), "missing_field");
        assert_eq!(
            RejectionReason::CreatedAfterProcessed.code(),
            "created_after_processed"
        );
        let err = RejectionReason::from(AmountError::NotPositive(Decimal::ZERO));
        assert_eq!(err.code(), "invalid_amount");
        assert!(err.to_string().contains("positive"));
    }

    #[test]
    fn test_malformed_identifier_message() {
        let err = RejectionReason::MalformedIdentifier {
            field: "user_id",
            value: "bad id".to_string(),
        };
        assert!(err.to_string().contains("user_id"));
        assert!(err.to_string().contains("bad id"));
    }
}
