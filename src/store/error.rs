//! Ledger Store Errors
//!
//! Error types for ledger store operations.

use crate::domain::{EventId, PartitionKey};

/// Errors that can occur in the ledger store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Lost the compare-and-swap on a partition tail
    #[error("Partition conflict for {partition}: expected sequence {expected}, found {actual}")]
    PartitionConflict {
        partition: PartitionKey,
        expected: i64,
        actual: i64,
    },

    /// An entry for this event id already exists
    #[error("Ledger entry already exists for event {0}")]
    DuplicateEvent(EventId),

    /// Opening balance can only be seeded before the first entry
    #[error("Partition {0} already has entries")]
    PartitionNotEmpty(PartitionKey),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Store could not be reached or refused the operation
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Stored row could not be mapped back into a domain value
    #[error("Corrupt ledger data: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// Check if this error is a lost tail compare-and-swap
    pub fn is_partition_conflict(&self) -> bool {
        matches!(self, StoreError::PartitionConflict { .. })
    }

    /// Check if this error is transient and the operation may be retried with backoff
    pub fn is_retryable(&self) -> bool {
        match self {
            StoreError::Unavailable(_) => true,
            StoreError::Database(e) => !matches!(
                e,
                sqlx::Error::RowNotFound
                    | sqlx::Error::ColumnDecode { .. }
                    | sqlx::Error::ColumnNotFound(_)
                    | sqlx::Error::TypeNotFound { .. }
            ),
            _ => false,
        }
    }
}
