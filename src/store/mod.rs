//! Ledger Store module
//!
//! Durable keyed storage for ledger entries, partition tails and the
//! event-id dedup index.
//!
//! Implementations:
//! - `PgLedgerStore`: PostgreSQL storage
//! - `InMemoryLedgerStore`: in-process storage for tests and standalone runs

mod error;
mod memory;
mod postgres;

use async_trait::async_trait;

use crate::domain::{Balance, EventId, LedgerEntry, PartitionKey, PartitionTail};

pub use error::StoreError;
pub use memory::InMemoryLedgerStore;
pub use postgres::PgLedgerStore;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Interface for ledger persistence.
///
/// `append` is the only mutation of ledger state. It must atomically check
/// that the partition tail still has `expected_sequence`, insert the entry,
/// and move the tail forward; otherwise nothing is written.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Look up an entry by its event id (dedup index).
    async fn find_entry(&self, event_id: &EventId) -> StoreResult<Option<LedgerEntry>>;

    /// Current tail of a partition. Partitions never written return an empty tail.
    async fn load_tail(&self, partition: &PartitionKey) -> StoreResult<PartitionTail>;

    /// Append an entry if the tail is still at `expected_sequence`.
    ///
    /// # Errors
    /// - `StoreError::PartitionConflict` when another writer moved the tail
    /// - `StoreError::DuplicateEvent` when the event id is already recorded
    async fn append(&self, entry: &LedgerEntry, expected_sequence: i64) -> StoreResult<()>;

    /// All entries of a partition, in sequence order.
    async fn entries(&self, partition: &PartitionKey) -> StoreResult<Vec<LedgerEntry>>;

    /// Seed the balance an empty partition starts from.
    async fn seed_opening_balance(
        &self,
        partition: &PartitionKey,
        opening_balance: Balance,
    ) -> StoreResult<()>;
}
