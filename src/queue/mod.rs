//! Event Queue module
//!
//! Durable, sharded, at-least-once queue between the intake gateway and the
//! ledger consumers. Every partition hashes to exactly one shard, so one
//! worker per shard sees a partition's events without competition.
//!
//! Implementations:
//! - `PgQueue`: PostgreSQL table claimed with `FOR UPDATE SKIP LOCKED`
//! - `InMemoryQueue`: in-process queue for tests and standalone runs

mod error;
mod memory;
mod postgres;

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::{PartitionKey, TransactionEvent};

pub use error::QueueError;
pub use memory::InMemoryQueue;
pub use postgres::PgQueue;

/// Result type for queue operations.
pub type QueueResult<T> = Result<T, QueueError>;

/// A message handed to a consumer. Must be acked or nacked.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    /// Queue-assigned handle used for ack/nack
    pub tag: i64,
    pub shard: usize,
    pub event: TransactionEvent,
    /// 1 on first delivery, incremented on every redelivery
    pub attempt: u32,
}

impl Delivery {
    pub fn is_redelivery(&self) -> bool {
        self.attempt > 1
    }
}

#[async_trait]
pub trait EventQueue: Send + Sync {
    /// Number of shards (consumer lanes)
    fn shard_count(&self) -> usize;

    /// Shard a partition is routed to
    fn shard_for(&self, partition: &PartitionKey) -> usize {
        partition.shard(self.shard_count())
    }

    /// Durably enqueue an event on its partition's shard.
    ///
    /// Returns only once the queue has accepted the message.
    async fn publish(&self, event: &TransactionEvent) -> QueueResult<()>;

    /// Take the next visible message from a shard, if any.
    async fn receive(&self, shard: usize) -> QueueResult<Option<Delivery>>;

    /// Remove a processed message.
    async fn ack(&self, delivery: &Delivery) -> QueueResult<()>;

    /// Return a message to its shard, visible again after `delay`.
    async fn nack(&self, delivery: &Delivery, delay: Duration) -> QueueResult<()>;

    /// Park an in-flight message that will never apply. It is kept for
    /// inspection but never delivered again.
    async fn dead_letter(&self, delivery: &Delivery, reason: &str) -> QueueResult<()>;

    /// Make in-flight messages claimed longer than `visibility_timeout` ago
    /// visible again. Returns how many were released.
    async fn requeue_stale(&self, visibility_timeout: Duration) -> QueueResult<u64>;
}
