//! Queue Errors

/// Errors that can occur while talking to the event queue
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// Queue could not be reached or refused the message
    #[error("Queue unavailable: {0}")]
    Unavailable(String),

    /// Shard index outside `0..shard_count`
    #[error("Invalid shard {shard} (queue has {shard_count} shards)")]
    InvalidShard { shard: usize, shard_count: usize },

    /// Ack/nack for a delivery the queue no longer tracks
    #[error("Unknown delivery tag {0}")]
    UnknownDelivery(i64),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl QueueError {
    /// Check if this error is transient
    pub fn is_retryable(&self) -> bool {
        matches!(self, QueueError::Unavailable(_) | QueueError::Database(_))
    }
}
