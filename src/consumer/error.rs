//! Consumer Errors

use crate::domain::{EventId, PartitionKey};
use crate::store::StoreError;

/// Reasons a message could not be applied. The message is nacked for
/// redelivery, or parked as dead when the failure is permanent or the message
/// has used up its delivery attempts.
#[derive(Debug, thiserror::Error)]
pub enum ConsumerError {
    /// Store failed and backoff retries ran out (or the failure was permanent)
    #[error("Persisting event {event_id} failed after {attempts} attempts: {source}")]
    Persistence {
        event_id: EventId,
        attempts: u32,
        #[source]
        source: StoreError,
    },

    /// Kept losing the partition tail to other writers
    #[error("Gave up on event {event_id} after {attempts} partition conflicts on {partition}")]
    PartitionConflictExhausted {
        event_id: EventId,
        partition: PartitionKey,
        attempts: u32,
    },
}

impl ConsumerError {
    pub fn event_id(&self) -> &EventId {
        match self {
            ConsumerError::Persistence { event_id, .. } => event_id,
            ConsumerError::PartitionConflictExhausted { event_id, .. } => event_id,
        }
    }

    /// Redelivery cannot help: the store rejected the event for good
    pub fn is_permanent(&self) -> bool {
        match self {
            ConsumerError::Persistence { source, .. } => !source.is_retryable(),
            ConsumerError::PartitionConflictExhausted { .. } => false,
        }
    }
}
