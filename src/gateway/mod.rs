//! Intake Gateway
//!
//! Front door for transaction events: validate, assign an id when the caller
//! sent none, publish to the partition's queue shard and hand back a receipt.
//! An event is accepted only once the queue has durably taken it.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::{EventId, OperationContext, PartitionKey, RawTransactionEvent, RejectionReason};
use crate::queue::EventQueue;
use crate::validation;

/// Proof of acceptance returned to the caller
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AcceptedReceipt {
    pub event_id: EventId,
    pub partition: PartitionKey,
    pub accepted_at: DateTime<Utc>,
}

/// Intake failures
#[derive(Debug, thiserror::Error)]
pub enum IntakeError {
    /// Event failed validation. Resubmitting the same payload fails again.
    #[error("Event rejected: {0}")]
    Rejected(#[from] RejectionReason),

    /// Queue refused the event or did not confirm in time. The outcome of a
    /// timeout is unknown; resubmitting with the same id is safe.
    #[error("Could not enqueue event {event_id}: {reason}")]
    TransientPublish { event_id: EventId, reason: String },
}

impl IntakeError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, IntakeError::TransientPublish { .. })
    }
}

/// Validates and enqueues events. Holds no state besides the queue handle.
#[derive(Clone)]
pub struct IntakeGateway {
    queue: Arc<dyn EventQueue>,
    publish_timeout: Duration,
}

impl IntakeGateway {
    pub fn new(queue: Arc<dyn EventQueue>, publish_timeout: Duration) -> Self {
        Self {
            queue,
            publish_timeout,
        }
    }

    /// Accept one event. Exactly one publish per call; no retries here.
    pub async fn submit(
        &self,
        raw: RawTransactionEvent,
        context: &OperationContext,
    ) -> Result<AcceptedReceipt, IntakeError> {
        let valid = validation::validate(&raw).map_err(|reason| {
            tracing::info!(
                correlation_id = ?context.correlation_id,
                code = reason.code(),
                reason = %reason,
                "Event rejected"
            );
            reason
        })?;

        let event = valid.into_event();
        let partition = event.partition();

        let published = tokio::time::timeout(self.publish_timeout, self.queue.publish(&event)).await;

        let reason = match published {
            Ok(Ok(())) => {
                tracing::info!(
                    correlation_id = ?context.correlation_id,
                    event_id = %event.id,
                    partition = %partition,
                    "Event accepted"
                );
                return Ok(AcceptedReceipt {
                    event_id: event.id,
                    partition,
                    accepted_at: Utc::now(),
                });
            }
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!(
                "publish not confirmed within {}ms",
                self.publish_timeout.as_millis()
            ),
        };

        tracing::warn!(
            correlation_id = ?context.correlation_id,
            event_id = %event.id,
            reason = %reason,
            "Event not enqueued"
        );
        Err(IntakeError::TransientPublish {
            event_id: event.id,
            reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::InMemoryQueue;
    use rust_decimal_macros::dec;

    fn raw() -> RawTransactionEvent {
        serde_json::from_value(serde_json::json!({
            "id": "txn-42",
            "user_id": "user-123",
            "account": "CONTA BRASILEIRA",
            "currency": "BRL",
            "type": "PIX",
            "direction": "CREDITO",
            "amount": "600.00",
            "metadata": {"description": "salary"},
            "processed_at": "2025-03-10T12:00:00Z",
            "created_at": "2025-03-10T11:59:00Z"
        }))
        .unwrap()
    }

    fn gateway(queue: Arc<InMemoryQueue>) -> IntakeGateway {
        IntakeGateway::new(queue, Duration::from_millis(200))
    }

    #[tokio::test]
    async fn test_accepts_and_enqueues_once() {
        let queue = Arc::new(InMemoryQueue::new(4));
        let receipt = gateway(queue.clone())
            .submit(raw(), &OperationContext::new())
            .await
            .unwrap();

        assert_eq!(receipt.event_id, EventId::new("txn-42"));
        assert_eq!(receipt.partition.user_id, "user-123");
        assert_eq!(queue.published_count(), 1);

        let shard = queue.shard_for(&receipt.partition);
        let queued = queue.queued_events(shard).await;
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].amount.value(), dec!(600.00));
        assert_eq!(queued[0].metadata.description, "salary");
    }

    #[tokio::test]
    async fn test_assigns_id_when_absent() {
        let queue = Arc::new(InMemoryQueue::new(1));
        let mut event = raw();
        event.id = None;

        let receipt = gateway(queue.clone())
            .submit(event, &OperationContext::new())
            .await
            .unwrap();
        assert!(uuid::Uuid::parse_str(receipt.event_id.as_str()).is_ok());
        assert_eq!(queue.queued_events(0).await[0].id, receipt.event_id);
    }

    #[tokio::test]
    async fn test_rejection_never_reaches_queue() {
        let queue = Arc::new(InMemoryQueue::new(1));
        let mut event = raw();
        event.amount = Some(dec!(0));

        let err = gateway(queue.clone())
            .submit(event, &OperationContext::new())
            .await
            .unwrap_err();
        assert!(matches!(err, IntakeError::Rejected(RejectionReason::InvalidAmount(_))));
        assert!(!err.is_retryable());
        assert_eq!(queue.published_count(), 0);
    }

    #[tokio::test]
    async fn test_publish_failure_is_transient() {
        let queue = Arc::new(InMemoryQueue::new(1));
        queue.set_fail_on_publish(true).await;

        let err = gateway(queue.clone())
            .submit(raw(), &OperationContext::new())
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert!(matches!(err, IntakeError::TransientPublish { ref event_id, .. } if event_id.as_str() == "txn-42"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_timeout_is_transient() {
        let queue = Arc::new(InMemoryQueue::new(1));
        queue.set_publish_delay(Some(Duration::from_secs(5))).await;

        let err = gateway(queue.clone())
            .submit(raw(), &OperationContext::new())
            .await
            .unwrap_err();
        let IntakeError::TransientPublish { reason, .. } = err else {
            panic!("expected transient publish error");
        };
        assert!(reason.contains("200ms"));
        assert_eq!(queue.published_count(), 0);
    }
}
