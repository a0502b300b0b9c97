//! Ledger Consumer
//!
//! Applies queued transaction events to their partition exactly once.
//!
//! Per message: look the event id up in the dedup index, skip if present;
//! otherwise read the partition tail, build the next entry and append it
//! through the store's compare-and-swap on the tail sequence number. Only
//! after a successful append (or a confirmed duplicate) is the message acked.

mod error;
mod pool;
mod retry;

use std::sync::Arc;

use chrono::Utc;

use crate::domain::{LedgerEntry, TransactionEvent};
use crate::queue::{Delivery, EventQueue};
use crate::store::{LedgerStore, StoreError};

pub use error::ConsumerError;
pub use pool::{ConsumerPool, DrainReport};
pub use retry::RetryPolicy;

/// Result of applying one event
#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutcome {
    /// A new entry was written
    Applied(LedgerEntry),
    /// The event id was already recorded; nothing changed
    Duplicate {
        existing: LedgerEntry,
        /// False when the redelivered payload differs from the recorded one
        payload_matches: bool,
    },
}

/// What happened to a delivery
#[derive(Debug)]
pub enum DeliveryOutcome {
    Acked(ApplyOutcome),
    Nacked(ConsumerError),
    DeadLettered(ConsumerError),
}

/// Idempotent writer of ledger entries
pub struct LedgerConsumer {
    store: Arc<dyn LedgerStore>,
    policy: RetryPolicy,
}

impl LedgerConsumer {
    pub fn new(store: Arc<dyn LedgerStore>, policy: RetryPolicy) -> Self {
        Self { store, policy }
    }

    /// Apply an event, retrying conflicts immediately and transient store
    /// failures with backoff.
    pub async fn process(&self, event: &TransactionEvent) -> Result<ApplyOutcome, ConsumerError> {
        let mut conflicts = 0u32;
        let mut failures = 0u32;

        loop {
            match self.try_apply(event).await {
                Ok(outcome) => return Ok(outcome),

                // Lost the tail, or another writer recorded this id between our
                // dedup read and the append. A fresh read settles both.
                Err(e @ (StoreError::PartitionConflict { .. } | StoreError::DuplicateEvent(_))) => {
                    if conflicts >= self.policy.max_conflict_retries {
                        return Err(ConsumerError::PartitionConflictExhausted {
                            event_id: event.id.clone(),
                            partition: event.partition(),
                            attempts: conflicts + 1,
                        });
                    }
                    conflicts += 1;
                    tracing::debug!(
                        event_id = %event.id,
                        attempt = conflicts,
                        error = %e,
                        "Partition conflict, re-reading tail"
                    );
                }

                Err(e) if e.is_retryable() && failures < self.policy.max_persistence_retries => {
                    let delay = self.policy.backoff(failures);
                    failures += 1;
                    tracing::warn!(
                        event_id = %event.id,
                        attempt = failures,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Store unavailable, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    return Err(ConsumerError::Persistence {
                        event_id: event.id.clone(),
                        attempts: failures + 1,
                        source: e,
                    });
                }
            }
        }
    }

    /// One dedup → read → append pass
    async fn try_apply(&self, event: &TransactionEvent) -> Result<ApplyOutcome, StoreError> {
        if let Some(existing) = self.store.find_entry(&event.id).await? {
            return Ok(duplicate(existing, event));
        }

        let partition = event.partition();
        let tail = self.store.load_tail(&partition).await?;
        let entry = tail.next_entry(event, Utc::now());

        self.store.append(&entry, tail.sequence_number).await?;

        if entry.late {
            tracing::info!(
                event_id = %entry.event_id,
                partition = %partition,
                sequence_number = entry.sequence_number,
                "Late entry appended"
            );
        }
        tracing::debug!(
            event_id = %entry.event_id,
            partition = %partition,
            sequence_number = entry.sequence_number,
            running_balance = %entry.running_balance,
            "Ledger entry applied"
        );

        Ok(ApplyOutcome::Applied(entry))
    }

    /// Process a queue delivery and settle it: ack when applied or duplicate,
    /// park when the failure is permanent or attempts ran out, nack with the
    /// redelivery delay otherwise.
    pub async fn handle_delivery(&self, queue: &dyn EventQueue, delivery: &Delivery) -> DeliveryOutcome {
        match self.process(&delivery.event).await {
            Ok(outcome) => {
                if let Err(e) = queue.ack(delivery).await {
                    // Redelivery is harmless: the dedup index absorbs it
                    tracing::warn!(
                        event_id = %delivery.event.id,
                        tag = delivery.tag,
                        error = %e,
                        "Ack failed, message will be redelivered"
                    );
                }
                DeliveryOutcome::Acked(outcome)
            }
            Err(err)
                if err.is_permanent()
                    || delivery.attempt >= self.policy.max_delivery_attempts =>
            {
                tracing::error!(
                    event_id = %delivery.event.id,
                    attempt = delivery.attempt,
                    error = %err,
                    "Event cannot be applied, parking message"
                );
                if let Err(e) = queue.dead_letter(delivery, &err.to_string()).await {
                    tracing::warn!(
                        event_id = %delivery.event.id,
                        tag = delivery.tag,
                        error = %e,
                        "Parking failed, message stays in flight until the visibility timeout"
                    );
                }
                DeliveryOutcome::DeadLettered(err)
            }
            Err(err) => {
                tracing::error!(
                    event_id = %delivery.event.id,
                    attempt = delivery.attempt,
                    error = %err,
                    "Event not applied, returning to queue"
                );
                if let Err(e) = queue.nack(delivery, self.policy.redelivery_delay).await {
                    tracing::warn!(
                        event_id = %delivery.event.id,
                        tag = delivery.tag,
                        error = %e,
                        "Nack failed, message stays in flight until the visibility timeout"
                    );
                }
                DeliveryOutcome::Nacked(err)
            }
        }
    }
}

fn duplicate(existing: LedgerEntry, event: &TransactionEvent) -> ApplyOutcome {
    let payload_matches = existing.fingerprint == event.fingerprint();
    if payload_matches {
        tracing::info!(event_id = %event.id, "Duplicate skipped");
    } else {
        tracing::warn!(
            event_id = %event.id,
            recorded_fingerprint = %existing.fingerprint,
            "Duplicate skipped, but payload differs from the recorded event"
        );
    }
    ApplyOutcome::Duplicate {
        existing,
        payload_matches,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        AccountType, Amount, Balance, CurrencyType, Direction, EventId, PartitionKey,
        PartitionTail, TransactionMetadata, TransactionType,
    };
    use crate::queue::InMemoryQueue;
    use crate::store::{InMemoryLedgerStore, StoreResult};
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::time::Duration;
    use tokio::sync::Mutex;

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, day, 10, 0, 0).unwrap()
    }

    fn event(id: &str, direction: Direction, amount: Decimal, day: u32) -> TransactionEvent {
        TransactionEvent {
            id: EventId::new(id),
            user_id: "user-123".to_string(),
            account: AccountType::Brazilian,
            currency: CurrencyType::Brl,
            transaction_type: TransactionType::InstantTransfer,
            direction,
            amount: Amount::new(amount).unwrap(),
            balance: None,
            metadata: TransactionMetadata::default(),
            processed_at: at(day),
            created_at: at(day),
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_persistence_retries: 3,
            base_delay: Duration::from_millis(1),
            max_conflict_retries: 2,
            redelivery_delay: Duration::from_millis(10),
            max_delivery_attempts: 3,
        }
    }

    fn consumer(store: Arc<InMemoryLedgerStore>) -> LedgerConsumer {
        LedgerConsumer::new(store, fast_policy())
    }

    /// Store that lets a rival writer take the tail, or an operator seed the
    /// partition, right before our append
    struct RacingStore {
        inner: InMemoryLedgerStore,
        rivals: Mutex<Vec<TransactionEvent>>,
        seed: Mutex<Option<Balance>>,
    }

    impl RacingStore {
        fn with_rivals(rivals: Vec<TransactionEvent>) -> Self {
            Self {
                inner: InMemoryLedgerStore::new(),
                rivals: Mutex::new(rivals),
                seed: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl LedgerStore for RacingStore {
        async fn find_entry(&self, event_id: &EventId) -> StoreResult<Option<LedgerEntry>> {
            self.inner.find_entry(event_id).await
        }

        async fn load_tail(&self, partition: &PartitionKey) -> StoreResult<PartitionTail> {
            self.inner.load_tail(partition).await
        }

        async fn append(&self, entry: &LedgerEntry, expected_sequence: i64) -> StoreResult<()> {
            if let Some(opening) = self.seed.lock().await.take() {
                self.inner.seed_opening_balance(&entry.partition, opening).await?;
            }
            if let Some(rival) = self.rivals.lock().await.pop() {
                let tail = self.inner.load_tail(&rival.partition()).await?;
                let rival_entry = tail.next_entry(&rival, Utc::now());
                self.inner.append(&rival_entry, tail.sequence_number).await?;
            }
            self.inner.append(entry, expected_sequence).await
        }

        async fn entries(&self, partition: &PartitionKey) -> StoreResult<Vec<LedgerEntry>> {
            self.inner.entries(partition).await
        }

        async fn seed_opening_balance(
            &self,
            partition: &PartitionKey,
            opening_balance: Balance,
        ) -> StoreResult<()> {
            self.inner.seed_opening_balance(partition, opening_balance).await
        }
    }

    #[tokio::test]
    async fn test_applies_then_skips_duplicate() {
        let store = Arc::new(InMemoryLedgerStore::new());
        let consumer = consumer(store.clone());
        let e = event("txn-1", Direction::Credit, dec!(600.00), 1);

        let first = consumer.process(&e).await.unwrap();
        let ApplyOutcome::Applied(entry) = first else {
            panic!("expected applied");
        };
        assert_eq!(entry.sequence_number, 1);
        assert_eq!(entry.running_balance.value(), dec!(600.00));

        let second = consumer.process(&e).await.unwrap();
        assert_eq!(
            second,
            ApplyOutcome::Duplicate {
                existing: entry,
                payload_matches: true
            }
        );
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_reused_id_with_different_payload_is_still_skipped() {
        let store = Arc::new(InMemoryLedgerStore::new());
        let consumer = consumer(store.clone());

        consumer
            .process(&event("txn-1", Direction::Credit, dec!(10), 1))
            .await
            .unwrap();
        let outcome = consumer
            .process(&event("txn-1", Direction::Debit, dec!(99), 2))
            .await
            .unwrap();

        assert!(matches!(
            outcome,
            ApplyOutcome::Duplicate {
                payload_matches: false,
                ..
            }
        ));
        let tail = store.load_tail(&event("x", Direction::Credit, dec!(1), 1).partition()).await.unwrap();
        assert_eq!(tail.running_balance.value(), dec!(10));
    }

    #[tokio::test]
    async fn test_lost_compare_and_swap_is_retried_with_fresh_tail() {
        let store = Arc::new(RacingStore::with_rivals(vec![event(
            "rival",
            Direction::Credit,
            dec!(100),
            1,
        )]));
        let consumer = LedgerConsumer::new(store.clone(), fast_policy());

        let outcome = consumer
            .process(&event("mine", Direction::Debit, dec!(30), 2))
            .await
            .unwrap();

        let ApplyOutcome::Applied(entry) = outcome else {
            panic!("expected applied");
        };
        assert_eq!(entry.sequence_number, 2);
        assert_eq!(entry.running_balance.value(), dec!(70));
    }

    #[tokio::test]
    async fn test_conflicts_exhaust() {
        let rivals = (0..5)
            .map(|i| event(&format!("rival-{i}"), Direction::Credit, dec!(1), 1))
            .collect();
        let store = Arc::new(RacingStore::with_rivals(rivals));
        let consumer = LedgerConsumer::new(store.clone(), fast_policy());

        let err = consumer
            .process(&event("mine", Direction::Credit, dec!(1), 2))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ConsumerError::PartitionConflictExhausted { attempts: 3, .. }
        ));
        assert_eq!(err.event_id(), &EventId::new("mine"));
    }

    #[tokio::test]
    async fn test_transient_store_failure_is_retried() {
        let store = Arc::new(InMemoryLedgerStore::new());
        store.fail_next_appends(2);
        let consumer = consumer(store.clone());

        let outcome = consumer
            .process(&event("txn-1", Direction::Credit, dec!(5), 1))
            .await
            .unwrap();
        assert!(matches!(outcome, ApplyOutcome::Applied(_)));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_persistence_retries_exhaust() {
        let store = Arc::new(InMemoryLedgerStore::new());
        store.fail_next_reads(10);
        let consumer = consumer(store.clone());

        let err = consumer
            .process(&event("txn-1", Direction::Credit, dec!(5), 1))
            .await
            .unwrap_err();
        assert!(matches!(err, ConsumerError::Persistence { attempts: 4, .. }));
        store.fail_next_reads(0);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_handle_delivery_acks_and_nacks() {
        let store = Arc::new(InMemoryLedgerStore::new());
        let queue = InMemoryQueue::new(1);
        let consumer = consumer(store.clone());

        queue
            .publish(&event("txn-1", Direction::Credit, dec!(5), 1))
            .await
            .unwrap();
        let delivery = queue.receive(0).await.unwrap().unwrap();
        let outcome = consumer.handle_delivery(&queue, &delivery).await;
        assert!(matches!(outcome, DeliveryOutcome::Acked(ApplyOutcome::Applied(_))));
        assert_eq!(queue.pending().await, 0);

        queue
            .publish(&event("txn-2", Direction::Credit, dec!(5), 2))
            .await
            .unwrap();
        store.fail_next_reads(10);
        let delivery = queue.receive(0).await.unwrap().unwrap();
        let outcome = consumer.handle_delivery(&queue, &delivery).await;
        assert!(matches!(outcome, DeliveryOutcome::Nacked(_)));
        // still queued, waiting out the redelivery delay
        assert_eq!(queue.pending().await, 1);
    }

    #[tokio::test]
    async fn test_seed_between_read_and_append_is_retried() {
        let store = Arc::new(RacingStore::with_rivals(Vec::new()));
        *store.seed.lock().await = Some(Balance::new(dec!(100)));
        let consumer = LedgerConsumer::new(store.clone(), fast_policy());

        let outcome = consumer
            .process(&event("first", Direction::Credit, dec!(25), 1))
            .await
            .unwrap();

        let ApplyOutcome::Applied(entry) = outcome else {
            panic!("expected applied");
        };
        assert_eq!(entry.sequence_number, 1);
        assert_eq!(entry.running_balance.value(), dec!(125));

        let tail = store.load_tail(&entry.partition).await.unwrap();
        assert_eq!(tail.opening_balance.value(), dec!(100));
        assert_eq!(tail.running_balance.value(), dec!(125));
    }

    #[tokio::test]
    async fn test_message_parked_after_max_attempts() {
        let store = Arc::new(InMemoryLedgerStore::new());
        let queue = InMemoryQueue::new(1);
        let policy = RetryPolicy {
            redelivery_delay: Duration::ZERO,
            ..fast_policy()
        };
        let consumer = LedgerConsumer::new(store.clone(), policy);

        queue
            .publish(&event("stuck", Direction::Credit, dec!(5), 1))
            .await
            .unwrap();
        store.fail_next_reads(1_000);

        for _ in 0..2 {
            let delivery = queue.receive(0).await.unwrap().unwrap();
            let outcome = consumer.handle_delivery(&queue, &delivery).await;
            assert!(matches!(outcome, DeliveryOutcome::Nacked(_)));
        }

        let delivery = queue.receive(0).await.unwrap().unwrap();
        assert_eq!(delivery.attempt, 3);
        let outcome = consumer.handle_delivery(&queue, &delivery).await;
        assert!(matches!(outcome, DeliveryOutcome::DeadLettered(_)));

        assert!(queue.receive(0).await.unwrap().is_none());
        assert_eq!(queue.pending().await, 0);
        assert_eq!(queue.dead_letters().await.len(), 1);
    }

    /// Store whose rows cannot be decoded
    struct CorruptStore;

    #[async_trait]
    impl LedgerStore for CorruptStore {
        async fn find_entry(&self, _event_id: &EventId) -> StoreResult<Option<LedgerEntry>> {
            Err(StoreError::Corrupt("unknown direction 'X'".to_string()))
        }

        async fn load_tail(&self, partition: &PartitionKey) -> StoreResult<PartitionTail> {
            Ok(PartitionTail::empty(partition.clone()))
        }

        async fn append(&self, _entry: &LedgerEntry, _expected_sequence: i64) -> StoreResult<()> {
            Ok(())
        }

        async fn entries(&self, _partition: &PartitionKey) -> StoreResult<Vec<LedgerEntry>> {
            Ok(Vec::new())
        }

        async fn seed_opening_balance(
            &self,
            _partition: &PartitionKey,
            _opening_balance: Balance,
        ) -> StoreResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_permanent_failure_is_parked_on_first_delivery() {
        let queue = InMemoryQueue::new(1);
        let consumer = LedgerConsumer::new(Arc::new(CorruptStore), fast_policy());

        queue
            .publish(&event("bad", Direction::Debit, dec!(1), 1))
            .await
            .unwrap();
        let delivery = queue.receive(0).await.unwrap().unwrap();
        let outcome = consumer.handle_delivery(&queue, &delivery).await;

        let DeliveryOutcome::DeadLettered(err) = outcome else {
            panic!("expected dead-lettered");
        };
        assert!(err.is_permanent());
        assert!(matches!(err, ConsumerError::Persistence { attempts: 1, .. }));

        let parked = queue.dead_letters().await;
        assert_eq!(parked.len(), 1);
        assert!(parked[0].1.contains("Corrupt ledger data"));
    }
}
