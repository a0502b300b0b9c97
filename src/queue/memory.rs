//! In-process event queue.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

use crate::domain::TransactionEvent;

use super::{Delivery, EventQueue, QueueError, QueueResult};

struct Message {
    tag: i64,
    event: TransactionEvent,
    attempt: u32,
    visible_at: Instant,
}

#[derive(Default)]
struct Shard {
    ready: VecDeque<Message>,
    in_flight: HashMap<i64, (Message, Instant)>,
    dead: Vec<(Message, String)>,
}

/// Sharded queue held in memory. Messages survive nack and stale-claim
/// redelivery but not a process restart.
pub struct InMemoryQueue {
    shards: Vec<Mutex<Shard>>,
    next_tag: AtomicI64,
    published: AtomicU64,
    fail_on_publish: RwLock<bool>,
    publish_delay: RwLock<Option<Duration>>,
}

impl InMemoryQueue {
    pub fn new(shard_count: usize) -> Self {
        let shard_count = shard_count.max(1);
        Self {
            shards: (0..shard_count).map(|_| Mutex::new(Shard::default())).collect(),
            next_tag: AtomicI64::new(1),
            published: AtomicU64::new(0),
            fail_on_publish: RwLock::new(false),
            publish_delay: RwLock::new(None),
        }
    }

    pub async fn set_fail_on_publish(&self, fail: bool) {
        *self.fail_on_publish.write().await = fail;
    }

    /// Hold every publish for `delay` before accepting it
    pub async fn set_publish_delay(&self, delay: Option<Duration>) {
        *self.publish_delay.write().await = delay;
    }

    /// Messages accepted since creation
    pub fn published_count(&self) -> u64 {
        self.published.load(Ordering::SeqCst)
    }

    /// Messages not yet acked (ready or in flight)
    pub async fn pending(&self) -> usize {
        let mut total = 0;
        for shard in &self.shards {
            let shard = shard.lock().await;
            total += shard.ready.len() + shard.in_flight.len();
        }
        total
    }

    /// Parked messages across all shards with the reason they were parked
    pub async fn dead_letters(&self) -> Vec<(TransactionEvent, String)> {
        let mut parked = Vec::new();
        for shard in &self.shards {
            let shard = shard.lock().await;
            parked.extend(
                shard
                    .dead
                    .iter()
                    .map(|(m, reason)| (m.event.clone(), reason.clone())),
            );
        }
        parked
    }

    /// Events waiting on a shard, in queue order
    pub async fn queued_events(&self, shard: usize) -> Vec<TransactionEvent> {
        match self.shards.get(shard) {
            Some(shard) => shard
                .lock()
                .await
                .ready
                .iter()
                .map(|m| m.event.clone())
                .collect(),
            None => Vec::new(),
        }
    }

    fn shard(&self, shard: usize) -> QueueResult<&Mutex<Shard>> {
        self.shards.get(shard).ok_or(QueueError::InvalidShard {
            shard,
            shard_count: self.shards.len(),
        })
    }
}

#[async_trait]
impl EventQueue for InMemoryQueue {
    fn shard_count(&self) -> usize {
        self.shards.len()
    }

    async fn publish(&self, event: &TransactionEvent) -> QueueResult<()> {
        if let Some(delay) = *self.publish_delay.read().await {
            tokio::time::sleep(delay).await;
        }
        if *self.fail_on_publish.read().await {
            return Err(QueueError::Unavailable("in-memory publish failure".to_string()));
        }

        let shard = self.shard_for(&event.partition());
        let message = Message {
            tag: self.next_tag.fetch_add(1, Ordering::SeqCst),
            event: event.clone(),
            attempt: 0,
            visible_at: Instant::now(),
        };
        self.shard(shard)?.lock().await.ready.push_back(message);
        self.published.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn receive(&self, shard: usize) -> QueueResult<Option<Delivery>> {
        let mut state = self.shard(shard)?.lock().await;
        let now = Instant::now();

        let Some(position) = state.ready.iter().position(|m| m.visible_at <= now) else {
            return Ok(None);
        };
        let Some(mut message) = state.ready.remove(position) else {
            return Ok(None);
        };

        message.attempt += 1;
        let delivery = Delivery {
            tag: message.tag,
            shard,
            event: message.event.clone(),
            attempt: message.attempt,
        };
        state.in_flight.insert(message.tag, (message, now));
        Ok(Some(delivery))
    }

    async fn ack(&self, delivery: &Delivery) -> QueueResult<()> {
        let mut state = self.shard(delivery.shard)?.lock().await;
        state
            .in_flight
            .remove(&delivery.tag)
            .map(|_| ())
            .ok_or(QueueError::UnknownDelivery(delivery.tag))
    }

    async fn nack(&self, delivery: &Delivery, delay: Duration) -> QueueResult<()> {
        let mut state = self.shard(delivery.shard)?.lock().await;
        let (mut message, _) = state
            .in_flight
            .remove(&delivery.tag)
            .ok_or(QueueError::UnknownDelivery(delivery.tag))?;
        message.visible_at = Instant::now() + delay;
        state.ready.push_back(message);
        Ok(())
    }

    async fn dead_letter(&self, delivery: &Delivery, reason: &str) -> QueueResult<()> {
        let mut state = self.shard(delivery.shard)?.lock().await;
        let (message, _) = state
            .in_flight
            .remove(&delivery.tag)
            .ok_or(QueueError::UnknownDelivery(delivery.tag))?;
        state.dead.push((message, reason.to_string()));
        Ok(())
    }

    async fn requeue_stale(&self, visibility_timeout: Duration) -> QueueResult<u64> {
        let now = Instant::now();
        let mut released = 0;

        for shard in &self.shards {
            let mut state = shard.lock().await;
            let stale: Vec<i64> = state
                .in_flight
                .iter()
                .filter(|(_, (_, claimed_at))| now.duration_since(*claimed_at) >= visibility_timeout)
                .map(|(tag, _)| *tag)
                .collect();

            for tag in stale {
                if let Some((mut message, _)) = state.in_flight.remove(&tag) {
                    message.visible_at = now;
                    state.ready.push_back(message);
                    released += 1;
                }
            }
        }

        Ok(released)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        AccountType, Amount, CurrencyType, Direction, EventId, TransactionMetadata,
        TransactionType,
    };
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn event(id: &str, user: &str) -> TransactionEvent {
        let now = Utc::now();
        TransactionEvent {
            id: EventId::new(id),
            user_id: user.to_string(),
            account: AccountType::Investment,
            currency: CurrencyType::Eur,
            transaction_type: TransactionType::SecurityTrade,
            direction: Direction::Debit,
            amount: Amount::new(dec!(3.5)).unwrap(),
            balance: None,
            metadata: TransactionMetadata::default(),
            processed_at: now,
            created_at: now,
        }
    }

    #[tokio::test]
    async fn test_publish_routes_to_partition_shard() {
        let queue = InMemoryQueue::new(4);
        let e = event("e1", "user-9");
        queue.publish(&e).await.unwrap();

        let shard = queue.shard_for(&e.partition());
        let delivery = queue.receive(shard).await.unwrap().unwrap();
        assert_eq!(delivery.event, e);
        assert_eq!(delivery.attempt, 1);
        assert!(!delivery.is_redelivery());

        for other in (0..4).filter(|s| *s != shard) {
            assert!(queue.receive(other).await.unwrap().is_none());
        }
    }

    #[tokio::test]
    async fn test_ack_removes_message() {
        let queue = InMemoryQueue::new(1);
        queue.publish(&event("e1", "u")).await.unwrap();

        let delivery = queue.receive(0).await.unwrap().unwrap();
        assert_eq!(queue.pending().await, 1);
        queue.ack(&delivery).await.unwrap();
        assert_eq!(queue.pending().await, 0);

        let err = queue.ack(&delivery).await.unwrap_err();
        assert!(matches!(err, QueueError::UnknownDelivery(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_nack_redelivers_after_delay() {
        let queue = InMemoryQueue::new(1);
        queue.publish(&event("e1", "u")).await.unwrap();

        let delivery = queue.receive(0).await.unwrap().unwrap();
        queue.nack(&delivery, Duration::from_secs(2)).await.unwrap();
        assert!(queue.receive(0).await.unwrap().is_none());

        tokio::time::advance(Duration::from_secs(2)).await;
        let again = queue.receive(0).await.unwrap().unwrap();
        assert_eq!(again.tag, delivery.tag);
        assert_eq!(again.attempt, 2);
        assert!(again.is_redelivery());
    }

    #[tokio::test(start_paused = true)]
    async fn test_requeue_stale_in_flight() {
        let queue = InMemoryQueue::new(1);
        queue.publish(&event("e1", "u")).await.unwrap();
        let _claimed = queue.receive(0).await.unwrap().unwrap();

        assert_eq!(queue.requeue_stale(Duration::from_secs(30)).await.unwrap(), 0);
        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(queue.requeue_stale(Duration::from_secs(30)).await.unwrap(), 1);

        let again = queue.receive(0).await.unwrap().unwrap();
        assert_eq!(again.attempt, 2);
    }

    #[tokio::test]
    async fn test_publish_failure_injection() {
        let queue = InMemoryQueue::new(2);
        queue.set_fail_on_publish(true).await;
        let err = queue.publish(&event("e1", "u")).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(queue.published_count(), 0);
        assert_eq!(queue.pending().await, 0);
    }

    #[tokio::test]
    async fn test_invalid_shard() {
        let queue = InMemoryQueue::new(2);
        assert!(matches!(
            queue.receive(7).await,
            Err(QueueError::InvalidShard { shard: 7, shard_count: 2 })
        ));
    }

    #[tokio::test]
    async fn test_dead_letter_parks_message_for_good() {
        let queue = InMemoryQueue::new(1);
        queue.publish(&event("poison", "user-1")).await.unwrap();

        let delivery = queue.receive(0).await.unwrap().unwrap();
        queue.dead_letter(&delivery, "corrupt row").await.unwrap();

        assert_eq!(queue.pending().await, 0);
        assert!(queue.receive(0).await.unwrap().is_none());
        assert_eq!(queue.requeue_stale(Duration::ZERO).await.unwrap(), 0);

        let parked = queue.dead_letters().await;
        assert_eq!(parked.len(), 1);
        assert_eq!(parked[0].0.id.as_str(), "poison");
        assert_eq!(parked[0].1, "corrupt row");

        assert!(matches!(
            queue.dead_letter(&delivery, "again").await,
            Err(QueueError::UnknownDelivery(_))
        ));
    }
}
