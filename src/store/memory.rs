//! In-memory ledger store for tests and standalone mode.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::{Balance, EventId, LedgerEntry, PartitionKey, PartitionTail};

use super::{LedgerStore, StoreError, StoreResult};

#[derive(Default)]
struct Inner {
    entries: HashMap<EventId, LedgerEntry>,
    tails: HashMap<PartitionKey, PartitionTail>,
    by_partition: HashMap<PartitionKey, Vec<EventId>>,
}

/// Ledger store held in process memory.
///
/// A single write lock covers the tail check and the insert, which gives the
/// same all-or-nothing append as the database transaction.
#[derive(Default)]
pub struct InMemoryLedgerStore {
    inner: RwLock<Inner>,
    failing_appends: AtomicU32,
    failing_reads: AtomicU32,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` appends fail with `StoreError::Unavailable`.
    pub fn fail_next_appends(&self, count: u32) {
        self.failing_appends.store(count, Ordering::SeqCst);
    }

    /// Make the next `count` reads fail with `StoreError::Unavailable`.
    pub fn fail_next_reads(&self, count: u32) {
        self.failing_reads.store(count, Ordering::SeqCst);
    }

    /// Number of stored entries across all partitions
    pub async fn len(&self) -> usize {
        self.inner.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn check_read(&self) -> StoreResult<()> {
        if Self::take_failure(&self.failing_reads) {
            return Err(StoreError::Unavailable("injected read failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn find_entry(&self, event_id: &EventId) -> StoreResult<Option<LedgerEntry>> {
        self.check_read()?;
        Ok(self.inner.read().await.entries.get(event_id).cloned())
    }

    async fn load_tail(&self, partition: &PartitionKey) -> StoreResult<PartitionTail> {
        self.check_read()?;
        let inner = self.inner.read().await;
        Ok(inner
            .tails
            .get(partition)
            .cloned()
            .unwrap_or_else(|| PartitionTail::empty(partition.clone())))
    }

    async fn append(&self, entry: &LedgerEntry, expected_sequence: i64) -> StoreResult<()> {
        if Self::take_failure(&self.failing_appends) {
            return Err(StoreError::Unavailable("injected append failure".to_string()));
        }

        let mut inner = self.inner.write().await;

        if inner.entries.contains_key(&entry.event_id) {
            return Err(StoreError::DuplicateEvent(entry.event_id.clone()));
        }

        let tail = inner
            .tails
            .get(&entry.partition)
            .cloned()
            .unwrap_or_else(|| PartitionTail::empty(entry.partition.clone()));

        // A seed moves the balance without moving the sequence
        if tail.sequence_number != expected_sequence
            || entry.sequence_number != expected_sequence + 1
            || tail.running_balance.value() != entry.previous_balance()
        {
            return Err(StoreError::PartitionConflict {
                partition: entry.partition.clone(),
                expected: expected_sequence,
                actual: tail.sequence_number,
            });
        }

        inner.tails.insert(entry.partition.clone(), tail.advance(entry));
        inner
            .by_partition
            .entry(entry.partition.clone())
            .or_default()
            .push(entry.event_id.clone());
        inner.entries.insert(entry.event_id.clone(), entry.clone());

        Ok(())
    }

    async fn entries(&self, partition: &PartitionKey) -> StoreResult<Vec<LedgerEntry>> {
        self.check_read()?;
        let inner = self.inner.read().await;
        Ok(inner
            .by_partition
            .get(partition)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| inner.entries.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn seed_opening_balance(
        &self,
        partition: &PartitionKey,
        opening_balance: Balance,
    ) -> StoreResult<()> {
        let mut inner = self.inner.write().await;

        if let Some(tail) = inner.tails.get(partition) {
            if !tail.is_empty() {
                return Err(StoreError::PartitionNotEmpty(partition.clone()));
            }
        }

        inner.tails.insert(
            partition.clone(),
            PartitionTail::seeded(partition.clone(), opening_balance),
        );
        Ok(())
    }
}
