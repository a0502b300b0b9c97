//! Consumer worker pool
//!
//! One worker per queue shard. Partitions hash to a single shard, so each
//! partition is consumed by exactly one worker and workers never contend on a
//! tail in normal operation. The store compare-and-swap still guards against
//! overlap (e.g. two processor instances during a rollout).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};

use crate::queue::EventQueue;

use super::{ApplyOutcome, DeliveryOutcome, LedgerConsumer};

/// Counts from draining the queue
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub applied: u64,
    pub duplicates: u64,
    pub nacked: u64,
    pub dead_lettered: u64,
    pub errors: Vec<String>,
}

impl DrainReport {
    fn merge(&mut self, other: DrainReport) {
        self.applied += other.applied;
        self.duplicates += other.duplicates;
        self.nacked += other.nacked;
        self.dead_lettered += other.dead_lettered;
        self.errors.extend(other.errors);
    }

    fn record(&mut self, outcome: &DeliveryOutcome) {
        match outcome {
            DeliveryOutcome::Acked(ApplyOutcome::Applied(_)) => self.applied += 1,
            DeliveryOutcome::Acked(ApplyOutcome::Duplicate { .. }) => self.duplicates += 1,
            DeliveryOutcome::Nacked(_) => self.nacked += 1,
            DeliveryOutcome::DeadLettered(_) => self.dead_lettered += 1,
        }
    }
}

/// Partition-sticky pool of consumer workers
#[derive(Clone)]
pub struct ConsumerPool {
    consumer: Arc<LedgerConsumer>,
    queue: Arc<dyn EventQueue>,
    poll_interval: Duration,
}

impl ConsumerPool {
    pub fn new(
        consumer: Arc<LedgerConsumer>,
        queue: Arc<dyn EventQueue>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            consumer,
            queue,
            poll_interval,
        }
    }

    /// Start one worker per shard. Workers finish their current message and
    /// exit once `shutdown` flips to true.
    pub fn spawn(&self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let shards = self.queue.shard_count();
        tracing::info!(shards, "Starting consumer workers");

        (0..shards)
            .map(|shard| {
                let pool = self.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(async move { pool.run_worker(shard, shutdown).await })
            })
            .collect()
    }

    async fn run_worker(&self, shard: usize, mut shutdown: watch::Receiver<bool>) {
        tracing::debug!(shard, "Consumer worker started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.queue.receive(shard).await {
                Ok(Some(delivery)) => {
                    self.consumer
                        .handle_delivery(self.queue.as_ref(), &delivery)
                        .await;
                    continue;
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(shard, error = %e, "Queue receive failed");
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                changed = shutdown.changed() => {
                    // sender dropped counts as shutdown
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        tracing::debug!(shard, "Consumer worker stopped");
    }

    /// Process every currently visible message, all shards in parallel, and
    /// return once each shard is empty. Nacked messages stay queued for their
    /// redelivery delay and are not retried here.
    pub async fn drain(&self) -> DrainReport {
        let mut workers = JoinSet::new();

        for shard in 0..self.queue.shard_count() {
            let pool = self.clone();
            workers.spawn(async move { pool.drain_shard(shard).await });
        }

        let mut report = DrainReport::default();
        while let Some(result) = workers.join_next().await {
            match result {
                Ok(shard_report) => report.merge(shard_report),
                Err(e) => report.errors.push(format!("drain worker: {e}")),
            }
        }
        report
    }

    async fn drain_shard(&self, shard: usize) -> DrainReport {
        let mut report = DrainReport::default();
        loop {
            match self.queue.receive(shard).await {
                Ok(Some(delivery)) => {
                    let outcome = self
                        .consumer
                        .handle_delivery(self.queue.as_ref(), &delivery)
                        .await;
                    report.record(&outcome);
                }
                Ok(None) => break,
                Err(e) => {
                    report.errors.push(format!("shard {shard}: {e}"));
                    break;
                }
            }
        }
        report
    }
}
