//! Retry policy for the ledger consumer.

use rand::Rng;
use std::time::Duration;

use crate::config::Config;

const MAX_BACKOFF: Duration = Duration::from_secs(10);

/// Bounds on how hard the consumer tries before giving a message back
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Backoff retries after a transient store failure
    pub max_persistence_retries: u32,
    pub base_delay: Duration,
    /// Immediate re-reads after losing the tail compare-and-swap
    pub max_conflict_retries: u32,
    /// Visibility delay when a message is nacked
    pub redelivery_delay: Duration,
    /// Deliveries after which a failing message is parked instead of nacked
    pub max_delivery_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_persistence_retries: 5,
            base_delay: Duration::from_millis(50),
            max_conflict_retries: 8,
            redelivery_delay: Duration::from_secs(1),
            max_delivery_attempts: 10,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_persistence_retries: config.store_max_retries,
            base_delay: config.store_retry_base,
            max_conflict_retries: config.consumer_max_conflict_retries,
            redelivery_delay: config.queue_redelivery_delay,
            max_delivery_attempts: config.consumer_max_delivery_attempts,
        }
    }

    /// Delay before persistence retry `attempt` (0-based): exponential with
    /// up to one base delay of jitter, capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponential = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt.min(16)));
        let jitter_ms = self.base_delay.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
        };
        (exponential + jitter).min(MAX_BACKOFF)
    }
}
