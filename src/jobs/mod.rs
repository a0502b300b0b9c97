//! Scheduled Jobs
//!
//! Background maintenance of the event queue. A consumer that dies between
//! claiming a message and settling it leaves the message in flight; the
//! redelivery job hands such messages out again once their visibility timeout
//! has passed. Redelivery is safe because the consumer deduplicates by event id.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::interval;

use crate::config::Config;
use crate::queue::{EventQueue, QueueError};

// =========================================================================
// Stale In-Flight Redelivery Job
// =========================================================================

/// Release in-flight messages claimed more than `visibility_timeout` ago
pub async fn redeliver_stale_messages(
    queue: &dyn EventQueue,
    visibility_timeout: Duration,
) -> Result<u64, JobError> {
    let released = queue.requeue_stale(visibility_timeout).await?;

    if released > 0 {
        tracing::warn!(
            messages_released = released,
            visibility_timeout_secs = visibility_timeout.as_secs(),
            "Released stale in-flight messages for redelivery"
        );
    }

    Ok(released)
}

// =========================================================================
// Job Scheduler
// =========================================================================

/// Configuration for job scheduler
#[derive(Debug, Clone)]
pub struct JobSchedulerConfig {
    /// How often to look for stale in-flight messages (default: 30 seconds)
    pub redelivery_check_interval: Duration,
    /// Age after which an unsettled message is considered abandoned (default: 5 minutes)
    pub visibility_timeout: Duration,
}

impl Default for JobSchedulerConfig {
    fn default() -> Self {
        Self {
            redelivery_check_interval: Duration::from_secs(30),
            visibility_timeout: Duration::from_secs(300),
        }
    }
}

impl JobSchedulerConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            visibility_timeout: config.queue_visibility_timeout,
            ..Self::default()
        }
    }
}

/// Job Scheduler - runs periodic maintenance tasks
pub struct JobScheduler {
    queue: Arc<dyn EventQueue>,
    config: JobSchedulerConfig,
}

impl JobScheduler {
    /// Create a new job scheduler
    pub fn new(queue: Arc<dyn EventQueue>) -> Self {
        Self {
            queue,
            config: JobSchedulerConfig::default(),
        }
    }

    /// Create with custom configuration
    pub fn with_config(queue: Arc<dyn EventQueue>, config: JobSchedulerConfig) -> Self {
        Self { queue, config }
    }

    /// Start the job scheduler in the background; it stops when `shutdown`
    /// flips to true.
    pub fn start(self, shutdown: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run(shutdown).await;
        })
    }

    /// Run the scheduler loop
    async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!("Job scheduler started");

        let mut redelivery_interval = interval(self.config.redelivery_check_interval);

        loop {
            tokio::select! {
                _ = redelivery_interval.tick() => {
                    if let Err(e) = redeliver_stale_messages(
                        self.queue.as_ref(),
                        self.config.visibility_timeout,
                    )
                    .await
                    {
                        tracing::error!(error = %e, "Stale message redelivery failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Job scheduler stopped");
    }

    /// Run all maintenance jobs once (for manual trigger or testing)
    pub async fn run_all_once(&self) -> MaintenanceReport {
        let mut report = MaintenanceReport::default();

        match redeliver_stale_messages(self.queue.as_ref(), self.config.visibility_timeout).await {
            Ok(count) => report.messages_requeued = count,
            Err(e) => report.errors.push(format!("Stale message redelivery: {}", e)),
        }

        report.completed_at = Utc::now();
        report
    }
}

/// Report from running maintenance jobs
#[derive(Debug, Clone, Default)]
pub struct MaintenanceReport {
    pub messages_requeued: u64,
    pub errors: Vec<String>,
    pub completed_at: DateTime<Utc>,
}

/// Job execution errors
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),
}

// =========================================================================
// Tests
// =========================================================================
