//! Configuration module
//!
//! Loads configuration from environment variables.

use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Which parts of the service this process runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// HTTP API and consumer workers in one process
    All,
    /// HTTP API only (intake and statements)
    Api,
    /// Consumer workers and queue maintenance only
    Processor,
}

impl RunMode {
    pub fn serves_api(&self) -> bool {
        matches!(self, RunMode::All | RunMode::Api)
    }

    pub fn runs_consumers(&self) -> bool {
        matches!(self, RunMode::All | RunMode::Processor)
    }
}

impl FromStr for RunMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "all" => Ok(RunMode::All),
            "api" => Ok(RunMode::Api),
            "processor" => Ok(RunMode::Processor),
            _ => Err(()),
        }
    }
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Database connection URL
    pub database_url: String,

    /// Maximum database connections in pool
    pub database_max_connections: u32,

    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    /// Environment (development, production)
    pub environment: String,

    pub run_mode: RunMode,

    /// Number of queue shards, which is also the number of consumer workers
    pub queue_shards: usize,

    /// Upper bound on waiting for the queue to accept a published event
    pub publish_timeout: Duration,

    /// Upper bound on a statement read
    pub statement_timeout: Duration,

    /// Backoff retries for transient store failures
    pub store_max_retries: u32,
    pub store_retry_base: Duration,

    /// Immediate retries after losing the partition tail compare-and-swap
    pub consumer_max_conflict_retries: u32,

    /// Deliveries of one message before it is parked as dead
    pub consumer_max_delivery_attempts: u32,

    /// Idle sleep of a worker whose shard is empty
    pub consumer_poll_interval: Duration,

    /// Visibility delay of a nacked message
    pub queue_redelivery_delay: Duration,

    /// In-flight messages older than this are handed out again
    pub queue_visibility_timeout: Duration,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url =
            env::var("DATABASE_URL").map_err(|_| ConfigError::MissingEnv("DATABASE_URL"))?;

        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        let queue_shards: usize = parse_env("QUEUE_SHARDS", 4)?;
        if queue_shards == 0 {
            return Err(ConfigError::InvalidValue("QUEUE_SHARDS"));
        }

        Ok(Self {
            database_url,
            database_max_connections: parse_env("DATABASE_MAX_CONNECTIONS", 10)?,
            host,
            port: parse_env("PORT", 3000)?,
            environment,
            run_mode: parse_env("RUN_MODE", RunMode::All)?,
            queue_shards,
            publish_timeout: millis_env("PUBLISH_TIMEOUT_MS", 2000)?,
            statement_timeout: millis_env("STATEMENT_TIMEOUT_MS", 5000)?,
            store_max_retries: parse_env("STORE_MAX_RETRIES", 5)?,
            store_retry_base: millis_env("STORE_RETRY_BASE_MS", 50)?,
            consumer_max_conflict_retries: parse_env("CONSUMER_MAX_CONFLICT_RETRIES", 8)?,
            consumer_max_delivery_attempts: parse_env("CONSUMER_MAX_DELIVERY_ATTEMPTS", 10)?,
            consumer_poll_interval: millis_env("CONSUMER_POLL_INTERVAL_MS", 100)?,
            queue_redelivery_delay: millis_env("QUEUE_REDELIVERY_DELAY_MS", 1000)?,
            queue_visibility_timeout: Duration::from_secs(parse_env(
                "QUEUE_VISIBILITY_TIMEOUT_SECS",
                300,
            )?),
        })
    }
}

/// Read `name`, falling back to `default` when unset
fn parse_env<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(name)),
        Err(_) => Ok(default),
    }
}

fn millis_env(name: &'static str, default_ms: u64) -> Result<Duration, ConfigError> {
    parse_env(name, default_ms).map(Duration::from_millis)
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnv(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(&'static str),
}
