//! Common test utilities

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use statement_ledger::consumer::{ConsumerPool, LedgerConsumer, RetryPolicy};
use statement_ledger::domain::{OperationContext, RawTransactionEvent, TransactionMetadata};
use statement_ledger::gateway::IntakeGateway;
use statement_ledger::queue::InMemoryQueue;
use statement_ledger::statement::StatementService;
use statement_ledger::store::InMemoryLedgerStore;

/// Setup test database - truncate ledger tables
pub async fn setup_test_db() -> PgPool {
    dotenvy::dotenv().ok();
    let database_url = std::env::var("DATABASE_URL")
        .expect("DATABASE_URL must be set for tests");

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .expect("Failed to connect to DB");

    sqlx::query("TRUNCATE TABLE ledger_entries, partition_tails, event_queue RESTART IDENTITY")
        .execute(&pool)
        .await
        .expect("Failed to clean up DB");

    pool
}

/// Gateway, consumers and statements wired over in-memory backends
pub struct Harness {
    pub store: Arc<InMemoryLedgerStore>,
    pub queue: Arc<InMemoryQueue>,
    pub gateway: IntakeGateway,
    pub workers: ConsumerPool,
    pub statements: StatementService,
}

impl Harness {
    pub fn new(shards: usize) -> Self {
        let store = Arc::new(InMemoryLedgerStore::new());
        let queue = Arc::new(InMemoryQueue::new(shards));

        let policy = RetryPolicy {
            base_delay: Duration::from_millis(1),
            ..RetryPolicy::default()
        };
        let consumer = Arc::new(LedgerConsumer::new(store.clone(), policy));

        Self {
            gateway: IntakeGateway::new(queue.clone(), Duration::from_secs(1)),
            workers: ConsumerPool::new(consumer, queue.clone(), Duration::from_millis(5)),
            statements: StatementService::new(store.clone(), Duration::from_secs(1)),
            store,
            queue,
        }
    }

    /// Submit and panic on anything but acceptance
    pub async fn accept(&self, raw: RawTransactionEvent) {
        self.gateway
            .submit(raw, &OperationContext::new())
            .await
            .expect("event accepted");
    }
}

pub fn at(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, day, hour, 0, 0).unwrap()
}

/// Raw credit/debit event for user-123's BRL Brazilian account
pub fn raw_event(
    id: &str,
    direction: &str,
    amount: Decimal,
    processed_at: DateTime<Utc>,
) -> RawTransactionEvent {
    RawTransactionEvent {
        id: Some(id.to_string()),
        user_id: Some("user-123".to_string()),
        account: Some("CONTA BRASILEIRA".to_string()),
        currency: Some("BRL".to_string()),
        transaction_type: Some("PIX".to_string()),
        direction: Some(direction.to_string()),
        amount: Some(amount),
        balance: None,
        metadata: Some(TransactionMetadata {
            description: format!("event {id}"),
            ..TransactionMetadata::default()
        }),
        processed_at: Some(processed_at),
        created_at: Some(processed_at),
    }
}
