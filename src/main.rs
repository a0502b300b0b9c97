//! statement_ledger - transaction ledger and statement service
//!
//! Runs the HTTP API (event intake, statements), the partition-sticky
//! consumer workers and queue maintenance, or any subset selected by
//! `RUN_MODE`.

use std::net::SocketAddr;
use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use statement_ledger::api::{self, AppState};
use statement_ledger::consumer::{ConsumerPool, LedgerConsumer, RetryPolicy};
use statement_ledger::db;
use statement_ledger::gateway::IntakeGateway;
use statement_ledger::jobs::{JobScheduler, JobSchedulerConfig};
use statement_ledger::queue::{EventQueue, PgQueue};
use statement_ledger::statement::StatementService;
use statement_ledger::store::{LedgerStore, PgLedgerStore};
use statement_ledger::Config;

/// Initialize tracing/logging. `LOG_FORMAT=json` switches to JSON lines.
fn init_tracing() {
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "statement_ledger=debug,tower_http=debug".into()),
        )
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(|| tracing_subscriber::fmt::layer()))
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    init_tracing();

    let config = Config::from_env()?;
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;

    tracing::info!(
        run_mode = ?config.run_mode,
        environment = %config.environment,
        queue_shards = config.queue_shards,
        "Starting statement_ledger"
    );
    tracing::info!("Connecting to database...");

    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(&config.database_url)
        .await?;

    db::verify_connection(&pool).await?;
    if !db::check_schema(&pool).await? {
        tracing::error!("Database schema is not complete. Please run migrations.");
        return Err(anyhow::anyhow!("Database schema incomplete"));
    }

    tracing::info!("Database connected successfully");

    let store: Arc<dyn LedgerStore> = Arc::new(PgLedgerStore::new(pool.clone()));
    let queue: Arc<dyn EventQueue> = Arc::new(PgQueue::new(pool.clone(), config.queue_shards));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut background = Vec::new();

    if config.run_mode.runs_consumers() {
        let consumer = Arc::new(LedgerConsumer::new(
            store.clone(),
            RetryPolicy::from_config(&config),
        ));
        let workers = ConsumerPool::new(consumer, queue.clone(), config.consumer_poll_interval);
        background.extend(workers.spawn(shutdown_rx.clone()));

        let scheduler = JobScheduler::with_config(
            queue.clone(),
            JobSchedulerConfig::from_config(&config),
        );
        background.push(scheduler.start(shutdown_rx.clone()));
    }

    if config.run_mode.serves_api() {
        let state = AppState {
            gateway: IntakeGateway::new(queue.clone(), config.publish_timeout),
            statements: StatementService::new(store.clone(), config.statement_timeout),
            store: store.clone(),
        };
        let app = api::build_router(state);

        tracing::info!("Listening on http://{}", addr);
        let listener = tokio::net::TcpListener::bind(addr).await?;

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
    } else {
        shutdown_signal().await;
    }

    // Workers finish the message in hand, then exit
    tracing::info!("Shutting down...");
    let _ = shutdown_tx.send(true);
    for handle in background {
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "Background task ended abnormally");
        }
    }

    pool.close().await;
    tracing::info!("Database connections closed. Goodbye!");

    Ok(())
}

/// Shutdown signal handler for graceful shutdown
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        },
    }
}
