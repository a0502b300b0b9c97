//! API Routes
//!
//! HTTP endpoint definitions.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Extension, Path, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::{
    AccountType, Balance, CurrencyType, EventId, LedgerEntry, OperationContext, PartitionKey,
    RawTransactionEvent,
};
use crate::error::AppError;
use crate::gateway::{AcceptedReceipt, IntakeGateway};
use crate::statement::{Period, Statement, StatementService};
use crate::store::LedgerStore;
use crate::validation;

/// Shared state of the HTTP surface
#[derive(Clone)]
pub struct AppState {
    pub gateway: IntakeGateway,
    pub statements: StatementService,
    pub store: Arc<dyn LedgerStore>,
}

// =========================================================================
// Request/Response types
// =========================================================================

#[derive(Debug, Deserialize)]
pub struct StatementPath {
    pub user_id: String,
    pub account: String,
    pub currency: String,
    pub start: String,
    pub end: String,
}

#[derive(Debug, Deserialize)]
pub struct PartitionPath {
    pub user_id: String,
    pub account: String,
    pub currency: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OpeningBalanceRequest {
    pub opening_balance: Decimal,
}

#[derive(Debug, Serialize)]
pub struct OpeningBalanceResponse {
    pub partition: PartitionKey,
    pub opening_balance: Balance,
}

// =========================================================================
// API Router
// =========================================================================

/// Create the API router
pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/events", post(submit_event))
        .route("/transactions/:event_id", get(get_transaction))
        .route(
            "/statement/:user_id/:account/:currency/:start/:end",
            get(get_statement),
        )
        .route(
            "/partitions/:user_id/:account/:currency/opening-balance",
            put(seed_opening_balance),
        )
}

// =========================================================================
// POST /events
// =========================================================================

/// Validate and enqueue a transaction event
async fn submit_event(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    payload: Result<Json<RawTransactionEvent>, JsonRejection>,
) -> Result<(StatusCode, Json<AcceptedReceipt>), AppError> {
    let Json(raw) = payload.map_err(|e| AppError::InvalidRequest(e.body_text()))?;

    let receipt = state.gateway.submit(raw, &context).await?;

    Ok((StatusCode::ACCEPTED, Json(receipt)))
}

// =========================================================================
// GET /transactions/:event_id
// =========================================================================

/// Look up the ledger entry recorded for an event
async fn get_transaction(
    State(state): State<AppState>,
    Path(event_id): Path<String>,
) -> Result<Json<LedgerEntry>, AppError> {
    let event_id = EventId::new(event_id);

    state
        .statements
        .entry(&event_id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::TransactionNotFound(event_id.to_string()))
}

// =========================================================================
// GET /statement/:user_id/:account/:currency/:start/:end
// =========================================================================

/// Statement of one partition over `[start, end)`
async fn get_statement(
    State(state): State<AppState>,
    Path(path): Path<StatementPath>,
) -> Result<Json<Statement>, AppError> {
    let partition = parse_partition(&path.user_id, &path.account, &path.currency)?;
    let period = Period::parse(&path.start, &path.end)?;

    state
        .statements
        .get_statement(&partition, &period)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::StatementNotFound(partition.to_string()))
}

// =========================================================================
// PUT /partitions/:user_id/:account/:currency/opening-balance
// =========================================================================

/// Seed the balance a partition starts from. Only allowed before its first entry.
async fn seed_opening_balance(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Path(path): Path<PartitionPath>,
    payload: Result<Json<OpeningBalanceRequest>, JsonRejection>,
) -> Result<Json<OpeningBalanceResponse>, AppError> {
    let Json(request) = payload.map_err(|e| AppError::InvalidRequest(e.body_text()))?;
    let partition = parse_partition(&path.user_id, &path.account, &path.currency)?;
    let opening_balance = Balance::new(request.opening_balance);

    state
        .store
        .seed_opening_balance(&partition, opening_balance)
        .await?;

    tracing::info!(
        correlation_id = ?context.correlation_id,
        partition = %partition,
        opening_balance = %opening_balance,
        "Opening balance seeded"
    );

    Ok(Json(OpeningBalanceResponse {
        partition,
        opening_balance,
    }))
}

fn parse_partition(user_id: &str, account: &str, currency: &str) -> Result<PartitionKey, AppError> {
    let account: AccountType = account
        .parse()
        .map_err(|e: crate::domain::UnknownVariant| AppError::InvalidRequest(e.to_string()))?;
    let currency: CurrencyType = currency
        .parse()
        .map_err(|e: crate::domain::UnknownVariant| AppError::InvalidRequest(e.to_string()))?;

    let user_id = validation::well_formed(user_id, "user_id")
        .map_err(|e| AppError::InvalidRequest(e.to_string()))?;

    Ok(PartitionKey::new(user_id, account, currency))
}
