//! Error handling module
//!
//! Centralized error types and HTTP response conversion.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::domain::RejectionReason;
use crate::gateway::IntakeError;
use crate::statement::StatementError;
use crate::store::StoreError;

/// Application error types
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    // Client errors (4xx)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Event rejected: {0}")]
    Rejected(RejectionReason),

    #[error("{0}")]
    InvalidPeriod(String),

    #[error("No statement for partition {0}")]
    StatementNotFound(String),

    #[error("Transaction not found: {0}")]
    TransactionNotFound(String),

    #[error("Partition already has entries: {0}")]
    PartitionNotEmpty(String),

    // Server errors (5xx)
    #[error("Event could not be enqueued: {0}")]
    PublishUnavailable(String),

    #[error("Statement unavailable: {0}")]
    StatementUnavailable(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<IntakeError> for AppError {
    fn from(err: IntakeError) -> Self {
        match err {
            IntakeError::Rejected(reason) => AppError::Rejected(reason),
            IntakeError::TransientPublish { .. } => AppError::PublishUnavailable(err.to_string()),
        }
    }
}

impl From<StatementError> for AppError {
    fn from(err: StatementError) -> Self {
        match err {
            StatementError::InvalidPeriod { .. } | StatementError::MalformedDate(_) => {
                AppError::InvalidPeriod(err.to_string())
            }
            StatementError::Unavailable(msg) => AppError::StatementUnavailable(msg),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::PartitionNotEmpty(partition) => {
                AppError::PartitionNotEmpty(partition.to_string())
            }
            StoreError::Database(e) => AppError::Database(e),
            other => AppError::Internal(other.to_string()),
        }
    }
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code, details) = match &self {
            // 400 Bad Request
            AppError::InvalidRequest(msg) => {
                (StatusCode::BAD_REQUEST, "invalid_request", Some(msg.clone()))
            }
            AppError::InvalidPeriod(msg) => {
                (StatusCode::BAD_REQUEST, "invalid_period", Some(msg.clone()))
            }

            // 404 Not Found
            AppError::StatementNotFound(partition) => {
                (StatusCode::NOT_FOUND, "statement_not_found", Some(partition.clone()))
            }
            AppError::TransactionNotFound(id) => {
                (StatusCode::NOT_FOUND, "transaction_not_found", Some(id.clone()))
            }

            // 409 Conflict
            AppError::PartitionNotEmpty(partition) => {
                (StatusCode::CONFLICT, "partition_not_empty", Some(partition.clone()))
            }

            // 422 Unprocessable Entity
            AppError::Rejected(reason) => {
                (StatusCode::UNPROCESSABLE_ENTITY, reason.code(), Some(reason.to_string()))
            }

            // 503 Service Unavailable: safe to retry
            AppError::PublishUnavailable(msg) => {
                tracing::warn!("Publish unavailable: {}", msg);
                (StatusCode::SERVICE_UNAVAILABLE, "publish_unavailable", None)
            }
            AppError::StatementUnavailable(msg) => {
                tracing::warn!("Statement unavailable: {}", msg);
                (StatusCode::SERVICE_UNAVAILABLE, "statement_unavailable", None)
            }

            // 500 Internal Server Error
            AppError::Database(e) => {
                tracing::error!("Database error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "database_error", None)
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", None)
            }
        };

        let body = ErrorResponse {
            error: self.to_string(),
            error_code: error_code.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}
