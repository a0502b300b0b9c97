//! statement_ledger Library
//!
//! Transaction ledger and statement engine: validated intake onto a sharded
//! queue, exactly-once application of events to per-partition running
//! balances, and period statements rebuilt in logical order.

pub mod api;
pub mod consumer;
pub mod domain;
pub mod gateway;
pub mod jobs;
pub mod queue;
pub mod statement;
pub mod store;
pub mod validation;

pub mod config;
pub mod db;
mod error;

pub use config::Config;
pub use error::AppError;
pub use domain::{
    Amount, AmountError, Balance, EventId, LedgerEntry, OperationContext, PartitionKey,
    RejectionReason, TransactionEvent,
};
