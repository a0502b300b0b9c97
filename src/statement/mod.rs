//! Statement Service
//!
//! Rebuilds a partition's history for a period. Entries are ordered
//! logically (processed_at, created_at, sequence_number) and running balances
//! are recomputed in that order from the partition's opening balance, so late
//! arrivals land where they belong instead of where they were appended.

mod period;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::domain::{
    Amount, Balance, Direction, EventId, LedgerEntry, PartitionKey, TransactionMetadata,
    TransactionType,
};
use crate::store::LedgerStore;

pub use period::Period;

/// Statement query failures
#[derive(Debug, thiserror::Error)]
pub enum StatementError {
    /// Period start is not before its end
    #[error("Invalid period: start {start} must be before end {end}")]
    InvalidPeriod { start: NaiveDate, end: NaiveDate },

    /// Period bound is not a `YYYY-MM-DD` date
    #[error("Malformed date: {0}")]
    MalformedDate(String),

    /// Store failed or did not answer in time; no partial result is returned
    #[error("Statement unavailable: {0}")]
    Unavailable(String),
}

/// One statement row
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatementLine {
    pub event_id: EventId,
    #[serde(rename = "type")]
    pub transaction_type: TransactionType,
    pub direction: Direction,
    pub amount: Amount,
    /// Balance after this entry in logical order
    pub running_balance: Balance,
    pub processed_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub sequence_number: i64,
    pub late: bool,
    pub metadata: TransactionMetadata,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reported_balance: Option<Decimal>,
}

/// Period-bounded view of a partition
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Statement {
    pub partition: PartitionKey,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub opening_balance: Balance,
    pub closing_balance: Balance,
    pub entries: Vec<StatementLine>,
    pub generated_at: DateTime<Utc>,
}

/// Read-only statement queries over the ledger store
#[derive(Clone)]
pub struct StatementService {
    store: Arc<dyn LedgerStore>,
    read_timeout: Duration,
}

impl StatementService {
    pub fn new(store: Arc<dyn LedgerStore>, read_timeout: Duration) -> Self {
        Self {
            store,
            read_timeout,
        }
    }

    /// Statement of `partition` over `period`.
    ///
    /// Returns `Ok(None)` when the partition has never transacted.
    pub async fn get_statement(
        &self,
        partition: &PartitionKey,
        period: &Period,
    ) -> Result<Option<Statement>, StatementError> {
        let read = async {
            let tail = self.store.load_tail(partition).await?;
            let entries = self.store.entries(partition).await?;
            Ok::<_, crate::store::StoreError>((tail, entries))
        };

        let (tail, entries) = tokio::time::timeout(self.read_timeout, read)
            .await
            .map_err(|_| {
                StatementError::Unavailable(format!(
                    "read not completed within {}ms",
                    self.read_timeout.as_millis()
                ))
            })?
            .map_err(|e| StatementError::Unavailable(e.to_string()))?;

        if entries.is_empty() {
            return Ok(None);
        }

        let statement = build_statement(partition, period, tail.opening_balance, entries);

        tracing::debug!(
            partition = %partition,
            period_start = %statement.period_start,
            period_end = %statement.period_end,
            entries = statement.entries.len(),
            "Statement generated"
        );

        Ok(Some(statement))
    }

    /// Single ledger entry by event id
    pub async fn entry(&self, event_id: &EventId) -> Result<Option<LedgerEntry>, StatementError> {
        tokio::time::timeout(self.read_timeout, self.store.find_entry(event_id))
            .await
            .map_err(|_| StatementError::Unavailable("entry lookup timed out".to_string()))?
            .map_err(|e| StatementError::Unavailable(e.to_string()))
    }
}

/// Sort, recompute and cut the full history down to the period
fn build_statement(
    partition: &PartitionKey,
    period: &Period,
    partition_opening: Balance,
    mut entries: Vec<LedgerEntry>,
) -> Statement {
    entries.sort_by(|a, b| a.logical_cmp(b));

    let mut balance = partition_opening;
    let mut opening_balance = partition_opening;
    let mut lines = Vec::new();

    for entry in entries {
        balance = balance.apply(entry.direction, &entry.amount);

        if entry.processed_at < period.start() {
            opening_balance = balance;
        } else if period.contains(entry.processed_at) {
            lines.push(StatementLine {
                event_id: entry.event_id,
                transaction_type: entry.transaction_type,
                direction: entry.direction,
                amount: entry.amount,
                running_balance: balance,
                processed_at: entry.processed_at,
                created_at: entry.created_at,
                sequence_number: entry.sequence_number,
                late: entry.late,
                metadata: entry.metadata,
                reported_balance: entry.reported_balance,
            });
        } else {
            // sorted: nothing after this falls inside the period
            break;
        }
    }

    let closing_balance = lines
        .last()
        .map(|line| line.running_balance)
        .unwrap_or(opening_balance);

    Statement {
        partition: partition.clone(),
        period_start: period.start(),
        period_end: period.end(),
        opening_balance,
        closing_balance,
        entries: lines,
        generated_at: Utc::now(),
    }
}
