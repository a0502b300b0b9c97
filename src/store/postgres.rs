//! PostgreSQL Ledger Store
//!
//! Entries live in `ledger_entries`, one row per applied event, keyed by
//! event id. `partition_tails` holds one row per partition and is the
//! compare-and-swap target for appends.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Row, Transaction};

use crate::domain::{
    Amount, Balance, EventId, LedgerEntry, PartitionKey, PartitionTail, TransactionMetadata,
};

use super::{LedgerStore, StoreError, StoreResult};

const ENTRY_PRIMARY_KEY: &str = "ledger_entries_pkey";

const ENTRY_COLUMNS: &str = r#"
    event_id, user_id, account, currency, sequence_number, transaction_type,
    direction, amount, running_balance, processed_at, created_at, late,
    metadata, reported_balance, fingerprint, recorded_at
"#;

/// Ledger store backed by PostgreSQL
#[derive(Debug, Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    // =========================================================================
    // Tail compare-and-swap
    // =========================================================================

    /// Move the tail from `expected_sequence` to the entry. Returns false when
    /// another writer got there first, or a seed changed the balance the entry
    /// was computed from.
    async fn swap_tail(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        entry: &LedgerEntry,
        expected_sequence: i64,
    ) -> StoreResult<bool> {
        let partition = &entry.partition;

        let result = if expected_sequence == 0 {
            // First entry: the row may be missing or only seeded
            sqlx::query(
                r#"
                INSERT INTO partition_tails (
                    user_id, account, currency, sequence_number,
                    running_balance, latest_processed_at, opening_balance
                )
                VALUES ($1, $2, $3, $4, $5, $6, 0)
                ON CONFLICT (user_id, account, currency) DO UPDATE
                SET sequence_number = EXCLUDED.sequence_number,
                    running_balance = EXCLUDED.running_balance,
                    latest_processed_at = EXCLUDED.latest_processed_at,
                    updated_at = NOW()
                WHERE partition_tails.sequence_number = 0
                  AND partition_tails.running_balance = $7
                "#,
            )
            .bind(&partition.user_id)
            .bind(partition.account.as_str())
            .bind(partition.currency.as_str())
            .bind(entry.sequence_number)
            .bind(entry.running_balance.value())
            .bind(entry.processed_at)
            .bind(entry.previous_balance())
            .execute(&mut **tx)
            .await?
        } else {
            sqlx::query(
                r#"
                UPDATE partition_tails
                SET sequence_number = $4,
                    running_balance = $5,
                    latest_processed_at = GREATEST(latest_processed_at, $6),
                    updated_at = NOW()
                WHERE user_id = $1 AND account = $2 AND currency = $3
                  AND sequence_number = $7
                  AND running_balance = $8
                "#,
            )
            .bind(&partition.user_id)
            .bind(partition.account.as_str())
            .bind(partition.currency.as_str())
            .bind(entry.sequence_number)
            .bind(entry.running_balance.value())
            .bind(entry.processed_at)
            .bind(expected_sequence)
            .bind(entry.previous_balance())
            .execute(&mut **tx)
            .await?
        };

        Ok(result.rows_affected() == 1)
    }

    async fn insert_entry(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        entry: &LedgerEntry,
    ) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO ledger_entries (
                event_id, user_id, account, currency, sequence_number, transaction_type,
                direction, amount, running_balance, processed_at, created_at, late,
                metadata, reported_balance, fingerprint, recorded_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(entry.event_id.as_str())
        .bind(&entry.partition.user_id)
        .bind(entry.partition.account.as_str())
        .bind(entry.partition.currency.as_str())
        .bind(entry.sequence_number)
        .bind(entry.transaction_type.as_str())
        .bind(entry.direction.as_str())
        .bind(entry.amount.value())
        .bind(entry.running_balance.value())
        .bind(entry.processed_at)
        .bind(entry.created_at)
        .bind(entry.late)
        .bind(Json(&entry.metadata))
        .bind(entry.reported_balance)
        .bind(&entry.fingerprint)
        .bind(entry.recorded_at)
        .execute(&mut **tx)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_err))
                if db_err.is_unique_violation()
                    && db_err.constraint() == Some(ENTRY_PRIMARY_KEY) =>
            {
                Err(StoreError::DuplicateEvent(entry.event_id.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn current_sequence(&self, partition: &PartitionKey) -> StoreResult<i64> {
        let sequence: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT sequence_number FROM partition_tails
            WHERE user_id = $1 AND account = $2 AND currency = $3
            "#,
        )
        .bind(&partition.user_id)
        .bind(partition.account.as_str())
        .bind(partition.currency.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(sequence.unwrap_or(0))
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn find_entry(&self, event_id: &EventId) -> StoreResult<Option<LedgerEntry>> {
        let query = format!("SELECT {ENTRY_COLUMNS} FROM ledger_entries WHERE event_id = $1");
        let row = sqlx::query(&query)
            .bind(event_id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(entry_from_row).transpose()
    }

    async fn load_tail(&self, partition: &PartitionKey) -> StoreResult<PartitionTail> {
        let row: Option<(i64, Decimal, Option<DateTime<Utc>>, Decimal)> = sqlx::query_as(
            r#"
            SELECT sequence_number, running_balance, latest_processed_at, opening_balance
            FROM partition_tails
            WHERE user_id = $1 AND account = $2 AND currency = $3
            "#,
        )
        .bind(&partition.user_id)
        .bind(partition.account.as_str())
        .bind(partition.currency.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(match row {
            Some((sequence_number, running_balance, latest_processed_at, opening_balance)) => {
                PartitionTail {
                    partition: partition.clone(),
                    sequence_number,
                    running_balance: Balance::new(running_balance),
                    latest_processed_at,
                    opening_balance: Balance::new(opening_balance),
                }
            }
            None => PartitionTail::empty(partition.clone()),
        })
    }

    async fn append(&self, entry: &LedgerEntry, expected_sequence: i64) -> StoreResult<()> {
        if entry.sequence_number != expected_sequence + 1 {
            return Err(StoreError::PartitionConflict {
                partition: entry.partition.clone(),
                expected: expected_sequence,
                actual: entry.sequence_number - 1,
            });
        }

        let mut tx = self.pool.begin().await?;

        if !self.swap_tail(&mut tx, entry, expected_sequence).await? {
            tx.rollback().await?;
            let actual = self.current_sequence(&entry.partition).await?;
            return Err(StoreError::PartitionConflict {
                partition: entry.partition.clone(),
                expected: expected_sequence,
                actual,
            });
        }

        self.insert_entry(&mut tx, entry).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn entries(&self, partition: &PartitionKey) -> StoreResult<Vec<LedgerEntry>> {
        let query = format!(
            "SELECT {ENTRY_COLUMNS} FROM ledger_entries \
             WHERE user_id = $1 AND account = $2 AND currency = $3 \
             ORDER BY sequence_number ASC"
        );
        let rows = sqlx::query(&query)
            .bind(&partition.user_id)
            .bind(partition.account.as_str())
            .bind(partition.currency.as_str())
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(entry_from_row).collect()
    }

    async fn seed_opening_balance(
        &self,
        partition: &PartitionKey,
        opening_balance: Balance,
    ) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO partition_tails (
                user_id, account, currency, sequence_number,
                running_balance, latest_processed_at, opening_balance
            )
            VALUES ($1, $2, $3, 0, $4, NULL, $4)
            ON CONFLICT (user_id, account, currency) DO UPDATE
            SET running_balance = EXCLUDED.running_balance,
                opening_balance = EXCLUDED.opening_balance,
                updated_at = NOW()
            WHERE partition_tails.sequence_number = 0
            "#,
        )
        .bind(&partition.user_id)
        .bind(partition.account.as_str())
        .bind(partition.currency.as_str())
        .bind(opening_balance.value())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::PartitionNotEmpty(partition.clone()));
        }

        tracing::info!(
            partition = %partition,
            opening_balance = %opening_balance.value(),
            "Opening balance seeded"
        );
        Ok(())
    }
}

fn parse_column<T>(row: &PgRow, column: &str) -> StoreResult<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let raw: String = row.try_get(column)?;
    raw.parse()
        .map_err(|e: T::Err| StoreError::Corrupt(format!("{column}: {e}")))
}

fn entry_from_row(row: &PgRow) -> StoreResult<LedgerEntry> {
    let event_id: String = row.try_get("event_id")?;
    let user_id: String = row.try_get("user_id")?;
    let amount: Decimal = row.try_get("amount")?;
    let metadata: Json<TransactionMetadata> = row.try_get("metadata")?;

    let amount = Amount::try_from(amount)
        .map_err(|e| StoreError::Corrupt(format!("amount of {event_id}: {e}")))?;

    Ok(LedgerEntry {
        partition: PartitionKey::new(
            user_id,
            parse_column(row, "account")?,
            parse_column(row, "currency")?,
        ),
        transaction_type: parse_column(row, "transaction_type")?,
        direction: parse_column(row, "direction")?,
        amount,
        running_balance: Balance::new(row.try_get("running_balance")?),
        sequence_number: row.try_get("sequence_number")?,
        processed_at: row.try_get("processed_at")?,
        created_at: row.try_get("created_at")?,
        late: row.try_get("late")?,
        metadata: metadata.0,
        reported_balance: row.try_get("reported_balance")?,
        fingerprint: row.try_get("fingerprint")?,
        recorded_at: row.try_get("recorded_at")?,
        event_id: EventId::new(event_id),
    })
}
