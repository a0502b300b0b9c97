//! PostgreSQL Event Queue
//!
//! Messages are rows of `event_queue`. Consumers claim the oldest visible row
//! of their shard with `FOR UPDATE SKIP LOCKED`; ack deletes the row, nack
//! hands it back with a visibility delay. Rows whose payload cannot be decoded
//! are parked with status `dead`.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::PgPool;

use crate::domain::TransactionEvent;

use super::{Delivery, EventQueue, QueueError, QueueResult};

/// Queue backed by the `event_queue` table
#[derive(Debug, Clone)]
pub struct PgQueue {
    pool: PgPool,
    shard_count: usize,
}

impl PgQueue {
    pub fn new(pool: PgPool, shard_count: usize) -> Self {
        Self {
            pool,
            shard_count: shard_count.max(1),
        }
    }

    fn check_shard(&self, shard: usize) -> QueueResult<i32> {
        if shard >= self.shard_count {
            return Err(QueueError::InvalidShard {
                shard,
                shard_count: self.shard_count,
            });
        }
        Ok(shard as i32)
    }

    /// Returns whether an in-flight row was parked
    async fn park_dead(&self, tag: i64, reason: &str) -> QueueResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE event_queue
            SET status = 'dead', claimed_at = NULL, last_error = $2
            WHERE id = $1 AND status = 'in_flight'
            "#,
        )
        .bind(tag)
        .bind(reason)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl EventQueue for PgQueue {
    fn shard_count(&self) -> usize {
        self.shard_count
    }

    async fn publish(&self, event: &TransactionEvent) -> QueueResult<()> {
        let shard = self.check_shard(self.shard_for(&event.partition()))?;
        let payload = serde_json::to_value(event)?;

        sqlx::query(
            r#"
            INSERT INTO event_queue (event_id, shard, payload, status, attempts, available_at)
            VALUES ($1, $2, $3, 'ready', 0, NOW())
            "#,
        )
        .bind(event.id.as_str())
        .bind(shard)
        .bind(payload)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn receive(&self, shard: usize) -> QueueResult<Option<Delivery>> {
        let shard_id = self.check_shard(shard)?;

        let row: Option<(i64, serde_json::Value, i32)> = sqlx::query_as(
            r#"
            UPDATE event_queue
            SET status = 'in_flight', attempts = attempts + 1, claimed_at = NOW()
            WHERE id = (
                SELECT id FROM event_queue
                WHERE shard = $1 AND status = 'ready' AND available_at <= NOW()
                ORDER BY id
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, payload, attempts
            "#,
        )
        .bind(shard_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some((tag, payload, attempts)) = row else {
            return Ok(None);
        };

        match serde_json::from_value::<TransactionEvent>(payload) {
            Ok(event) => Ok(Some(Delivery {
                tag,
                shard,
                event,
                attempt: attempts.max(1) as u32,
            })),
            Err(e) => {
                tracing::error!(tag, error = %e, "Undecodable queue payload, parking message");
                self.park_dead(tag, &e.to_string()).await?;
                Ok(None)
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) -> QueueResult<()> {
        let result = sqlx::query("DELETE FROM event_queue WHERE id = $1")
            .bind(delivery.tag)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(QueueError::UnknownDelivery(delivery.tag));
        }
        Ok(())
    }

    async fn nack(&self, delivery: &Delivery, delay: Duration) -> QueueResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE event_queue
            SET status = 'ready',
                claimed_at = NULL,
                available_at = NOW() + make_interval(secs => $2)
            WHERE id = $1 AND status = 'in_flight'
            "#,
        )
        .bind(delivery.tag)
        .bind(delay.as_secs_f64())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(QueueError::UnknownDelivery(delivery.tag));
        }
        Ok(())
    }

    async fn dead_letter(&self, delivery: &Delivery, reason: &str) -> QueueResult<()> {
        if !self.park_dead(delivery.tag, reason).await? {
            return Err(QueueError::UnknownDelivery(delivery.tag));
        }
        tracing::warn!(
            tag = delivery.tag,
            event_id = %delivery.event.id,
            attempt = delivery.attempt,
            reason,
            "Message parked as dead"
        );
        Ok(())
    }

    async fn requeue_stale(&self, visibility_timeout: Duration) -> QueueResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE event_queue
            SET status = 'ready', claimed_at = NULL, available_at = NOW()
            WHERE status = 'in_flight'
              AND claimed_at < NOW() - make_interval(secs => $1)
            "#,
        )
        .bind(visibility_timeout.as_secs_f64())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
