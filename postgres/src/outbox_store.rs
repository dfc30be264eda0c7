//! The events-to-publish table drained by the outbox relay.

use crate::classify_sqlx;
use flashdrop_core::outbox::{
    MAX_OUTBOX_RETRIES, OutboxError, OutboxEvent, OutboxStatus, OutboxStore,
};
use sqlx::{PgPool, Row};
use std::future::Future;
use std::pin::Pin;

/// PostgreSQL-backed outbox store.
pub struct PgOutboxStore {
    pool: PgPool,
}

impl PgOutboxStore {
    /// Create a store over the given connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Count of events stuck FAILED at the retry maximum. Operator signal;
    /// exposed for health checks and alerting.
    ///
    /// # Errors
    ///
    /// Returns [`OutboxError::Store`] on database failure.
    pub async fn count_exhausted(&self) -> Result<i64, OutboxError> {
        let (count,): (i64,) = sqlx::query_as(
            r"
            SELECT COUNT(*)
            FROM outbox_events
            WHERE status = 'FAILED' AND retry_count >= $1
            ",
        )
        .bind(MAX_OUTBOX_RETRIES)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| OutboxError::Store(classify_sqlx(&e).to_string()))?;

        Ok(count)
    }

    async fn fetch_by(
        &self,
        status: OutboxStatus,
        only_retryable: bool,
        limit: usize,
    ) -> Result<Vec<OutboxEvent>, OutboxError> {
        #[allow(clippy::cast_possible_wrap)] // Batch limits are small
        let rows = sqlx::query(
            r"
            SELECT id, event_type, payload, status, retry_count, created_at
            FROM outbox_events
            WHERE status = $1 AND ($2 = FALSE OR retry_count < $3)
            ORDER BY created_at ASC
            LIMIT $4
            ",
        )
        .bind(status.as_str())
        .bind(only_retryable)
        .bind(MAX_OUTBOX_RETRIES)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| OutboxError::Store(classify_sqlx(&e).to_string()))?;

        rows.iter()
            .map(|row| {
                let status_str: String = row.get("status");
                Ok(OutboxEvent {
                    id: row.get("id"),
                    event_type: row.get("event_type"),
                    payload: row.get("payload"),
                    status: OutboxStatus::parse(&status_str)?,
                    retry_count: row.get("retry_count"),
                    created_at: row.get("created_at"),
                })
            })
            .collect()
    }
}

impl OutboxStore for PgOutboxStore {
    fn fetch_pending(
        &self,
        limit: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<OutboxEvent>, OutboxError>> + Send + '_>> {
        Box::pin(self.fetch_by(OutboxStatus::Pending, false, limit))
    }

    fn fetch_retryable_failed(
        &self,
        limit: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<OutboxEvent>, OutboxError>> + Send + '_>> {
        Box::pin(self.fetch_by(OutboxStatus::Failed, true, limit))
    }

    fn mark_processed(
        &self,
        id: i64,
    ) -> Pin<Box<dyn Future<Output = Result<(), OutboxError>> + Send + '_>> {
        Box::pin(async move {
            sqlx::query(
                r"
                UPDATE outbox_events
                SET status = 'PROCESSED', processed_at = NOW()
                WHERE id = $1
                ",
            )
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| OutboxError::Store(classify_sqlx(&e).to_string()))?;

            tracing::debug!(outbox_id = id, "Outbox event processed");
            metrics::counter!("outbox_processed_total").increment(1);

            Ok(())
        })
    }

    fn record_failure(
        &self,
        id: i64,
    ) -> Pin<Box<dyn Future<Output = Result<i32, OutboxError>> + Send + '_>> {
        Box::pin(async move {
            // LEAST caps the count at the maximum so the table CHECK and the
            // retry-boundedness invariant hold even under double sweeps.
            let (retry_count,): (i32,) = sqlx::query_as(
                r"
                UPDATE outbox_events
                SET status = 'FAILED', retry_count = LEAST(retry_count + 1, $2)
                WHERE id = $1
                RETURNING retry_count
                ",
            )
            .bind(id)
            .bind(MAX_OUTBOX_RETRIES)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| OutboxError::Store(classify_sqlx(&e).to_string()))?;

            if retry_count >= MAX_OUTBOX_RETRIES {
                tracing::warn!(
                    outbox_id = id,
                    retry_count = retry_count,
                    "Outbox event exhausted its retry budget (operator follow-up required)"
                );
                metrics::counter!("outbox_exhausted_total").increment(1);
            } else {
                tracing::warn!(outbox_id = id, retry_count = retry_count, "Outbox event failed");
                metrics::counter!("outbox_failed_total").increment(1);
            }

            Ok(retry_count)
        })
    }
}
