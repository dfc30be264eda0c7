//! Terminal sink for permanently failed dead-letter envelopes.
//!
//! Rows here are the end of the line: the envelope spent its retry budget
//! and will never be retried automatically. The list/count accessors exist
//! for operators and monitoring.

use crate::classify_sqlx;
use chrono::{DateTime, Utc};
use flashdrop_core::dlq::{DlqEnvelope, DlqError, FailureSink};
use sqlx::{PgPool, Row};
use std::future::Future;
use std::pin::Pin;

/// A row in the terminal failure table.
#[derive(Debug, Clone)]
pub struct TerminalFailure {
    /// Row id.
    pub id: i64,
    /// Event type of the failed event.
    pub event_type: String,
    /// Serialized event payload.
    pub payload: Vec<u8>,
    /// Reason of the final failed attempt.
    pub reason: String,
    /// When the final attempt failed.
    pub failed_at: DateTime<Utc>,
    /// Resubmissions attempted before giving up.
    pub retry_count: i32,
    /// When the failure was recorded in the sink.
    pub recorded_at: DateTime<Utc>,
}

/// PostgreSQL-backed terminal failure sink.
pub struct PgFailureSink {
    pool: PgPool,
}

impl PgFailureSink {
    /// Create a sink over the given connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// List the most recently recorded terminal failures.
    ///
    /// # Errors
    ///
    /// Returns [`DlqError::Sink`] on database failure.
    pub async fn list_recent(&self, limit: usize) -> Result<Vec<TerminalFailure>, DlqError> {
        #[allow(clippy::cast_possible_wrap)] // Listing limits are small
        let rows = sqlx::query(
            r"
            SELECT id, event_type, payload, reason, failed_at, retry_count, recorded_at
            FROM terminal_failures
            ORDER BY recorded_at DESC
            LIMIT $1
            ",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| DlqError::Sink(classify_sqlx(&e).to_string()))?;

        Ok(rows
            .iter()
            .map(|row| TerminalFailure {
                id: row.get("id"),
                event_type: row.get("event_type"),
                payload: row.get("payload"),
                reason: row.get("reason"),
                failed_at: row.get("failed_at"),
                retry_count: row.get("retry_count"),
                recorded_at: row.get("recorded_at"),
            })
            .collect())
    }

    /// Count of recorded terminal failures.
    ///
    /// # Errors
    ///
    /// Returns [`DlqError::Sink`] on database failure.
    pub async fn count(&self) -> Result<i64, DlqError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM terminal_failures")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| DlqError::Sink(classify_sqlx(&e).to_string()))?;
        Ok(count)
    }
}

impl FailureSink for PgFailureSink {
    fn record(
        &self,
        envelope: &DlqEnvelope,
    ) -> Pin<Box<dyn Future<Output = Result<(), DlqError>> + Send + '_>> {
        let envelope = envelope.clone();
        Box::pin(async move {
            #[allow(clippy::cast_possible_wrap)] // Retry counts are tiny
            sqlx::query(
                r"
                INSERT INTO terminal_failures
                    (event_type, payload, reason, failed_at, retry_count)
                VALUES ($1, $2, $3, $4, $5)
                ",
            )
            .bind(&envelope.event.event_type)
            .bind(&envelope.event.payload)
            .bind(&envelope.reason)
            .bind(envelope.failed_at)
            .bind(envelope.retry_count as i32)
            .execute(&self.pool)
            .await
            .map_err(|e| DlqError::Sink(classify_sqlx(&e).to_string()))?;

            tracing::error!(
                event_type = %envelope.event.event_type,
                reason = %envelope.reason,
                retry_count = envelope.retry_count,
                "Permanent delivery failure recorded (manual follow-up required)"
            );
            metrics::counter!(
                "dlq_terminal_total",
                "event_type" => envelope.event.event_type.clone()
            )
            .increment(1);

            Ok(())
        })
    }
}
