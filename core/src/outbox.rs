//! Transactional outbox: durable "events to publish" decoupling business
//! commit from message delivery.
//!
//! An [`OutboxEvent`] row is written in the same transaction as the business
//! mutation it describes (see `CampaignStore::issue_grant`), with status
//! PENDING and retry count 0. A background relay drains the table: it runs
//! each event's downstream effect and marks it PROCESSED, or records the
//! failure. Rows that exhaust [`MAX_OUTBOX_RETRIES`] stay FAILED forever -
//! an operator signal, never a silent success.

use crate::types::{CampaignId, GrantId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Fixed retry budget for outbox events. Once `retry_count` reaches this,
/// the event is terminal and never selected again.
pub const MAX_OUTBOX_RETRIES: i32 = 3;

/// Event type of the coupon-issued outbox event.
pub const COUPON_ISSUED: &str = "coupon.issued";

/// An event destined for another system, serialized for the boundary.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainEvent {
    /// Stable event type identifier (e.g. `"coupon.issued"`).
    pub event_type: String,
    /// Bincode-encoded event payload.
    pub payload: Vec<u8>,
    /// When the underlying business fact happened.
    pub occurred_at: DateTime<Utc>,
}

/// Payload of the [`COUPON_ISSUED`] outbox event, written in the same
/// transaction as the stock decrement and grant insert it describes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CouponIssued {
    /// The grant that was created.
    pub grant_id: GrantId,
    /// The user the coupon was issued to.
    pub user_id: UserId,
    /// The campaign issued from.
    pub campaign_id: CampaignId,
    /// Stock remaining after the decrement.
    pub remaining_stock: i64,
}

impl CouponIssued {
    /// Encode the payload for an outbox row.
    ///
    /// # Errors
    ///
    /// Returns [`OutboxError::Store`] if serialization fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>, OutboxError> {
        bincode::serialize(self).map_err(|e| OutboxError::Store(e.to_string()))
    }

    /// Decode a payload from an outbox row.
    ///
    /// # Errors
    ///
    /// Returns [`OutboxError::Store`] if the bytes are not a valid payload.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, OutboxError> {
        bincode::deserialize(bytes).map_err(|e| OutboxError::Store(e.to_string()))
    }
}

/// Errors from outbox storage operations.
#[derive(Error, Debug)]
pub enum OutboxError {
    /// Database failure while reading or writing outbox rows.
    #[error("Outbox store error: {0}")]
    Store(String),

    /// A stored status string did not match a known [`OutboxStatus`].
    #[error("Invalid outbox status: {0}")]
    InvalidStatus(String),
}

/// Lifecycle status of an outbox event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutboxStatus {
    /// Awaiting its first delivery attempt.
    Pending,
    /// Downstream effect executed without error; retired.
    Processed,
    /// At least one attempt failed. Retried by the failure sweep while
    /// `retry_count < MAX_OUTBOX_RETRIES`; terminal once at the maximum.
    Failed,
}

impl OutboxStatus {
    /// Database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Processed => "PROCESSED",
            Self::Failed => "FAILED",
        }
    }

    /// Parse a status from its database string.
    ///
    /// # Errors
    ///
    /// Returns [`OutboxError::InvalidStatus`] for unknown strings.
    pub fn parse(s: &str) -> Result<Self, OutboxError> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "PROCESSED" => Ok(Self::Processed),
            "FAILED" => Ok(Self::Failed),
            _ => Err(OutboxError::InvalidStatus(s.to_string())),
        }
    }
}

/// A durable events-to-publish row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboxEvent {
    /// Row id.
    pub id: i64,
    /// Stable event type identifier.
    pub event_type: String,
    /// Serialized event payload.
    pub payload: Vec<u8>,
    /// Current lifecycle status.
    pub status: OutboxStatus,
    /// Number of failed attempts so far; never exceeds
    /// [`MAX_OUTBOX_RETRIES`].
    pub retry_count: i32,
    /// When the row was written (with its business transaction).
    pub created_at: DateTime<Utc>,
}

impl OutboxEvent {
    /// Whether the retry budget is spent and the event is terminal.
    #[must_use]
    pub const fn is_exhausted(&self) -> bool {
        self.retry_count >= MAX_OUTBOX_RETRIES
    }

    /// View the row as a boundary-crossing [`DomainEvent`].
    #[must_use]
    pub fn to_domain_event(&self) -> DomainEvent {
        DomainEvent {
            event_type: self.event_type.clone(),
            payload: self.payload.clone(),
            occurred_at: self.created_at,
        }
    }
}

/// Storage for outbox rows.
pub trait OutboxStore: Send + Sync {
    /// Select up to `limit` PENDING events, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`OutboxError::Store`] on database failure.
    fn fetch_pending(
        &self,
        limit: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<OutboxEvent>, OutboxError>> + Send + '_>>;

    /// Select up to `limit` FAILED events with `retry_count <
    /// MAX_OUTBOX_RETRIES`, oldest first. Exhausted rows are never
    /// returned.
    ///
    /// # Errors
    ///
    /// Returns [`OutboxError::Store`] on database failure.
    fn fetch_retryable_failed(
        &self,
        limit: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<OutboxEvent>, OutboxError>> + Send + '_>>;

    /// Mark an event PROCESSED. Only called after its effect executed
    /// without error.
    ///
    /// # Errors
    ///
    /// Returns [`OutboxError::Store`] on database failure.
    fn mark_processed(
        &self,
        id: i64,
    ) -> Pin<Box<dyn Future<Output = Result<(), OutboxError>> + Send + '_>>;

    /// Record a failed attempt: increment `retry_count` (capped at
    /// [`MAX_OUTBOX_RETRIES`]) and set status FAILED. Returns the new
    /// retry count.
    ///
    /// # Errors
    ///
    /// Returns [`OutboxError::Store`] on database failure.
    fn record_failure(
        &self,
        id: i64,
    ) -> Pin<Box<dyn Future<Output = Result<i32, OutboxError>> + Send + '_>>;
}

/// Error from executing an outbox event's downstream effect.
#[derive(Error, Debug)]
#[error("Outbox effect failed: {0}")]
pub struct ExecuteError(pub String);

/// Executes the downstream effect an outbox event describes (e.g.
/// propagating a stock decrement to a secondary store).
pub trait OutboxExecutor: Send + Sync {
    /// Run the effect. The relay marks the event PROCESSED only when this
    /// returns `Ok`.
    ///
    /// # Errors
    ///
    /// Returns [`ExecuteError`] when the effect fails; the relay records a
    /// failed attempt.
    fn execute(
        &self,
        event: &OutboxEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), ExecuteError>> + Send + '_>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_roundtrip() {
        for status in &[
            OutboxStatus::Pending,
            OutboxStatus::Processed,
            OutboxStatus::Failed,
        ] {
            let parsed = OutboxStatus::parse(status.as_str());
            assert_eq!(parsed.ok(), Some(*status));
        }
    }

    #[test]
    fn status_rejects_unknown() {
        assert!(OutboxStatus::parse("RETIRED").is_err());
    }

    #[test]
    fn exhaustion_boundary() {
        let mut event = OutboxEvent {
            id: 1,
            event_type: "coupon.issued".to_string(),
            payload: vec![],
            status: OutboxStatus::Failed,
            retry_count: MAX_OUTBOX_RETRIES - 1,
            created_at: Utc::now(),
        };
        assert!(!event.is_exhausted());
        event.retry_count = MAX_OUTBOX_RETRIES;
        assert!(event.is_exhausted());
    }
}
