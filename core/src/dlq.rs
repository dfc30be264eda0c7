//! Dead-letter pipeline types: cross-system delivery failures, bounded
//! retries, and the terminal failure sink.
//!
//! Distinct from the [outbox](crate::outbox): the outbox guards intra-store
//! propagation of committed business changes, while the dead-letter path
//! guards delivery of completed events to *external* systems (e.g. a data
//! platform). The two keep independent retry budgets so their failure
//! domains stay isolated.

use crate::outbox::DomainEvent;
use chrono::{DateTime, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Fixed retry budget for dead-letter envelopes, independent of the outbox
/// budget.
pub const MAX_DLQ_RETRIES: u32 = 3;

/// Errors from dead-letter channel or sink operations.
#[derive(Error, Debug)]
pub enum DlqError {
    /// Failed to publish an envelope to the dead-letter channel.
    #[error("Dead-letter publish failed: {0}")]
    Publish(String),

    /// Failed to subscribe to the dead-letter channel.
    #[error("Dead-letter subscription failed: {0}")]
    Subscribe(String),

    /// Failed to record a terminal failure in the sink.
    #[error("Failure sink error: {0}")]
    Sink(String),

    /// An envelope payload could not be decoded.
    #[error("Envelope decode failed: {0}")]
    Decode(String),
}

/// A failed event wrapped with its failure metadata, carried on the
/// dead-letter channel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DlqEnvelope {
    /// The original event whose delivery failed.
    pub event: DomainEvent,
    /// Why the most recent attempt failed.
    pub reason: String,
    /// When the most recent attempt failed.
    pub failed_at: DateTime<Utc>,
    /// Resubmissions attempted so far.
    pub retry_count: u32,
}

impl DlqEnvelope {
    /// Wrap a freshly failed event (retry count 0).
    #[must_use]
    pub fn new(event: DomainEvent, reason: impl Into<String>, failed_at: DateTime<Utc>) -> Self {
        Self {
            event,
            reason: reason.into(),
            failed_at,
            retry_count: 0,
        }
    }

    /// The envelope for the next resubmission after another failure.
    #[must_use]
    pub fn next_attempt(&self, reason: impl Into<String>, failed_at: DateTime<Utc>) -> Self {
        Self {
            event: self.event.clone(),
            reason: reason.into(),
            failed_at,
            retry_count: self.retry_count + 1,
        }
    }

    /// Whether the retry budget is spent and the envelope must be routed to
    /// the terminal sink.
    #[must_use]
    pub const fn is_exhausted(&self) -> bool {
        self.retry_count >= MAX_DLQ_RETRIES
    }

    /// Encode the envelope to bincode bytes for the wire.
    ///
    /// # Errors
    ///
    /// Returns [`DlqError::Publish`] if serialization fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>, DlqError> {
        bincode::serialize(self).map_err(|e| DlqError::Publish(e.to_string()))
    }

    /// Decode an envelope from bincode bytes.
    ///
    /// # Errors
    ///
    /// Returns [`DlqError::Decode`] if the bytes are not a valid envelope.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DlqError> {
        bincode::deserialize(bytes).map_err(|e| DlqError::Decode(e.to_string()))
    }
}

/// Stream of dead-letter envelopes from a subscription.
pub type EnvelopeStream = Pin<Box<dyn Stream<Item = Result<DlqEnvelope, DlqError>> + Send>>;

/// The dead-letter channel: envelopes in flight between failure and retry.
///
/// Consumers always acknowledge the envelope they read (the subscription
/// commits on delivery); retries ride on new messages, never on redelivery
/// of an unacknowledged original. That keeps the pipeline free of
/// reprocessing loops.
pub trait DlqChannel: Send + Sync {
    /// Publish an envelope to the dead-letter channel.
    ///
    /// # Errors
    ///
    /// Returns [`DlqError::Publish`] if the publish fails.
    fn publish(
        &self,
        envelope: &DlqEnvelope,
    ) -> Pin<Box<dyn Future<Output = Result<(), DlqError>> + Send + '_>>;

    /// Subscribe to the dead-letter channel. Every yielded envelope is
    /// already acknowledged.
    ///
    /// # Errors
    ///
    /// Returns [`DlqError::Subscribe`] if the channel cannot be joined.
    fn subscribe(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<EnvelopeStream, DlqError>> + Send + '_>>;
}

/// Best-effort delivery to an external system (a boolean send:
/// `true` delivered, `false` failed).
pub trait ExternalDelivery: Send + Sync {
    /// Attempt delivery of one event.
    fn deliver(&self, event: &DomainEvent) -> Pin<Box<dyn Future<Output = bool> + Send + '_>>;
}

/// Terminal sink for envelopes that exhausted their retry budget.
///
/// Rows here are never retried automatically; they exist for operator and
/// monitoring follow-up.
pub trait FailureSink: Send + Sync {
    /// Record a permanently failed envelope.
    ///
    /// # Errors
    ///
    /// Returns [`DlqError::Sink`] on storage failure.
    fn record(
        &self,
        envelope: &DlqEnvelope,
    ) -> Pin<Box<dyn Future<Output = Result<(), DlqError>> + Send + '_>>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;

    fn event() -> DomainEvent {
        DomainEvent {
            event_type: "order.completed".to_string(),
            payload: vec![1, 2, 3],
            occurred_at: Utc::now(),
        }
    }

    #[test]
    fn envelope_starts_at_zero_retries() {
        let env = DlqEnvelope::new(event(), "timeout", Utc::now());
        assert_eq!(env.retry_count, 0);
        assert!(!env.is_exhausted());
    }

    #[test]
    fn next_attempt_increments_and_exhausts() {
        let mut env = DlqEnvelope::new(event(), "timeout", Utc::now());
        for _ in 0..MAX_DLQ_RETRIES {
            assert!(!env.is_exhausted());
            env = env.next_attempt("timeout again", Utc::now());
        }
        assert_eq!(env.retry_count, MAX_DLQ_RETRIES);
        assert!(env.is_exhausted());
    }

    #[test]
    fn envelope_bincode_roundtrip() {
        let env = DlqEnvelope::new(event(), "connection refused", Utc::now());
        let decoded = DlqEnvelope::from_bytes(&env.to_bytes().unwrap()).unwrap();
        assert_eq!(env, decoded);
    }
}
