//! Request and result channels: the ordered, partitioned transport between
//! admission and the issuance worker.
//!
//! # Ordering
//!
//! Both channels partition by **campaign id**: all requests for one campaign
//! land on the same partition and are delivered to a single consumer stream
//! in order. That per-campaign serialization is the pipeline's primary
//! correctness mechanism for stock bookkeeping - no global lock exists.
//!
//! # Acknowledgment contract
//!
//! Consumers hand each decoded request to a [`RequestHandler`] and act on
//! the returned [`Disposition`]:
//!
//! - [`Disposition::Ack`] - the outcome is terminal (success or a fixed
//!   rejection); the message offset is committed and the request is never
//!   redelivered.
//! - [`Disposition::Retry`] - a transient store failure interrupted the
//!   authoritative decrement; the offset is NOT committed and the same
//!   message is redelivered immediately, with no backoff.
//!
//! Business-logic failures never surface as channel errors; they are
//! resolved into [`crate::issue::IssueResult`] values by the handler.

use crate::issue::{IssueRequest, IssueResult};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors from channel operations.
#[derive(Error, Debug, Clone)]
pub enum ChannelError {
    /// Failed to connect to the channel broker.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to publish a message to a topic.
    #[error("Publish failed for topic '{topic}': {reason}")]
    PublishFailed {
        /// The topic that failed.
        topic: String,
        /// The reason for failure.
        reason: String,
    },

    /// Failed to subscribe to a topic.
    #[error("Subscription failed for topic '{topic}': {reason}")]
    SubscriptionFailed {
        /// The topic that failed to subscribe.
        topic: String,
        /// The reason for failure.
        reason: String,
    },

    /// A payload could not be decoded.
    #[error("Decode failed: {0}")]
    DecodeFailed(String),

    /// Network or transport error.
    #[error("Transport error: {0}")]
    TransportError(String),
}

/// What the consumer should do with the message a handler just processed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Disposition {
    /// Terminal outcome recorded; commit the offset, never redeliver.
    Ack,
    /// Transient failure; do not commit, redeliver the same message.
    Retry,
}

/// Inbound side of the issuance request channel.
pub trait RequestChannel: Send + Sync {
    /// Submit an issuance request, keyed by its campaign id so requests for
    /// one campaign preserve order.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::PublishFailed`] if the submit fails; the
    /// caller then releases the admission entry so the user may retry.
    fn submit(
        &self,
        request: &IssueRequest,
    ) -> Pin<Box<dyn Future<Output = Result<(), ChannelError>> + Send + '_>>;
}

/// Outbound side: delivers results back toward the caller-facing layer.
///
/// Publish is fire-and-forget from the worker's perspective; failures are
/// logged and counted, not retried here (durability-requiring events go
/// through the outbox instead).
pub trait ResultPublisher: Send + Sync {
    /// Publish an issuance result, keyed by its campaign id.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::PublishFailed`] if the publish fails.
    fn publish(
        &self,
        result: &IssueResult,
    ) -> Pin<Box<dyn Future<Output = Result<(), ChannelError>> + Send + '_>>;
}

/// Processes one issuance request and decides its acknowledgment.
///
/// Implementations must be idempotent under redelivery: the channel gives
/// at-least-once delivery, and a crash between effect and commit replays
/// the message.
pub trait RequestHandler: Send + Sync {
    /// Handle one request to a terminal outcome or a retryable failure.
    fn handle(
        &self,
        request: IssueRequest,
    ) -> Pin<Box<dyn Future<Output = Disposition> + Send + '_>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_error_is_clone_and_displayable() {
        let err = ChannelError::PublishFailed {
            topic: "coupon-issue-requests".to_string(),
            reason: "broker down".to_string(),
        };
        let cloned = err.clone();
        assert!(cloned.to_string().contains("coupon-issue-requests"));
    }

    #[test]
    fn dispositions_compare() {
        assert_eq!(Disposition::Ack, Disposition::Ack);
        assert_ne!(Disposition::Ack, Disposition::Retry);
    }
}
