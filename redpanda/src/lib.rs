//! Redpanda (Kafka-compatible) channels for the flashdrop pipeline.
//!
//! This crate carries the pipeline's three topics over rdkafka:
//!
//! - **issuance requests** - consumed by the worker with manual offset
//!   commits, see [`RequestConsumer`]
//! - **issuance results** - published fire-and-forget back toward the
//!   caller-facing layer
//! - **dead letters** - failed external deliveries cycling through the
//!   retry pipeline, see [`RedpandaDlqChannel`]
//!
//! # Partitioning
//!
//! Requests and results are keyed by **campaign id**. Kafka hashes the key
//! to a partition, so every message for one campaign lands on the same
//! partition and is delivered in order to a single consumer in the group.
//! That per-campaign serialization is what lets the worker check and
//! decrement stock without a global lock.
//!
//! # Delivery semantics
//!
//! At-least-once. The request consumer commits an offset only after the
//! handler reports a terminal outcome; a crash before commit redelivers the
//! request, and the relational store's uniqueness constraints absorb the
//! duplicate. Retryable handler outcomes rewind the partition to the same
//! offset instead of committing (immediate redelivery, no backoff).
//!
//! # Example
//!
//! ```no_run
//! use flashdrop_redpanda::RedpandaIssueChannel;
//! use flashdrop_core::channel::RequestChannel;
//!
//! # async fn example(request: flashdrop_core::issue::IssueRequest)
//! # -> Result<(), Box<dyn std::error::Error>> {
//! let channel = RedpandaIssueChannel::builder()
//!     .brokers("localhost:9092")
//!     .producer_acks("all")
//!     .build()?;
//!
//! channel.submit(&request).await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod consumer;
mod dlq;

pub use consumer::{RequestConsumer, RequestConsumerBuilder};
pub use dlq::RedpandaDlqChannel;

use flashdrop_core::channel::{ChannelError, RequestChannel, ResultPublisher};
use flashdrop_core::issue::{IssueRequest, IssueResult};
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Default topic for issuance requests.
pub const REQUEST_TOPIC: &str = "coupon-issue-requests";
/// Default topic for issuance results.
pub const RESULT_TOPIC: &str = "coupon-issue-results";
/// Default topic for dead-letter envelopes.
pub const DLQ_TOPIC: &str = "coupon-dead-letters";

/// Producer-side channel: submits requests and publishes results, both
/// keyed by campaign id.
pub struct RedpandaIssueChannel {
    /// Kafka producer shared by both topics.
    producer: FutureProducer,
    /// Topic for issuance requests.
    request_topic: String,
    /// Topic for issuance results.
    result_topic: String,
    /// Producer send timeout.
    timeout: Duration,
}

impl RedpandaIssueChannel {
    /// Create a channel with default configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::ConnectionFailed`] if the producer cannot be
    /// created.
    pub fn new(brokers: &str) -> Result<Self, ChannelError> {
        Self::builder().brokers(brokers).build()
    }

    /// Create a builder for configuring the channel.
    #[must_use]
    pub fn builder() -> RedpandaIssueChannelBuilder {
        RedpandaIssueChannelBuilder::default()
    }

    /// Send one record, keyed for per-campaign ordering.
    async fn send(
        &self,
        topic: &str,
        key: &str,
        payload: Vec<u8>,
    ) -> Result<(), ChannelError> {
        let record = FutureRecord::to(topic).payload(&payload).key(key);

        match self.producer.send(record, Timeout::After(self.timeout)).await {
            Ok((partition, offset)) => {
                tracing::debug!(
                    topic = %topic,
                    key = %key,
                    partition = partition,
                    offset = offset,
                    "Message published"
                );
                Ok(())
            }
            Err((kafka_error, _)) => {
                tracing::error!(topic = %topic, key = %key, error = %kafka_error, "Publish failed");
                metrics::counter!("channel_publish_errors_total", "topic" => topic.to_string())
                    .increment(1);
                Err(ChannelError::PublishFailed {
                    topic: topic.to_string(),
                    reason: kafka_error.to_string(),
                })
            }
        }
    }
}

impl RequestChannel for RedpandaIssueChannel {
    fn submit(
        &self,
        request: &IssueRequest,
    ) -> Pin<Box<dyn Future<Output = Result<(), ChannelError>> + Send + '_>> {
        let key = request.campaign_id.to_string();
        let payload = request.to_bytes();
        Box::pin(async move {
            let payload = payload.map_err(|e| ChannelError::PublishFailed {
                topic: self.request_topic.clone(),
                reason: e.to_string(),
            })?;
            self.send(&self.request_topic, &key, payload).await
        })
    }
}

impl ResultPublisher for RedpandaIssueChannel {
    fn publish(
        &self,
        result: &IssueResult,
    ) -> Pin<Box<dyn Future<Output = Result<(), ChannelError>> + Send + '_>> {
        let key = result.campaign_id.to_string();
        let payload = result.to_bytes();
        Box::pin(async move {
            let payload = payload.map_err(|e| ChannelError::PublishFailed {
                topic: self.result_topic.clone(),
                reason: e.to_string(),
            })?;
            self.send(&self.result_topic, &key, payload).await
        })
    }
}

/// Builder for a [`RedpandaIssueChannel`].
#[derive(Default)]
pub struct RedpandaIssueChannelBuilder {
    brokers: Option<String>,
    producer_acks: Option<String>,
    compression: Option<String>,
    timeout: Option<Duration>,
    request_topic: Option<String>,
    result_topic: Option<String>,
}

impl RedpandaIssueChannelBuilder {
    /// Set the broker addresses (comma-separated).
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Set the producer acknowledgment mode ("0", "1", "all"). Default: "1".
    #[must_use]
    pub fn producer_acks(mut self, acks: impl Into<String>) -> Self {
        self.producer_acks = Some(acks.into());
        self
    }

    /// Set the compression codec. Default: "none".
    #[must_use]
    pub fn compression(mut self, compression: impl Into<String>) -> Self {
        self.compression = Some(compression.into());
        self
    }

    /// Set the producer send timeout. Default: 5 seconds.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Override the request topic. Default: [`REQUEST_TOPIC`].
    #[must_use]
    pub fn request_topic(mut self, topic: impl Into<String>) -> Self {
        self.request_topic = Some(topic.into());
        self
    }

    /// Override the result topic. Default: [`RESULT_TOPIC`].
    #[must_use]
    pub fn result_topic(mut self, topic: impl Into<String>) -> Self {
        self.result_topic = Some(topic.into());
        self
    }

    /// Build the channel.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::ConnectionFailed`] if brokers are not set or
    /// the producer cannot be created.
    pub fn build(self) -> Result<RedpandaIssueChannel, ChannelError> {
        let brokers = self
            .brokers
            .ok_or_else(|| ChannelError::ConnectionFailed("Brokers not configured".to_string()))?;

        let mut producer_config = ClientConfig::new();
        producer_config
            .set("bootstrap.servers", &brokers)
            .set("message.timeout.ms", "5000")
            .set("acks", self.producer_acks.as_deref().unwrap_or("1"))
            .set(
                "compression.type",
                self.compression.as_deref().unwrap_or("none"),
            );

        let producer: FutureProducer = producer_config.create().map_err(|e| {
            ChannelError::ConnectionFailed(format!("Failed to create producer: {e}"))
        })?;

        tracing::info!(
            brokers = %brokers,
            acks = self.producer_acks.as_deref().unwrap_or("1"),
            "Issue channel producer created"
        );

        Ok(RedpandaIssueChannel {
            producer,
            request_topic: self.request_topic.unwrap_or_else(|| REQUEST_TOPIC.to_string()),
            result_topic: self.result_topic.unwrap_or_else(|| RESULT_TOPIC.to_string()),
            timeout: self.timeout.unwrap_or(Duration::from_secs(5)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issue_channel_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<RedpandaIssueChannel>();
        assert_sync::<RedpandaIssueChannel>();
    }

    #[test]
    fn builder_requires_brokers() {
        assert!(RedpandaIssueChannel::builder().build().is_err());
    }
}
