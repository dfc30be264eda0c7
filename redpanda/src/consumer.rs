//! Manual-commit consumer for the issuance request topic.
//!
//! The consumer decodes each [`IssueRequest`] and hands it to a
//! [`RequestHandler`]; the handler's [`Disposition`] drives acknowledgment:
//!
//! - `Ack` - offset committed, the request is terminally resolved
//! - `Retry` - no commit; the partition is rewound to the same offset so
//!   the request is redelivered immediately
//!
//! Undecodable payloads can never become valid, so they are committed and
//! counted rather than poisoning the partition.
//!
//! The surrounding subscribe-process-reconnect loop keeps the consumer
//! alive across broker hiccups and exits cleanly on the shutdown broadcast.

use flashdrop_core::channel::{Disposition, RequestHandler};
use flashdrop_core::issue::IssueRequest;
use rdkafka::Offset;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Message};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// Why the processing loop returned.
#[derive(PartialEq, Eq)]
enum Flow {
    /// Shutdown signal received; stop the consumer.
    Shutdown,
    /// Stream error; rebuild the consumer and resubscribe.
    Reconnect,
}

/// Consumer for the issuance request topic.
///
/// One consumer group member per process; Kafka assigns partitions across
/// the group, and per-campaign ordering holds because all of a campaign's
/// requests share one partition.
pub struct RequestConsumer {
    /// Broker addresses.
    brokers: String,
    /// Consumer group id.
    group: String,
    /// Topic to consume.
    topic: String,
    /// Handler deciding each request's disposition.
    handler: Arc<dyn RequestHandler>,
    /// Shutdown signal receiver.
    shutdown: broadcast::Receiver<()>,
    /// Delay before reconnecting after a failure.
    retry_delay: Duration,
}

impl RequestConsumer {
    /// Create a builder for configuring a consumer.
    #[must_use]
    pub fn builder() -> RequestConsumerBuilder {
        RequestConsumerBuilder::default()
    }

    /// Spawn the consumer as a background task. Runs until the shutdown
    /// signal fires.
    #[must_use]
    pub fn spawn(mut self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(&mut self) {
        info!(group = %self.group, topic = %self.topic, "Request consumer started");

        loop {
            match self.connect() {
                Ok(consumer) => {
                    info!(group = %self.group, topic = %self.topic, "Subscribed to request topic");
                    if self.process(&consumer).await == Flow::Shutdown {
                        break;
                    }
                    warn!(
                        group = %self.group,
                        "Request stream ended, reconnecting in {:?}",
                        self.retry_delay
                    );
                }
                Err(e) => {
                    error!(
                        group = %self.group,
                        error = %e,
                        "Failed to subscribe, retrying in {:?}",
                        self.retry_delay
                    );
                }
            }

            // Honor shutdown during the reconnect backoff too.
            tokio::select! {
                _ = self.shutdown.recv() => break,
                () = tokio::time::sleep(self.retry_delay) => {}
            }
        }

        info!(group = %self.group, "Request consumer stopped");
    }

    /// Create and subscribe a manual-commit stream consumer.
    fn connect(&self) -> Result<StreamConsumer, rdkafka::error::KafkaError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &self.brokers)
            .set("group.id", &self.group)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .set("session.timeout.ms", "6000")
            .set("enable.partition.eof", "false")
            .create()?;

        consumer.subscribe(&[self.topic.as_str()])?;
        Ok(consumer)
    }

    /// Process messages until the stream errors out or shutdown fires.
    async fn process(&mut self, consumer: &StreamConsumer) -> Flow {
        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    info!(group = %self.group, "Shutdown during processing");
                    return Flow::Shutdown;
                }
                msg = consumer.recv() => {
                    match msg {
                        Ok(message) => self.dispatch(consumer, &message).await,
                        Err(e) => {
                            error!(group = %self.group, error = %e, "Error receiving request");
                            metrics::counter!("channel_consume_errors_total").increment(1);
                            return Flow::Reconnect;
                        }
                    }
                }
            }
        }
    }

    /// Decode one message, run the handler, and act on the disposition.
    async fn dispatch(&self, consumer: &StreamConsumer, message: &BorrowedMessage<'_>) {
        let request = match message.payload().map(IssueRequest::from_bytes) {
            Some(Ok(request)) => request,
            Some(Err(e)) => {
                // Poison payloads are terminal: commit so the partition moves on.
                warn!(
                    topic = message.topic(),
                    partition = message.partition(),
                    offset = message.offset(),
                    error = %e,
                    "Undecodable request payload, skipping"
                );
                metrics::counter!("channel_poison_messages_total").increment(1);
                self.commit(consumer, message);
                return;
            }
            None => {
                warn!(
                    topic = message.topic(),
                    partition = message.partition(),
                    offset = message.offset(),
                    "Request message has no payload, skipping"
                );
                self.commit(consumer, message);
                return;
            }
        };

        metrics::counter!("channel_requests_consumed_total").increment(1);

        match self.handler.handle(request).await {
            Disposition::Ack => self.commit(consumer, message),
            Disposition::Retry => {
                // Rewind to this offset so the same request is redelivered
                // immediately. No commit: a crash here also redelivers.
                metrics::counter!("channel_requests_redelivered_total").increment(1);
                if let Err(e) = consumer.seek(
                    message.topic(),
                    message.partition(),
                    Offset::Offset(message.offset()),
                    Duration::from_secs(5),
                ) {
                    warn!(
                        topic = message.topic(),
                        partition = message.partition(),
                        offset = message.offset(),
                        error = %e,
                        "Seek for redelivery failed (broker will redeliver on rebalance)"
                    );
                }
            }
        }
    }

    fn commit(&self, consumer: &StreamConsumer, message: &BorrowedMessage<'_>) {
        if let Err(e) = consumer.commit_message(message, CommitMode::Async) {
            warn!(
                topic = message.topic(),
                partition = message.partition(),
                offset = message.offset(),
                error = %e,
                "Failed to commit offset (request may be redelivered)"
            );
        }
    }
}

/// Builder for a [`RequestConsumer`].
#[derive(Default)]
pub struct RequestConsumerBuilder {
    brokers: Option<String>,
    group: Option<String>,
    topic: Option<String>,
    handler: Option<Arc<dyn RequestHandler>>,
    shutdown: Option<broadcast::Receiver<()>>,
    retry_delay: Option<Duration>,
}

impl RequestConsumerBuilder {
    /// Set the broker addresses.
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Set the consumer group id.
    #[must_use]
    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    /// Set the topic to consume. Default: [`crate::REQUEST_TOPIC`].
    #[must_use]
    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    /// Set the request handler.
    #[must_use]
    pub fn handler(mut self, handler: Arc<dyn RequestHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Set the shutdown signal receiver.
    #[must_use]
    pub fn shutdown(mut self, shutdown: broadcast::Receiver<()>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Set the reconnect delay (default: 5 seconds).
    #[must_use]
    pub const fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = Some(delay);
        self
    }

    /// Build the consumer.
    ///
    /// # Panics
    ///
    /// Panics if brokers, group, handler, or shutdown are not set.
    #[must_use]
    #[allow(clippy::expect_used)] // Builder misuse is a programming error
    pub fn build(self) -> RequestConsumer {
        RequestConsumer {
            brokers: self.brokers.expect("brokers are required"),
            group: self.group.expect("group is required"),
            topic: self.topic.unwrap_or_else(|| crate::REQUEST_TOPIC.to_string()),
            handler: self.handler.expect("handler is required"),
            shutdown: self.shutdown.expect("shutdown is required"),
            retry_delay: self.retry_delay.unwrap_or(Duration::from_secs(5)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consumer_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<RequestConsumer>();
    }
}
