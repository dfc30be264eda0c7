//! Dead-letter topic transport.
//!
//! Envelopes are published keyed by their event type and consumed with
//! commit-on-delivery: every envelope handed to the retry pipeline is
//! already acknowledged, so a failed retry produces a *new* envelope
//! message instead of an unacknowledged redelivery loop.

use flashdrop_core::dlq::{DlqChannel, DlqEnvelope, DlqError, EnvelopeStream};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Redpanda-backed dead-letter channel.
pub struct RedpandaDlqChannel {
    /// Producer for publishing envelopes.
    producer: FutureProducer,
    /// Broker addresses (for creating the subscriber).
    brokers: String,
    /// Dead-letter topic.
    topic: String,
    /// Consumer group of the retry pipeline.
    group: String,
    /// Producer send timeout.
    timeout: Duration,
    /// Envelope buffer between the Kafka consumer and the subscriber.
    buffer_size: usize,
}

impl RedpandaDlqChannel {
    /// Create a dead-letter channel on the given topic.
    ///
    /// # Errors
    ///
    /// Returns [`DlqError::Publish`] if the producer cannot be created.
    pub fn new(
        brokers: impl Into<String>,
        topic: impl Into<String>,
        group: impl Into<String>,
    ) -> Result<Self, DlqError> {
        let brokers = brokers.into();
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .set("message.timeout.ms", "5000")
            .set("acks", "all")
            .create()
            .map_err(|e| DlqError::Publish(format!("Failed to create producer: {e}")))?;

        Ok(Self {
            producer,
            brokers,
            topic: topic.into(),
            group: group.into(),
            timeout: Duration::from_secs(5),
            buffer_size: 1000,
        })
    }
}

impl DlqChannel for RedpandaDlqChannel {
    fn publish(
        &self,
        envelope: &DlqEnvelope,
    ) -> Pin<Box<dyn Future<Output = Result<(), DlqError>> + Send + '_>> {
        let payload = envelope.to_bytes();
        let key = envelope.event.event_type.clone();
        let retry_count = envelope.retry_count;

        Box::pin(async move {
            let payload = payload?;
            let record = FutureRecord::to(&self.topic).payload(&payload).key(&key);

            match self.producer.send(record, Timeout::After(self.timeout)).await {
                Ok(_) => {
                    tracing::debug!(
                        topic = %self.topic,
                        event_type = %key,
                        retry_count = retry_count,
                        "Dead-letter envelope published"
                    );
                    Ok(())
                }
                Err((kafka_error, _)) => {
                    tracing::error!(
                        topic = %self.topic,
                        event_type = %key,
                        error = %kafka_error,
                        "Failed to publish dead-letter envelope"
                    );
                    Err(DlqError::Publish(kafka_error.to_string()))
                }
            }
        })
    }

    fn subscribe(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<EnvelopeStream, DlqError>> + Send + '_>> {
        let brokers = self.brokers.clone();
        let topic = self.topic.clone();
        let group = self.group.clone();
        let buffer_size = self.buffer_size;

        Box::pin(async move {
            let consumer: StreamConsumer = ClientConfig::new()
                .set("bootstrap.servers", &brokers)
                .set("group.id", &group)
                .set("enable.auto.commit", "false")
                .set("auto.offset.reset", "earliest")
                .set("session.timeout.ms", "6000")
                .set("enable.partition.eof", "false")
                .create()
                .map_err(|e| DlqError::Subscribe(format!("Failed to create consumer: {e}")))?;

            consumer
                .subscribe(&[topic.as_str()])
                .map_err(|e| DlqError::Subscribe(format!("Failed to subscribe: {e}")))?;

            tracing::info!(topic = %topic, group = %group, "Subscribed to dead-letter topic");

            let (tx, rx) = tokio::sync::mpsc::channel(buffer_size);

            // The consumer task owns the StreamConsumer and forwards decoded
            // envelopes. Offsets are committed after the envelope reaches the
            // channel: the retry pipeline's contract is that every envelope
            // it sees is already acknowledged.
            tokio::spawn(async move {
                use futures::StreamExt;

                let mut stream = consumer.stream();

                while let Some(msg_result) = stream.next().await {
                    match msg_result {
                        Ok(message) => {
                            let item = match message.payload() {
                                Some(payload) => DlqEnvelope::from_bytes(payload),
                                None => Err(DlqError::Decode("envelope has no payload".to_string())),
                            };

                            if tx.send(item).await.is_err() {
                                break; // Receiver dropped, exit without committing
                            }

                            if let Err(e) = consumer.commit_message(&message, CommitMode::Async) {
                                tracing::warn!(
                                    error = %e,
                                    "Failed to commit dead-letter offset (envelope may be redelivered)"
                                );
                            }
                        }
                        Err(e) => {
                            let err = DlqError::Subscribe(format!("Failed to receive envelope: {e}"));
                            if tx.send(Err(err)).await.is_err() {
                                break;
                            }
                        }
                    }
                }

                tracing::debug!("Dead-letter consumer task exiting");
            });

            let stream = async_stream::stream! {
                let mut rx = rx;
                while let Some(result) = rx.recv().await {
                    yield result;
                }
            };

            Ok(Box::pin(stream) as EnvelopeStream)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dlq_channel_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<RedpandaDlqChannel>();
        assert_sync::<RedpandaDlqChannel>();
    }
}
