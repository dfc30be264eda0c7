//! The dead-letter retry pipeline for cross-system delivery.
//!
//! [`ReliableDelivery`] is the failure entry point: a best-effort external
//! send whose failures are wrapped in a [`DlqEnvelope`] and routed to the
//! dead-letter channel. [`DlqConsumer`] drains that channel: each envelope
//! is retried after a bounded exponential delay (1s, 2s, 4s), and an
//! envelope that spends its budget is routed to the terminal failure sink -
//! logged as a permanent failure, never retried again.
//!
//! Every envelope the consumer sees is already acknowledged by the channel
//! subscription, so retries ride on freshly published envelopes rather than
//! redelivery; there is no reprocessing loop to break out of.

use crate::backoff::BackoffPolicy;
use flashdrop_core::clock::Clock;
use flashdrop_core::dlq::{DlqChannel, DlqEnvelope, DlqError, ExternalDelivery, FailureSink};
use flashdrop_core::outbox::DomainEvent;
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Best-effort external delivery with dead-letter routing on failure.
pub struct ReliableDelivery {
    delivery: Arc<dyn ExternalDelivery>,
    channel: Arc<dyn DlqChannel>,
    clock: Arc<dyn Clock>,
}

impl ReliableDelivery {
    /// Create a delivery wrapper routing failures to the given channel.
    #[must_use]
    pub fn new(
        delivery: Arc<dyn ExternalDelivery>,
        channel: Arc<dyn DlqChannel>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            delivery,
            channel,
            clock,
        }
    }

    /// Send one event to the external system. On failure the event is
    /// wrapped (retry count 0) and published to the dead-letter channel.
    ///
    /// # Errors
    ///
    /// Returns [`DlqError::Publish`] only if the event could not be
    /// delivered AND the dead-letter publish failed - the one case where
    /// the event would otherwise be silently lost.
    pub async fn send(&self, event: DomainEvent) -> Result<(), DlqError> {
        if self.delivery.deliver(&event).await {
            metrics::counter!("external_delivered_total").increment(1);
            return Ok(());
        }

        warn!(
            event_type = %event.event_type,
            "External delivery failed, routing to dead-letter channel"
        );
        metrics::counter!("dlq_routed_total").increment(1);

        let envelope = DlqEnvelope::new(event, "delivery returned failure", self.clock.now());
        self.channel.publish(&envelope).await
    }
}

/// Drains the dead-letter channel, retrying envelopes with bounded backoff
/// and routing exhausted ones to the terminal sink.
pub struct DlqConsumer {
    channel: Arc<dyn DlqChannel>,
    delivery: Arc<dyn ExternalDelivery>,
    sink: Arc<dyn FailureSink>,
    backoff: BackoffPolicy,
    clock: Arc<dyn Clock>,
}

impl DlqConsumer {
    /// Create a consumer with the default 1s/2s/4s backoff schedule.
    #[must_use]
    pub fn new(
        channel: Arc<dyn DlqChannel>,
        delivery: Arc<dyn ExternalDelivery>,
        sink: Arc<dyn FailureSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            channel,
            delivery,
            sink,
            backoff: BackoffPolicy::default(),
            clock,
        }
    }

    /// Override the backoff policy.
    #[must_use]
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Spawn the consumer as a background task. Runs until the shutdown
    /// signal fires.
    #[must_use]
    pub fn spawn(self, mut shutdown: broadcast::Receiver<()>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            info!("Dead-letter consumer started");

            let mut stream = match self.channel.subscribe().await {
                Ok(stream) => stream,
                Err(e) => {
                    error!(error = %e, "Failed to subscribe to dead-letter channel");
                    return;
                }
            };

            loop {
                tokio::select! {
                    _ = shutdown.recv() => {
                        info!("Dead-letter consumer received shutdown signal");
                        break;
                    }
                    item = stream.next() => {
                        match item {
                            Some(Ok(envelope)) => self.process(envelope).await,
                            Some(Err(e)) => {
                                warn!(error = %e, "Error receiving dead-letter envelope");
                            }
                            None => {
                                warn!("Dead-letter stream ended");
                                break;
                            }
                        }
                    }
                }
            }

            info!("Dead-letter consumer stopped");
        })
    }

    /// Process one (already acknowledged) envelope: terminal-sink it if the
    /// budget is spent, otherwise wait out the backoff delay and retry the
    /// delivery, republishing on failure.
    pub async fn process(&self, envelope: DlqEnvelope) {
        if self.backoff.is_exhausted(envelope.retry_count) {
            error!(
                event_type = %envelope.event.event_type,
                retry_count = envelope.retry_count,
                reason = %envelope.reason,
                "Dead-letter retry budget exhausted, routing to terminal sink"
            );
            if let Err(e) = self.sink.record(&envelope).await {
                error!(error = %e, "Failed to record terminal failure");
            }
            return;
        }

        let delay = self.backoff.delay_for_attempt(envelope.retry_count);
        debug!(
            event_type = %envelope.event.event_type,
            retry_count = envelope.retry_count,
            delay_ms = delay.as_millis(),
            "Retrying dead-letter delivery after backoff"
        );
        tokio::time::sleep(delay).await;

        metrics::counter!("dlq_retries_total").increment(1);

        if self.delivery.deliver(&envelope.event).await {
            info!(
                event_type = %envelope.event.event_type,
                retry_count = envelope.retry_count,
                "Dead-letter delivery recovered"
            );
            metrics::counter!("dlq_recovered_total").increment(1);
            return;
        }

        let next = envelope.next_attempt("redelivery failed", self.clock.now());
        if let Err(e) = self.channel.publish(&next).await {
            // Publish failure here would drop the envelope; record it
            // terminally instead of losing it.
            error!(
                event_type = %next.event.event_type,
                error = %e,
                "Failed to republish dead-letter envelope, recording terminally"
            );
            if let Err(sink_err) = self.sink.record(&next).await {
                error!(error = %sink_err, "Failed to record terminal failure");
            }
        }
    }
}
