//! External data platform adapters.
//!
//! [`HttpDataPlatform`] is the best-effort boolean send to the analytics
//! platform; [`DeliveryExecutor`] is the outbox's downstream effect, handing
//! committed events to the guarded delivery path (direct send, dead-letter
//! routing on failure).

use flashdrop_core::dlq::ExternalDelivery;
use flashdrop_core::outbox::{DomainEvent, ExecuteError, OutboxEvent, OutboxExecutor};
use flashdrop_runtime::ReliableDelivery;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// HTTP client for the external data platform.
///
/// Events are POSTed as raw payload bytes with the event type in a header;
/// any non-success response or transport error counts as a failed delivery.
pub struct HttpDataPlatform {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpDataPlatform {
    /// Create a client for the given endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

impl ExternalDelivery for HttpDataPlatform {
    fn deliver(&self, event: &DomainEvent) -> Pin<Box<dyn Future<Output = bool> + Send + '_>> {
        let request = self
            .client
            .post(&self.endpoint)
            .header("x-event-type", event.event_type.clone())
            .header("x-occurred-at", event.occurred_at.to_rfc3339())
            .body(event.payload.clone());
        let event_type = event.event_type.clone();

        Box::pin(async move {
            match request.send().await {
                Ok(response) if response.status().is_success() => true,
                Ok(response) => {
                    warn!(
                        event_type = %event_type,
                        status = %response.status(),
                        "Data platform rejected event"
                    );
                    false
                }
                Err(e) => {
                    warn!(event_type = %event_type, error = %e, "Data platform send failed");
                    false
                }
            }
        })
    }
}

/// Outbox effect: hand the committed event to the guarded delivery path.
///
/// The effect fails (and the outbox row stays retryable) only when the
/// direct send failed AND the dead-letter routing failed too - the one case
/// where the event has not safely left the outbox's custody.
pub struct DeliveryExecutor {
    delivery: Arc<ReliableDelivery>,
}

impl DeliveryExecutor {
    /// Create an executor over the guarded delivery path.
    #[must_use]
    pub const fn new(delivery: Arc<ReliableDelivery>) -> Self {
        Self { delivery }
    }
}

impl OutboxExecutor for DeliveryExecutor {
    fn execute(
        &self,
        event: &OutboxEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), ExecuteError>> + Send + '_>> {
        let domain_event = event.to_domain_event();
        Box::pin(async move {
            self.delivery
                .send(domain_event)
                .await
                .map_err(|e| ExecuteError(e.to_string()))
        })
    }
}
