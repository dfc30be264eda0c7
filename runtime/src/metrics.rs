//! Prometheus metrics for the pipeline.
//!
//! Counters are emitted at the point of occurrence throughout the crates;
//! this module registers their descriptions and exposes them for scraping.

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use thiserror::Error;

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build the metrics exporter.
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install the metrics exporter.
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus metrics server.
///
/// Exposes metrics on an HTTP endpoint for Prometheus scraping.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server.
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Initialize metrics and start the HTTP exporter.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError`] if the exporter cannot be built or
    /// installed. A recorder already installed (tests) is tolerated with a
    /// warning.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .with_http_listener(self.addr)
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[
                    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
                ],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!(
                    addr = %self.addr,
                    "Metrics server started - available at http://{}/metrics",
                    self.addr
                );
                Ok(())
            }
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            }
        }
    }

    /// Render current metrics in Prometheus format. `None` before
    /// [`MetricsServer::start`].
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
fn register_metrics() {
    // Admission gate
    describe_counter!(
        "admission_attempts_total",
        "Total admission attempts received by the gate"
    );
    describe_counter!(
        "admission_granted_total",
        "Total admissions accepted and submitted to the request channel"
    );
    describe_counter!(
        "admission_rejected_total",
        "Total admissions rejected, labeled by reason"
    );
    describe_counter!(
        "admission_submit_failures_total",
        "Admissions released because the channel submit failed"
    );

    // Channels
    describe_counter!(
        "channel_requests_consumed_total",
        "Issuance requests consumed from the request topic"
    );
    describe_counter!(
        "channel_requests_redelivered_total",
        "Issuance requests rewound for immediate redelivery"
    );
    describe_counter!(
        "channel_publish_errors_total",
        "Publish errors, labeled by topic"
    );
    describe_counter!(
        "channel_consume_errors_total",
        "Errors receiving messages from the request topic"
    );
    describe_counter!(
        "channel_poison_messages_total",
        "Undecodable request payloads skipped"
    );

    // Issuance worker
    describe_counter!(
        "issuance_results_total",
        "Terminal issuance outcomes, labeled by outcome"
    );
    describe_counter!(
        "issuance_redeliveries_total",
        "Requests returned to the channel after retryable store failures"
    );
    describe_counter!(
        "issuance_grants_total",
        "Grants persisted by the authoritative decrement"
    );
    describe_counter!(
        "issuance_results_published_total",
        "Issue results successfully published"
    );
    describe_counter!(
        "issuance_result_publish_failures_total",
        "Issue result publishes that failed (logged, not retried)"
    );

    // Outbox relay
    describe_counter!("outbox_swept_total", "Outbox events selected by a sweep");
    describe_counter!(
        "outbox_processed_total",
        "Outbox events whose effect executed and were retired"
    );
    describe_counter!(
        "outbox_failed_total",
        "Outbox effect failures within the retry budget"
    );
    describe_counter!(
        "outbox_exhausted_total",
        "Outbox events stuck FAILED at the retry maximum (operator signal)"
    );

    // Dead-letter pipeline
    describe_counter!(
        "external_delivered_total",
        "Events delivered to the external platform on first attempt"
    );
    describe_counter!(
        "dlq_routed_total",
        "Delivery failures routed to the dead-letter channel"
    );
    describe_counter!("dlq_retries_total", "Dead-letter redelivery attempts");
    describe_counter!(
        "dlq_recovered_total",
        "Dead-letter envelopes delivered within the retry budget"
    );
    describe_counter!(
        "dlq_terminal_total",
        "Envelopes routed to the terminal failure sink, labeled by event type"
    );

    describe_histogram!(
        "issuance_duration_seconds",
        "Time from request consumption to terminal outcome"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_server_renders_nothing_before_start() {
        let server = MetricsServer::new(([127, 0, 0, 1], 9090).into());
        assert!(server.render().is_none());
    }
}
