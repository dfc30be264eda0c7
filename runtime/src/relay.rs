//! The outbox relay: background sweeps that bridge "business transaction
//! committed" and "event durably delivered".
//!
//! Two sweeps share one execution path:
//!
//! - the **pending sweep**, on a short fixed interval, drains newly written
//!   PENDING rows oldest-first;
//! - the **retry sweep**, less frequent, re-selects FAILED rows that still
//!   have budget (`retry_count < 3`), recovering from transient failures
//!   without operator intervention.
//!
//! An event is marked PROCESSED only after its effect executed without
//! error, and is never attempted past the fixed maximum: exhausted rows
//! stay FAILED as an operator signal.

use flashdrop_core::outbox::{OutboxEvent, OutboxExecutor, OutboxStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Relay sweep configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Interval of the pending sweep.
    pub sweep_interval: Duration,
    /// Interval of the failed-row retry sweep.
    pub retry_sweep_interval: Duration,
    /// Maximum rows selected per sweep.
    pub batch_limit: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(5),
            retry_sweep_interval: Duration::from_secs(60),
            batch_limit: 100,
        }
    }
}

/// Drains the outbox table into downstream effects.
pub struct OutboxRelay {
    store: Arc<dyn OutboxStore>,
    executor: Arc<dyn OutboxExecutor>,
    config: RelayConfig,
}

impl OutboxRelay {
    /// Create a relay over the given store and executor.
    #[must_use]
    pub fn new(
        store: Arc<dyn OutboxStore>,
        executor: Arc<dyn OutboxExecutor>,
        config: RelayConfig,
    ) -> Self {
        Self {
            store,
            executor,
            config,
        }
    }

    /// Spawn the sweep loops as a background task. Runs until the shutdown
    /// signal fires.
    #[must_use]
    pub fn spawn(self, mut shutdown: broadcast::Receiver<()>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                sweep_interval = ?self.config.sweep_interval,
                retry_sweep_interval = ?self.config.retry_sweep_interval,
                batch_limit = self.config.batch_limit,
                "Outbox relay started"
            );

            let mut pending_tick = tokio::time::interval(self.config.sweep_interval);
            let mut retry_tick = tokio::time::interval(self.config.retry_sweep_interval);

            loop {
                tokio::select! {
                    _ = shutdown.recv() => {
                        info!("Outbox relay received shutdown signal");
                        break;
                    }
                    _ = pending_tick.tick() => {
                        self.sweep_pending().await;
                    }
                    _ = retry_tick.tick() => {
                        self.sweep_retry().await;
                    }
                }
            }

            info!("Outbox relay stopped");
        })
    }

    /// Run one pending sweep. Returns how many events were processed
    /// successfully.
    pub async fn sweep_pending(&self) -> usize {
        match self.store.fetch_pending(self.config.batch_limit).await {
            Ok(events) => self.run_batch(events).await,
            Err(e) => {
                warn!(error = %e, "Pending sweep failed to select events");
                0
            }
        }
    }

    /// Run one retry sweep over FAILED rows with remaining budget. Returns
    /// how many events were processed successfully.
    pub async fn sweep_retry(&self) -> usize {
        match self
            .store
            .fetch_retryable_failed(self.config.batch_limit)
            .await
        {
            Ok(events) => self.run_batch(events).await,
            Err(e) => {
                warn!(error = %e, "Retry sweep failed to select events");
                0
            }
        }
    }

    /// Execute a batch through the shared effect path.
    async fn run_batch(&self, events: Vec<OutboxEvent>) -> usize {
        let mut processed = 0;

        for event in events {
            metrics::counter!("outbox_swept_total").increment(1);

            match self.executor.execute(&event).await {
                Ok(()) => {
                    if let Err(e) = self.store.mark_processed(event.id).await {
                        // The effect ran; a redelivery on the next sweep is
                        // absorbed by the effect's idempotency.
                        warn!(outbox_id = event.id, error = %e, "Failed to mark event processed");
                    } else {
                        processed += 1;
                    }
                }
                Err(e) => {
                    debug!(
                        outbox_id = event.id,
                        event_type = %event.event_type,
                        error = %e,
                        "Outbox effect failed"
                    );
                    if let Err(store_err) = self.store.record_failure(event.id).await {
                        warn!(outbox_id = event.id, error = %store_err, "Failed to record outbox failure");
                    }
                }
            }
        }

        processed
    }
}
