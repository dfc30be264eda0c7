//! In-memory dead-letter channel, flaky external delivery, and a collecting
//! failure sink.

use flashdrop_core::dlq::{
    DlqChannel, DlqEnvelope, DlqError, EnvelopeStream, ExternalDelivery, FailureSink,
};
use flashdrop_core::outbox::DomainEvent;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::mpsc;

/// In-memory [`DlqChannel`].
///
/// Published envelopes are both queued for the subscriber and kept for
/// inspection via [`InMemoryDlqChannel::drain_queued`], which lets tests
/// drive the consumer's processing step envelope by envelope.
pub struct InMemoryDlqChannel {
    tx: mpsc::UnboundedSender<DlqEnvelope>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<DlqEnvelope>>>,
    queued: Mutex<Vec<DlqEnvelope>>,
}

impl Default for InMemoryDlqChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryDlqChannel {
    /// Create an empty channel.
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(Some(rx)),
            queued: Mutex::new(Vec::new()),
        }
    }

    /// Take every envelope published since the last drain.
    ///
    /// # Panics
    ///
    /// Panics if the channel mutex is poisoned.
    #[allow(clippy::unwrap_used)] // Test double; a poisoned mutex is a test bug
    pub fn drain_queued(&self) -> Vec<DlqEnvelope> {
        std::mem::take(&mut *self.queued.lock().unwrap())
    }
}

impl DlqChannel for InMemoryDlqChannel {
    fn publish(
        &self,
        envelope: &DlqEnvelope,
    ) -> Pin<Box<dyn Future<Output = Result<(), DlqError>> + Send + '_>> {
        let envelope = envelope.clone();
        Box::pin(async move {
            self.queued
                .lock()
                .map_err(|_| DlqError::Publish("channel mutex poisoned".to_string()))?
                .push(envelope.clone());
            self.tx
                .send(envelope)
                .map_err(|e| DlqError::Publish(e.to_string()))
        })
    }

    fn subscribe(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<EnvelopeStream, DlqError>> + Send + '_>> {
        Box::pin(async move {
            let rx = self
                .rx
                .lock()
                .map_err(|_| DlqError::Subscribe("channel mutex poisoned".to_string()))?
                .take()
                .ok_or_else(|| DlqError::Subscribe("channel already subscribed".to_string()))?;

            let stream = async_stream::stream! {
                let mut rx = rx;
                while let Some(envelope) = rx.recv().await {
                    yield Ok(envelope);
                }
            };

            Ok(Box::pin(stream) as EnvelopeStream)
        })
    }
}

/// An [`ExternalDelivery`] that fails its first `failures` attempts and
/// succeeds afterwards.
pub struct FlakyDelivery {
    failures_remaining: AtomicU32,
    attempts: AtomicU32,
    delivered: Mutex<Vec<DomainEvent>>,
}

impl FlakyDelivery {
    /// Create a delivery failing the first `failures` attempts.
    #[must_use]
    pub const fn failing(failures: u32) -> Self {
        Self {
            failures_remaining: AtomicU32::new(failures),
            attempts: AtomicU32::new(0),
            delivered: Mutex::new(Vec::new()),
        }
    }

    /// A delivery that always succeeds.
    #[must_use]
    pub const fn reliable() -> Self {
        Self::failing(0)
    }

    /// How many delivery attempts were made.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Events that were successfully delivered.
    ///
    /// # Panics
    ///
    /// Panics if the delivery mutex is poisoned.
    #[must_use]
    #[allow(clippy::unwrap_used)] // Test double; a poisoned mutex is a test bug
    pub fn delivered(&self) -> Vec<DomainEvent> {
        self.delivered.lock().unwrap().clone()
    }
}

impl ExternalDelivery for FlakyDelivery {
    fn deliver(&self, event: &DomainEvent) -> Pin<Box<dyn Future<Output = bool> + Send + '_>> {
        let event = event.clone();
        Box::pin(async move {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let remaining = self.failures_remaining.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures_remaining.store(remaining - 1, Ordering::SeqCst);
                return false;
            }
            if let Ok(mut delivered) = self.delivered.lock() {
                delivered.push(event);
            }
            true
        })
    }
}

/// A [`FailureSink`] that collects recorded envelopes.
#[derive(Default)]
pub struct CollectingFailureSink {
    records: Mutex<Vec<DlqEnvelope>>,
}

impl CollectingFailureSink {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Envelopes recorded as terminal failures.
    ///
    /// # Panics
    ///
    /// Panics if the sink mutex is poisoned.
    #[must_use]
    #[allow(clippy::unwrap_used)] // Test double; a poisoned mutex is a test bug
    pub fn records(&self) -> Vec<DlqEnvelope> {
        self.records.lock().unwrap().clone()
    }
}

impl FailureSink for CollectingFailureSink {
    fn record(
        &self,
        envelope: &DlqEnvelope,
    ) -> Pin<Box<dyn Future<Output = Result<(), DlqError>> + Send + '_>> {
        let envelope = envelope.clone();
        Box::pin(async move {
            self.records
                .lock()
                .map_err(|_| DlqError::Sink("sink mutex poisoned".to_string()))?
                .push(envelope);
            Ok(())
        })
    }
}
