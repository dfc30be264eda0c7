//! In-memory request channel and result recorder.
//!
//! The channel preserves submission order (a single queue stands in for the
//! single per-campaign partition) and honors the acknowledgment contract:
//! a handler returning `Retry` gets the same request redelivered
//! immediately, exactly like the uncommitted-offset rewind in production.

use flashdrop_core::channel::{
    ChannelError, Disposition, RequestChannel, RequestHandler, ResultPublisher,
};
use flashdrop_core::issue::{IssueRequest, IssueResult};
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;

/// In-memory [`RequestChannel`] with a pull-driven consumer side.
pub struct InMemoryIssueChannel {
    tx: mpsc::UnboundedSender<IssueRequest>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<IssueRequest>>,
}

impl Default for InMemoryIssueChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryIssueChannel {
    /// Create an empty channel.
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: tokio::sync::Mutex::new(rx),
        }
    }

    /// Drain every queued request through the handler, redelivering on
    /// `Retry` until each request reaches a terminal disposition. Returns
    /// the number of requests resolved.
    pub async fn drive(&self, handler: &dyn RequestHandler) -> usize {
        let mut resolved = 0;
        let mut rx = self.rx.lock().await;

        while let Ok(request) = rx.try_recv() {
            loop {
                match handler.handle(request.clone()).await {
                    Disposition::Ack => break,
                    Disposition::Retry => {} // immediate redelivery, no backoff
                }
            }
            resolved += 1;
        }

        resolved
    }
}

impl RequestChannel for InMemoryIssueChannel {
    fn submit(
        &self,
        request: &IssueRequest,
    ) -> Pin<Box<dyn Future<Output = Result<(), ChannelError>> + Send + '_>> {
        let sent = self.tx.send(request.clone());
        Box::pin(async move {
            sent.map_err(|e| ChannelError::PublishFailed {
                topic: "in-memory-requests".to_string(),
                reason: e.to_string(),
            })
        })
    }
}

/// A [`RequestChannel`] that always fails, for exercising the gate's
/// release-on-submit-failure path.
#[derive(Default)]
pub struct FailingRequestChannel;

impl RequestChannel for FailingRequestChannel {
    fn submit(
        &self,
        _request: &IssueRequest,
    ) -> Pin<Box<dyn Future<Output = Result<(), ChannelError>> + Send + '_>> {
        Box::pin(async {
            Err(ChannelError::PublishFailed {
                topic: "in-memory-requests".to_string(),
                reason: "simulated broker outage".to_string(),
            })
        })
    }
}

/// Records published results; the worker publishes fire-and-forget, so
/// assertions use [`CapturingResultPublisher::wait_for`].
#[derive(Default)]
pub struct CapturingResultPublisher {
    results: Mutex<Vec<IssueResult>>,
}

impl CapturingResultPublisher {
    /// Create an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of results published so far.
    ///
    /// # Panics
    ///
    /// Panics if the recorder mutex is poisoned.
    #[must_use]
    #[allow(clippy::unwrap_used)] // Test double; a poisoned mutex is a test bug
    pub fn results(&self) -> Vec<IssueResult> {
        self.results.lock().unwrap().clone()
    }

    /// Wait until at least `count` results arrived, or the timeout elapses.
    /// Returns the snapshot either way.
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> Vec<IssueResult> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let snapshot = self.results();
            if snapshot.len() >= count || tokio::time::Instant::now() >= deadline {
                return snapshot;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

impl ResultPublisher for CapturingResultPublisher {
    fn publish(
        &self,
        result: &IssueResult,
    ) -> Pin<Box<dyn Future<Output = Result<(), ChannelError>> + Send + '_>> {
        let result = result.clone();
        Box::pin(async move {
            self.results
                .lock()
                .map_err(|_| ChannelError::TransportError("recorder mutex poisoned".to_string()))?
                .push(result);
            Ok(())
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use chrono::Utc;
    use flashdrop_core::types::{CampaignId, UserId};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    struct RetryOnce {
        calls: AtomicUsize,
    }

    impl RequestHandler for RetryOnce {
        fn handle(
            &self,
            _request: IssueRequest,
        ) -> Pin<Box<dyn Future<Output = Disposition> + Send + '_>> {
            let first = self.calls.fetch_add(1, Ordering::SeqCst) == 0;
            Box::pin(async move {
                if first {
                    Disposition::Retry
                } else {
                    Disposition::Ack
                }
            })
        }
    }

    #[tokio::test]
    async fn retry_redelivers_the_same_request() {
        let channel = InMemoryIssueChannel::new();
        let request = IssueRequest {
            request_id: Uuid::new_v4(),
            user_id: UserId::new(1),
            campaign_id: CampaignId::new(1),
            submitted_at: Utc::now(),
        };
        channel.submit(&request).await.unwrap();

        let handler = RetryOnce {
            calls: AtomicUsize::new(0),
        };
        let resolved = channel.drive(&handler).await;

        assert_eq!(resolved, 1);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 2); // retry + ack
    }
}
