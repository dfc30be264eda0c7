//! The issuance worker: the only component allowed to decrement stock and
//! create grants.
//!
//! Requests arrive through the partitioned channel in per-campaign order,
//! which serializes stock checks for a campaign without any global lock.
//! Each request resolves to exactly one of:
//!
//! - a success result (one decrement, one grant, one outbox row - all in
//!   one transaction), acknowledged;
//! - a failure result with one of the fixed reasons, acknowledged;
//! - a retryable store failure - no result at all, the message is
//!   redelivered.
//!
//! Results are published fire-and-forget, keyed by campaign id so they keep
//! relative order with their requests. Publish failures are logged and
//! counted, never retried here: durability-requiring events go through the
//! outbox instead.

use flashdrop_core::channel::{Disposition, RequestHandler, ResultPublisher};
use flashdrop_core::clock::Clock;
use flashdrop_core::issue::{IssueOutcome, IssueRequest, IssueResult, RejectReason};
use flashdrop_core::store::{CampaignStore, StoreError};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Consumes issuance requests and performs the authoritative decrement.
pub struct IssuanceWorker {
    /// Relational source of truth for stock and grants.
    store: Arc<dyn CampaignStore>,
    /// Outbound result channel.
    results: Arc<dyn ResultPublisher>,
    /// Timestamp source for results.
    clock: Arc<dyn Clock>,
}

impl IssuanceWorker {
    /// Create a worker over the given store and result publisher.
    #[must_use]
    pub fn new(
        store: Arc<dyn CampaignStore>,
        results: Arc<dyn ResultPublisher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            results,
            clock,
        }
    }

    /// Map a terminal store error onto the caller-visible reason set.
    const fn reject_reason(error: &StoreError) -> RejectReason {
        match error {
            StoreError::CampaignNotFound(_) => RejectReason::CampaignNotFound,
            StoreError::AlreadyIssued { .. } => RejectReason::AlreadyIssued,
            StoreError::OutOfStock(_) => RejectReason::OutOfStock,
            StoreError::Conflict(_) | StoreError::Connection(_) | StoreError::Database(_) => {
                RejectReason::Internal
            }
        }
    }

    /// Publish a result without blocking the consume path. The spawned task
    /// classifies the publish outcome and updates observability counters.
    fn publish_result(&self, result: IssueResult) {
        let publisher = Arc::clone(&self.results);
        tokio::spawn(async move {
            match publisher.publish(&result).await {
                Ok(()) => {
                    debug!(
                        request_id = %result.request_id,
                        campaign_id = %result.campaign_id,
                        granted = result.is_granted(),
                        "Issue result published"
                    );
                    metrics::counter!("issuance_results_published_total").increment(1);
                }
                Err(e) => {
                    // Fire-and-forget by design: the result channel is not
                    // the durability path.
                    error!(
                        request_id = %result.request_id,
                        campaign_id = %result.campaign_id,
                        error = %e,
                        "Failed to publish issue result"
                    );
                    metrics::counter!("issuance_result_publish_failures_total").increment(1);
                }
            }
        });
    }

    fn result(&self, request: &IssueRequest, outcome: IssueOutcome) -> IssueResult {
        IssueResult {
            request_id: request.request_id,
            user_id: request.user_id,
            campaign_id: request.campaign_id,
            outcome,
            processed_at: self.clock.now(),
        }
    }
}

impl RequestHandler for IssuanceWorker {
    fn handle(&self, request: IssueRequest) -> Pin<Box<dyn Future<Output = Disposition> + Send + '_>> {
        Box::pin(async move {
            match self
                .store
                .issue_grant(request.user_id, request.campaign_id)
                .await
            {
                Ok(issued) => {
                    metrics::counter!("issuance_results_total", "outcome" => "granted")
                        .increment(1);
                    let result = self.result(
                        &request,
                        IssueOutcome::Granted {
                            grant_id: issued.grant_id,
                            remaining_stock: issued.remaining_stock,
                        },
                    );
                    self.publish_result(result);
                    Disposition::Ack
                }
                Err(e) if e.is_retryable() => {
                    // No result: the request is redelivered and resolved on
                    // a later attempt.
                    warn!(
                        request_id = %request.request_id,
                        campaign_id = %request.campaign_id,
                        error = %e,
                        "Retryable store failure, request will be redelivered"
                    );
                    metrics::counter!("issuance_redeliveries_total").increment(1);
                    Disposition::Retry
                }
                Err(e) => {
                    let reason = Self::reject_reason(&e);
                    debug!(
                        request_id = %request.request_id,
                        campaign_id = %request.campaign_id,
                        reason = reason.message(),
                        "Issuance rejected"
                    );
                    metrics::counter!("issuance_results_total", "outcome" => reason.message())
                        .increment(1);
                    let result = self.result(&request, IssueOutcome::Rejected { reason });
                    self.publish_result(result);
                    Disposition::Ack
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flashdrop_core::types::CampaignId;

    #[test]
    fn store_errors_map_to_fixed_reasons() {
        let campaign = CampaignId::new(1);
        assert_eq!(
            IssuanceWorker::reject_reason(&StoreError::CampaignNotFound(campaign)),
            RejectReason::CampaignNotFound
        );
        assert_eq!(
            IssuanceWorker::reject_reason(&StoreError::OutOfStock(campaign)),
            RejectReason::OutOfStock
        );
        assert_eq!(
            IssuanceWorker::reject_reason(&StoreError::Database("boom".into())),
            RejectReason::Internal
        );
    }
}
