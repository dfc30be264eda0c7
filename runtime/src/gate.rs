//! The submission gate: admission plus channel submit, the inbound seam the
//! transport layer calls.
//!
//! The gate is synchronous from the caller's perspective only up to
//! "accepted, pending": the outcome of an accepted request arrives
//! out-of-band through the result channel.

use flashdrop_core::admission::{AdmissionDecision, AdmissionError, AdmissionQueue};
use flashdrop_core::channel::{ChannelError, RequestChannel};
use flashdrop_core::clock::Clock;
use flashdrop_core::issue::IssueRequest;
use flashdrop_core::types::{CampaignId, UserId};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info};
use uuid::Uuid;

/// Errors the gate can surface to the transport layer.
#[derive(Error, Debug)]
pub enum GateError {
    /// The admission store failed.
    #[error(transparent)]
    Admission(#[from] AdmissionError),

    /// Admission succeeded but the request could not be submitted; the
    /// admission entry was released so the caller may retry.
    #[error(transparent)]
    Channel(#[from] ChannelError),
}

/// Outcome of a submission attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Admitted and queued for issuance; the result arrives out-of-band.
    Accepted {
        /// Correlation id for the eventual result.
        request_id: Uuid,
        /// Zero-based admission rank.
        rank: u64,
    },
    /// The campaign's quota is exhausted.
    QuotaExhausted,
    /// This user already has an in-flight or completed request for the
    /// campaign.
    AlreadyRequested,
}

/// Admission front gate plus request-channel submit.
pub struct IssuanceGate {
    admission: Arc<dyn AdmissionQueue>,
    requests: Arc<dyn RequestChannel>,
    clock: Arc<dyn Clock>,
}

impl IssuanceGate {
    /// Create a gate over the given admission queue and request channel.
    #[must_use]
    pub fn new(
        admission: Arc<dyn AdmissionQueue>,
        requests: Arc<dyn RequestChannel>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            admission,
            requests,
            clock,
        }
    }

    /// Submit an issuance request for `(user_id, campaign_id)`.
    ///
    /// # Errors
    ///
    /// - [`GateError::Admission`] if the admission store fails
    /// - [`GateError::Channel`] if admission succeeded but the channel
    ///   submit failed; the admission entry has been released
    pub async fn submit(
        &self,
        user_id: UserId,
        campaign_id: CampaignId,
    ) -> Result<SubmitOutcome, GateError> {
        metrics::counter!("admission_attempts_total").increment(1);

        match self.admission.try_admit(campaign_id, user_id).await? {
            AdmissionDecision::Admitted { rank } => {
                let request = IssueRequest {
                    request_id: Uuid::new_v4(),
                    user_id,
                    campaign_id,
                    submitted_at: self.clock.now(),
                };

                if let Err(e) = self.requests.submit(&request).await {
                    // Undo the admission so the user is not locked out of a
                    // coupon that was never queued.
                    if let Err(release_err) = self.admission.release(campaign_id, user_id).await {
                        error!(
                            campaign_id = %campaign_id,
                            user_id = %user_id,
                            error = %release_err,
                            "Failed to release admission entry after submit failure"
                        );
                    }
                    metrics::counter!("admission_submit_failures_total").increment(1);
                    return Err(GateError::Channel(e));
                }

                info!(
                    request_id = %request.request_id,
                    campaign_id = %campaign_id,
                    user_id = %user_id,
                    rank = rank,
                    "Issuance request admitted"
                );
                metrics::counter!("admission_granted_total").increment(1);

                Ok(SubmitOutcome::Accepted {
                    request_id: request.request_id,
                    rank,
                })
            }
            AdmissionDecision::QuotaExhausted => {
                metrics::counter!("admission_rejected_total", "reason" => "quota_exhausted")
                    .increment(1);
                Ok(SubmitOutcome::QuotaExhausted)
            }
            AdmissionDecision::AlreadyAdmitted => {
                metrics::counter!("admission_rejected_total", "reason" => "duplicate")
                    .increment(1);
                Ok(SubmitOutcome::AlreadyRequested)
            }
        }
    }

    /// Read-only rank lookup for status polling.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::Admission`] if the admission store fails.
    pub async fn rank(
        &self,
        campaign_id: CampaignId,
        user_id: UserId,
    ) -> Result<Option<u64>, GateError> {
        Ok(self.admission.rank(campaign_id, user_id).await?)
    }

    /// Approximate count of admitted entries for a campaign.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::Admission`] if the admission store fails.
    pub async fn issued_count(&self, campaign_id: CampaignId) -> Result<u64, GateError> {
        Ok(self.admission.issued_count(campaign_id).await?)
    }
}
