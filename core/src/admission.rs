//! Admission queue abstraction for quota-bounded campaign entry.
//!
//! The admission queue is the cheap front gate of the pipeline: it rejects
//! requests once a campaign's quota is exhausted without touching the
//! relational store on the hot path, and guarantees at-most-one admission
//! per (user, campaign) pair.
//!
//! # Ordering and atomicity
//!
//! Implementations keep a per-campaign ordered waiting structure scored by a
//! monotonically increasing timestamp. Insert, rank lookup, and conditional
//! evict MUST be one atomic operation: evaluating `rank >= quota` in a
//! separate step from the insert is a check-then-act race that over-admits
//! under concurrency. The authoritative stock check downstream still bounds
//! grants, but the gate itself must not leak.
//!
//! # TTLs
//!
//! Admission entries, issued markers, and the cached quota all expire with
//! the campaign's operational window ([`ADMISSION_TTL`], 31 days) so stale
//! state self-evicts.

use crate::store::StoreError;
use crate::types::{CampaignId, UserId};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;

/// Operational window for admission state: entries, markers, and cached
/// quotas all expire after 31 days.
pub const ADMISSION_TTL: Duration = Duration::from_secs(31 * 24 * 60 * 60);

/// Errors from admission queue operations.
#[derive(Error, Debug)]
pub enum AdmissionError {
    /// The admission store (Redis) could not be reached or errored.
    #[error("Admission store error: {0}")]
    Store(String),

    /// The campaign's quota could not be loaded from the relational store.
    #[error("Failed to load quota for campaign {campaign_id}: {source}")]
    QuotaLoad {
        /// The campaign whose quota load failed.
        campaign_id: CampaignId,
        /// The underlying store error.
        source: StoreError,
    },

    /// The campaign does not exist, so no quota can be established.
    #[error("Campaign {0} not found")]
    CampaignNotFound(CampaignId),
}

/// The outcome of one admission attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AdmissionDecision {
    /// The user was admitted at this zero-based rank in the campaign's
    /// waiting order.
    Admitted {
        /// Zero-based position in the per-campaign ordering.
        rank: u64,
    },
    /// The campaign's quota is exhausted; the entry was evicted.
    QuotaExhausted,
    /// The user already holds an in-flight or completed admission for this
    /// campaign (idempotent rejection).
    AlreadyAdmitted,
}

impl AdmissionDecision {
    /// Whether the attempt was admitted.
    #[must_use]
    pub const fn is_admitted(&self) -> bool {
        matches!(self, Self::Admitted { .. })
    }
}

/// Source of the authoritative per-campaign quota, read on first admission
/// attempt and cached by the queue.
///
/// In production this is backed by the relational campaign's stock; tests
/// supply fixed values.
pub trait QuotaSource: Send + Sync {
    /// Look up the issuance quota for a campaign, `None` if the campaign
    /// does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the underlying store fails.
    fn quota(
        &self,
        campaign_id: CampaignId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<u32>, StoreError>> + Send + '_>>;
}

/// An ordered, deduplicating, quota-bounded waiting list keyed by campaign.
///
/// # Dyn Compatibility
///
/// Methods return explicit `Pin<Box<dyn Future>>` instead of `async fn` so
/// the trait can be used as `Arc<dyn AdmissionQueue>` across the pipeline.
pub trait AdmissionQueue: Send + Sync {
    /// Attempt to admit `user_id` into `campaign_id`'s quota.
    ///
    /// Idempotent per (user, campaign): once admitted, every later call
    /// returns [`AdmissionDecision::AlreadyAdmitted`] without consuming
    /// quota.
    ///
    /// # Errors
    ///
    /// Returns [`AdmissionError`] if the admission store is unreachable or
    /// the quota cannot be established.
    fn try_admit(
        &self,
        campaign_id: CampaignId,
        user_id: UserId,
    ) -> Pin<Box<dyn Future<Output = Result<AdmissionDecision, AdmissionError>> + Send + '_>>;

    /// Read-only rank lookup for status polling. `None` if the user holds
    /// no entry in the campaign's ordering.
    ///
    /// # Errors
    ///
    /// Returns [`AdmissionError`] if the admission store is unreachable.
    fn rank(
        &self,
        campaign_id: CampaignId,
        user_id: UserId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<u64>, AdmissionError>> + Send + '_>>;

    /// Approximate count of admitted entries for a campaign (the size of
    /// the ordering structure; may transiently include evicted entries).
    ///
    /// # Errors
    ///
    /// Returns [`AdmissionError`] if the admission store is unreachable.
    fn issued_count(
        &self,
        campaign_id: CampaignId,
    ) -> Pin<Box<dyn Future<Output = Result<u64, AdmissionError>> + Send + '_>>;

    /// Cache the campaign's quota, overwriting any existing value.
    ///
    /// # Errors
    ///
    /// Returns [`AdmissionError`] if the admission store is unreachable.
    fn set_quota(
        &self,
        campaign_id: CampaignId,
        quota: u32,
    ) -> Pin<Box<dyn Future<Output = Result<(), AdmissionError>> + Send + '_>>;

    /// Read the cached quota, `None` if nothing is cached yet.
    ///
    /// # Errors
    ///
    /// Returns [`AdmissionError`] if the admission store is unreachable.
    fn quota(
        &self,
        campaign_id: CampaignId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<u32>, AdmissionError>> + Send + '_>>;

    /// Remove a user's admission entry and issued marker, releasing the
    /// reserved rank. Used when the post-admission submit fails and the user
    /// must be allowed to retry.
    ///
    /// # Errors
    ///
    /// Returns [`AdmissionError`] if the admission store is unreachable.
    fn release(
        &self,
        campaign_id: CampaignId,
        user_id: UserId,
    ) -> Pin<Box<dyn Future<Output = Result<(), AdmissionError>> + Send + '_>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admitted_decision_reports_admitted() {
        assert!(AdmissionDecision::Admitted { rank: 0 }.is_admitted());
        assert!(!AdmissionDecision::QuotaExhausted.is_admitted());
        assert!(!AdmissionDecision::AlreadyAdmitted.is_admitted());
    }

    #[test]
    fn admission_ttl_is_31_days() {
        assert_eq!(ADMISSION_TTL.as_secs(), 31 * 86_400);
    }
}
