//! In-memory admission queue with the same semantics as the Redis
//! implementation: ordered entries, idempotent rejection, and atomic
//! admit-or-evict (here, mutex-serialized).

use flashdrop_core::admission::{
    AdmissionDecision, AdmissionError, AdmissionQueue, QuotaSource,
};
use flashdrop_core::types::{CampaignId, UserId};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Per-campaign admission state.
#[derive(Default)]
struct CampaignEntry {
    /// Cached quota.
    quota: u32,
    /// Ordering structure: insertion score -> user.
    order: BTreeMap<u64, UserId>,
    /// Reverse index: user -> score.
    members: HashMap<UserId, u64>,
    /// Issued markers (admitted users, idempotent rejection).
    issued: HashSet<UserId>,
}

/// In-memory [`AdmissionQueue`].
///
/// The whole admit step runs under one mutex, matching the atomicity of the
/// production Lua script: two concurrent admissions can never both observe
/// the last free slot.
pub struct InMemoryAdmissionQueue {
    quota_source: Arc<dyn QuotaSource>,
    campaigns: Mutex<HashMap<CampaignId, CampaignEntry>>,
    /// Monotonically increasing ordering score.
    sequence: AtomicU64,
}

impl InMemoryAdmissionQueue {
    /// Create a queue loading quotas from the given source.
    #[must_use]
    pub fn new(quota_source: Arc<dyn QuotaSource>) -> Self {
        Self {
            quota_source,
            campaigns: Mutex::new(HashMap::new()),
            sequence: AtomicU64::new(0),
        }
    }

    /// Ensure a campaign's quota is primed; loads it on first touch.
    async fn prime(&self, campaign_id: CampaignId) -> Result<(), AdmissionError> {
        {
            let campaigns = self.campaigns.lock().map_err(poisoned)?;
            if campaigns.contains_key(&campaign_id) {
                return Ok(());
            }
        }

        let quota = self
            .quota_source
            .quota(campaign_id)
            .await
            .map_err(|source| AdmissionError::QuotaLoad {
                campaign_id,
                source,
            })?
            .ok_or(AdmissionError::CampaignNotFound(campaign_id))?;

        let mut campaigns = self.campaigns.lock().map_err(poisoned)?;
        campaigns.entry(campaign_id).or_insert_with(|| CampaignEntry {
            quota,
            ..CampaignEntry::default()
        });
        Ok(())
    }
}

fn poisoned<T>(_: std::sync::PoisonError<T>) -> AdmissionError {
    AdmissionError::Store("admission mutex poisoned".to_string())
}

impl AdmissionQueue for InMemoryAdmissionQueue {
    fn try_admit(
        &self,
        campaign_id: CampaignId,
        user_id: UserId,
    ) -> Pin<Box<dyn Future<Output = Result<AdmissionDecision, AdmissionError>> + Send + '_>> {
        Box::pin(async move {
            self.prime(campaign_id).await?;

            let mut campaigns = self.campaigns.lock().map_err(poisoned)?;
            let entry = campaigns
                .entry(campaign_id)
                .or_default();

            if entry.issued.contains(&user_id) || entry.members.contains_key(&user_id) {
                return Ok(AdmissionDecision::AlreadyAdmitted);
            }

            if entry.members.len() as u64 >= u64::from(entry.quota) {
                return Ok(AdmissionDecision::QuotaExhausted);
            }

            let score = self.sequence.fetch_add(1, Ordering::SeqCst);
            entry.order.insert(score, user_id);
            entry.members.insert(user_id, score);
            entry.issued.insert(user_id);
            let rank = entry.order.range(..score).count() as u64;

            Ok(AdmissionDecision::Admitted { rank })
        })
    }

    fn rank(
        &self,
        campaign_id: CampaignId,
        user_id: UserId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<u64>, AdmissionError>> + Send + '_>> {
        Box::pin(async move {
            let campaigns = self.campaigns.lock().map_err(poisoned)?;
            let Some(entry) = campaigns.get(&campaign_id) else {
                return Ok(None);
            };
            let Some(score) = entry.members.get(&user_id) else {
                return Ok(None);
            };
            Ok(Some(entry.order.range(..*score).count() as u64))
        })
    }

    fn issued_count(
        &self,
        campaign_id: CampaignId,
    ) -> Pin<Box<dyn Future<Output = Result<u64, AdmissionError>> + Send + '_>> {
        Box::pin(async move {
            let campaigns = self.campaigns.lock().map_err(poisoned)?;
            Ok(campaigns
                .get(&campaign_id)
                .map_or(0, |entry| entry.order.len() as u64))
        })
    }

    fn set_quota(
        &self,
        campaign_id: CampaignId,
        quota: u32,
    ) -> Pin<Box<dyn Future<Output = Result<(), AdmissionError>> + Send + '_>> {
        Box::pin(async move {
            let mut campaigns = self.campaigns.lock().map_err(poisoned)?;
            campaigns.entry(campaign_id).or_default().quota = quota;
            Ok(())
        })
    }

    fn quota(
        &self,
        campaign_id: CampaignId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<u32>, AdmissionError>> + Send + '_>> {
        Box::pin(async move {
            let campaigns = self.campaigns.lock().map_err(poisoned)?;
            Ok(campaigns.get(&campaign_id).map(|entry| entry.quota))
        })
    }

    fn release(
        &self,
        campaign_id: CampaignId,
        user_id: UserId,
    ) -> Pin<Box<dyn Future<Output = Result<(), AdmissionError>> + Send + '_>> {
        Box::pin(async move {
            let mut campaigns = self.campaigns.lock().map_err(poisoned)?;
            if let Some(entry) = campaigns.get_mut(&campaign_id) {
                if let Some(score) = entry.members.remove(&user_id) {
                    entry.order.remove(&score);
                }
                entry.issued.remove(&user_id);
            }
            Ok(())
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use flashdrop_core::store::StoreError;

    struct OneCampaign(u32);

    impl QuotaSource for OneCampaign {
        fn quota(
            &self,
            campaign_id: CampaignId,
        ) -> Pin<Box<dyn Future<Output = Result<Option<u32>, StoreError>> + Send + '_>> {
            let quota = (campaign_id.as_i64() == 1).then_some(self.0);
            Box::pin(async move { Ok(quota) })
        }
    }

    #[tokio::test]
    async fn admits_in_order_up_to_quota() {
        let queue = InMemoryAdmissionQueue::new(Arc::new(OneCampaign(2)));
        let campaign = CampaignId::new(1);

        assert_eq!(
            queue.try_admit(campaign, UserId::new(10)).await.unwrap(),
            AdmissionDecision::Admitted { rank: 0 }
        );
        assert_eq!(
            queue.try_admit(campaign, UserId::new(11)).await.unwrap(),
            AdmissionDecision::Admitted { rank: 1 }
        );
        assert_eq!(
            queue.try_admit(campaign, UserId::new(12)).await.unwrap(),
            AdmissionDecision::QuotaExhausted
        );
        assert_eq!(queue.issued_count(campaign).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn duplicate_admission_is_idempotent() {
        let queue = InMemoryAdmissionQueue::new(Arc::new(OneCampaign(5)));
        let campaign = CampaignId::new(1);
        let user = UserId::new(10);

        assert!(queue.try_admit(campaign, user).await.unwrap().is_admitted());
        assert_eq!(
            queue.try_admit(campaign, user).await.unwrap(),
            AdmissionDecision::AlreadyAdmitted
        );
        assert_eq!(queue.issued_count(campaign).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn unknown_campaign_is_an_error() {
        let queue = InMemoryAdmissionQueue::new(Arc::new(OneCampaign(5)));
        let result = queue.try_admit(CampaignId::new(2), UserId::new(1)).await;
        assert!(matches!(result, Err(AdmissionError::CampaignNotFound(_))));
    }

    #[tokio::test]
    async fn release_frees_the_slot() {
        let queue = InMemoryAdmissionQueue::new(Arc::new(OneCampaign(1)));
        let campaign = CampaignId::new(1);

        assert!(queue.try_admit(campaign, UserId::new(1)).await.unwrap().is_admitted());
        assert_eq!(
            queue.try_admit(campaign, UserId::new(2)).await.unwrap(),
            AdmissionDecision::QuotaExhausted
        );

        queue.release(campaign, UserId::new(1)).await.unwrap();
        assert!(queue.try_admit(campaign, UserId::new(2)).await.unwrap().is_admitted());
    }
}
