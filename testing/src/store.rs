//! In-memory campaign store with real stock and uniqueness semantics, plus
//! injectable failures for exercising the worker's retry classification.

use flashdrop_core::admission::QuotaSource;
use flashdrop_core::store::{CampaignStore, IssuedGrant, StoreError};
use flashdrop_core::types::{Campaign, CampaignId, Grant, GrantId, UserId};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

#[derive(Default)]
struct Inner {
    campaigns: HashMap<CampaignId, Campaign>,
    grants: HashMap<(UserId, CampaignId), Grant>,
    /// Errors returned by upcoming `issue_grant` calls, front first.
    failures: VecDeque<StoreError>,
}

/// In-memory [`CampaignStore`].
///
/// `issue_grant` follows the worker's check order - not found, already
/// issued, out of stock, then the decrement - under one mutex, so the
/// conservation law (`initial_stock - stock == grants`) holds at every
/// quiescent point.
#[derive(Default)]
pub struct InMemoryCampaignStore {
    inner: Mutex<Inner>,
}

impl InMemoryCampaignStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a campaign row.
    ///
    /// # Panics
    ///
    /// Panics if the store mutex is poisoned.
    #[allow(clippy::unwrap_used)] // Test double; a poisoned mutex is a test bug
    pub fn insert_campaign(&self, campaign: Campaign) {
        self.inner
            .lock()
            .unwrap()
            .campaigns
            .insert(campaign.id, campaign);
    }

    /// Queue an error for the next `issue_grant` call (front first).
    ///
    /// # Panics
    ///
    /// Panics if the store mutex is poisoned.
    #[allow(clippy::unwrap_used)] // Test double; a poisoned mutex is a test bug
    pub fn inject_failure(&self, error: StoreError) {
        self.inner.lock().unwrap().failures.push_back(error);
    }

    /// All grants issued so far.
    ///
    /// # Panics
    ///
    /// Panics if the store mutex is poisoned.
    #[must_use]
    #[allow(clippy::unwrap_used)] // Test double; a poisoned mutex is a test bug
    pub fn grants(&self) -> Vec<Grant> {
        self.inner.lock().unwrap().grants.values().cloned().collect()
    }

    /// Number of grants for one campaign.
    ///
    /// # Panics
    ///
    /// Panics if the store mutex is poisoned.
    #[must_use]
    #[allow(clippy::unwrap_used)] // Test double; a poisoned mutex is a test bug
    pub fn grant_count(&self, campaign_id: CampaignId) -> usize {
        self.inner
            .lock()
            .unwrap()
            .grants
            .keys()
            .filter(|(_, cid)| *cid == campaign_id)
            .count()
    }

    /// Remaining stock of a campaign, `None` if it does not exist.
    ///
    /// # Panics
    ///
    /// Panics if the store mutex is poisoned.
    #[must_use]
    #[allow(clippy::unwrap_used)] // Test double; a poisoned mutex is a test bug
    pub fn stock(&self, campaign_id: CampaignId) -> Option<i64> {
        self.inner
            .lock()
            .unwrap()
            .campaigns
            .get(&campaign_id)
            .map(|c| c.stock)
    }
}

fn poisoned<T>(_: std::sync::PoisonError<T>) -> StoreError {
    StoreError::Database("store mutex poisoned".to_string())
}

impl CampaignStore for InMemoryCampaignStore {
    fn fetch(
        &self,
        campaign_id: CampaignId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Campaign>, StoreError>> + Send + '_>> {
        Box::pin(async move {
            let inner = self.inner.lock().map_err(poisoned)?;
            Ok(inner.campaigns.get(&campaign_id).cloned())
        })
    }

    fn issue_grant(
        &self,
        user_id: UserId,
        campaign_id: CampaignId,
    ) -> Pin<Box<dyn Future<Output = Result<IssuedGrant, StoreError>> + Send + '_>> {
        Box::pin(async move {
            let mut inner = self.inner.lock().map_err(poisoned)?;

            if let Some(error) = inner.failures.pop_front() {
                return Err(error);
            }

            let Some(campaign) = inner.campaigns.get(&campaign_id) else {
                return Err(StoreError::CampaignNotFound(campaign_id));
            };
            let expires_at = campaign.valid_until;

            if inner.grants.contains_key(&(user_id, campaign_id)) {
                return Err(StoreError::AlreadyIssued {
                    user_id,
                    campaign_id,
                });
            }

            let stock = inner
                .campaigns
                .get(&campaign_id)
                .map(|c| c.stock)
                .unwrap_or_default();
            if stock <= 0 {
                return Err(StoreError::OutOfStock(campaign_id));
            }

            let remaining_stock = stock - 1;
            if let Some(campaign) = inner.campaigns.get_mut(&campaign_id) {
                campaign.stock = remaining_stock;
            }

            let grant_id = GrantId::new();
            inner.grants.insert(
                (user_id, campaign_id),
                Grant {
                    id: grant_id,
                    user_id,
                    campaign_id,
                    used: false,
                    expires_at,
                },
            );

            Ok(IssuedGrant {
                grant_id,
                remaining_stock,
            })
        })
    }
}

impl QuotaSource for InMemoryCampaignStore {
    fn quota(
        &self,
        campaign_id: CampaignId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<u32>, StoreError>> + Send + '_>> {
        Box::pin(async move {
            let inner = self.inner.lock().map_err(poisoned)?;
            Ok(inner
                .campaigns
                .get(&campaign_id)
                .map(|c| u32::try_from(c.stock).unwrap_or(u32::MAX)))
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use flashdrop_core::types::Discount;

    fn campaign(id: i64, stock: i64) -> Campaign {
        Campaign {
            id: CampaignId::new(id),
            discount: Discount::Amount(1_000),
            stock,
            valid_from: Utc::now(),
            valid_until: Utc::now() + Duration::days(30),
        }
    }

    #[tokio::test]
    async fn issue_decrements_and_records_grant() {
        let store = InMemoryCampaignStore::new();
        store.insert_campaign(campaign(1, 2));

        let issued = store
            .issue_grant(UserId::new(1), CampaignId::new(1))
            .await
            .unwrap();
        assert_eq!(issued.remaining_stock, 1);
        assert_eq!(store.grant_count(CampaignId::new(1)), 1);
        assert_eq!(store.stock(CampaignId::new(1)), Some(1));
    }

    #[tokio::test]
    async fn duplicate_outranks_out_of_stock() {
        let store = InMemoryCampaignStore::new();
        store.insert_campaign(campaign(1, 1));

        store
            .issue_grant(UserId::new(1), CampaignId::new(1))
            .await
            .unwrap();

        // Stock is now 0 and the user already holds a grant; the duplicate
        // reason wins.
        let err = store
            .issue_grant(UserId::new(1), CampaignId::new(1))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::AlreadyIssued { .. }));
    }

    #[tokio::test]
    async fn injected_failures_surface_once() {
        let store = InMemoryCampaignStore::new();
        store.insert_campaign(campaign(1, 1));
        store.inject_failure(StoreError::Conflict("simulated".into()));

        let err = store
            .issue_grant(UserId::new(1), CampaignId::new(1))
            .await
            .unwrap_err();
        assert!(err.is_retryable());

        // Next call succeeds.
        assert!(
            store
                .issue_grant(UserId::new(1), CampaignId::new(1))
                .await
                .is_ok()
        );
    }
}
