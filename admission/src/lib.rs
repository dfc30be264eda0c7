//! Redis-backed admission queue for flashdrop.
//!
//! Implements the [`AdmissionQueue`] trait from `flashdrop-core` over a
//! per-campaign sorted set:
//!
//! 1. Members are user ids, scored by a monotonically increasing millisecond
//!    timestamp (arrival order).
//! 2. Admission is one Lua script: marker check, `ZADD NX`, `ZRANK`,
//!    conditional `ZREM` when the rank is at or past the quota, and marker
//!    `SET` on success. The script is indivisible on the Redis side, so two
//!    concurrent admissions can never both observe a free slot - the
//!    check-then-act window of a pipelined insert/rank/evict sequence does
//!    not exist here.
//! 3. The per-campaign quota is cached in Redis with a 31-day expiry and
//!    loaded through a [`QuotaSource`] (the relational campaign's stock) on
//!    the first admission attempt.
//!
//! The authoritative stock check still happens downstream in the issuance
//! worker; this gate exists so exhausted campaigns are rejected without a
//! relational round-trip.
//!
//! # Example
//!
//! ```no_run
//! use flashdrop_admission::RedisAdmissionQueue;
//! use flashdrop_core::admission::AdmissionQueue;
//! use flashdrop_core::types::{CampaignId, UserId};
//! # use std::sync::Arc;
//!
//! # async fn example(quota_source: Arc<dyn flashdrop_core::admission::QuotaSource>)
//! # -> Result<(), Box<dyn std::error::Error>> {
//! let queue = RedisAdmissionQueue::new("redis://127.0.0.1:6379", quota_source).await?;
//!
//! let decision = queue.try_admit(CampaignId::new(1), UserId::new(42)).await?;
//! println!("admitted: {}", decision.is_admitted());
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use flashdrop_core::admission::{
    ADMISSION_TTL, AdmissionDecision, AdmissionError, AdmissionQueue, QuotaSource,
};
use flashdrop_core::types::{CampaignId, UserId};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Script};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Atomic admit-or-evict script.
///
/// KEYS: 1 = waiting zset, 2 = issued marker, 3 = quota cache.
/// ARGV: 1 = user id member, 2 = timestamp score, 3 = TTL seconds.
///
/// Replies: `{"dup", 0}`, `{"noquota", 0}`, `{"full", 0}`, or
/// `{"ok", rank}`.
const ADMIT_SCRIPT: &str = r"
if redis.call('EXISTS', KEYS[2]) == 1 then
  return {'dup', 0}
end
local quota = tonumber(redis.call('GET', KEYS[3]))
if quota == nil then
  return {'noquota', 0}
end
if redis.call('ZADD', KEYS[1], 'NX', ARGV[2], ARGV[1]) == 0 then
  return {'dup', 0}
end
local rank = redis.call('ZRANK', KEYS[1], ARGV[1])
if rank >= quota then
  redis.call('ZREM', KEYS[1], ARGV[1])
  return {'full', 0}
end
redis.call('SET', KEYS[2], '1', 'EX', ARGV[3])
redis.call('EXPIRE', KEYS[1], ARGV[3])
return {'ok', rank}
";

/// Redis-backed admission queue.
///
/// Cheap to clone; the connection manager multiplexes one connection.
#[derive(Clone)]
pub struct RedisAdmissionQueue {
    /// Connection manager for connection pooling.
    conn_manager: ConnectionManager,
    /// Authoritative quota source, consulted on cache miss.
    quota_source: Arc<dyn QuotaSource>,
    /// Compiled admit script (sent by SHA after first use).
    admit: Arc<Script>,
    /// Expiry applied to all admission keys.
    ttl: Duration,
}

impl RedisAdmissionQueue {
    /// Create a new admission queue against the given Redis URL.
    ///
    /// # Errors
    ///
    /// Returns [`AdmissionError::Store`] if the connection cannot be
    /// established.
    pub async fn new(
        redis_url: &str,
        quota_source: Arc<dyn QuotaSource>,
    ) -> Result<Self, AdmissionError> {
        let client = Client::open(redis_url)
            .map_err(|e| AdmissionError::Store(format!("Failed to create Redis client: {e}")))?;

        let conn_manager = ConnectionManager::new(client).await.map_err(|e| {
            AdmissionError::Store(format!("Failed to create Redis connection manager: {e}"))
        })?;

        Ok(Self {
            conn_manager,
            quota_source,
            admit: Arc::new(Script::new(ADMIT_SCRIPT)),
            ttl: ADMISSION_TTL,
        })
    }

    /// Override the key TTL (default 31 days). Mainly for tests.
    #[must_use]
    pub const fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Key of the per-campaign ordered waiting structure.
    fn waiting_key(campaign_id: CampaignId) -> String {
        format!("coupon:waiting:{campaign_id}")
    }

    /// Key of the per-user issued marker.
    fn issued_key(campaign_id: CampaignId, user_id: UserId) -> String {
        format!("coupon:issued:{campaign_id}:{user_id}")
    }

    /// Key of the cached quota.
    fn quota_key(campaign_id: CampaignId) -> String {
        format!("coupon:quota:{campaign_id}")
    }

    /// Current timestamp in milliseconds, the sorted-set ordering score.
    #[allow(clippy::cast_possible_truncation)] // Safe: timestamps fit in u64 until year 2554
    fn current_timestamp_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_millis() as u64
    }

    /// Run the admit script once, without quota-miss recovery.
    async fn invoke_admit(
        &self,
        campaign_id: CampaignId,
        user_id: UserId,
    ) -> Result<(String, u64), AdmissionError> {
        let mut conn = self.conn_manager.clone();
        self.admit
            .key(Self::waiting_key(campaign_id))
            .key(Self::issued_key(campaign_id, user_id))
            .key(Self::quota_key(campaign_id))
            .arg(user_id.as_i64())
            .arg(Self::current_timestamp_ms())
            .arg(self.ttl.as_secs())
            .invoke_async(&mut conn)
            .await
            .map_err(|e| AdmissionError::Store(format!("Admit script failed: {e}")))
    }

    /// Load the quota from the authoritative source and cache it.
    async fn prime_quota(&self, campaign_id: CampaignId) -> Result<u32, AdmissionError> {
        let quota = self
            .quota_source
            .quota(campaign_id)
            .await
            .map_err(|source| AdmissionError::QuotaLoad {
                campaign_id,
                source,
            })?
            .ok_or(AdmissionError::CampaignNotFound(campaign_id))?;

        let mut conn = self.conn_manager.clone();
        let _: () = redis::cmd("SET")
            .arg(Self::quota_key(campaign_id))
            .arg(quota)
            .arg("EX")
            .arg(self.ttl.as_secs())
            .query_async(&mut conn)
            .await
            .map_err(|e| AdmissionError::Store(format!("Failed to cache quota: {e}")))?;

        tracing::info!(
            campaign_id = %campaign_id,
            quota = quota,
            "Campaign quota primed from relational store"
        );

        Ok(quota)
    }
}

impl AdmissionQueue for RedisAdmissionQueue {
    fn try_admit(
        &self,
        campaign_id: CampaignId,
        user_id: UserId,
    ) -> Pin<Box<dyn Future<Output = Result<AdmissionDecision, AdmissionError>> + Send + '_>> {
        Box::pin(async move {
            let mut reply = self.invoke_admit(campaign_id, user_id).await?;

            // First admission attempt for a campaign: establish the quota,
            // then run the script again. The second run is still atomic.
            if reply.0 == "noquota" {
                self.prime_quota(campaign_id).await?;
                reply = self.invoke_admit(campaign_id, user_id).await?;
            }

            let decision = match reply.0.as_str() {
                "ok" => AdmissionDecision::Admitted { rank: reply.1 },
                "dup" => AdmissionDecision::AlreadyAdmitted,
                "full" => AdmissionDecision::QuotaExhausted,
                other => {
                    return Err(AdmissionError::Store(format!(
                        "Unexpected admit script reply: {other}"
                    )));
                }
            };

            tracing::debug!(
                campaign_id = %campaign_id,
                user_id = %user_id,
                decision = ?decision,
                "Admission attempt"
            );

            Ok(decision)
        })
    }

    fn rank(
        &self,
        campaign_id: CampaignId,
        user_id: UserId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<u64>, AdmissionError>> + Send + '_>> {
        let mut conn = self.conn_manager.clone();
        Box::pin(async move {
            let rank: Option<u64> = conn
                .zrank(Self::waiting_key(campaign_id), user_id.as_i64())
                .await
                .map_err(|e| AdmissionError::Store(format!("Failed to read rank: {e}")))?;
            Ok(rank)
        })
    }

    fn issued_count(
        &self,
        campaign_id: CampaignId,
    ) -> Pin<Box<dyn Future<Output = Result<u64, AdmissionError>> + Send + '_>> {
        let mut conn = self.conn_manager.clone();
        Box::pin(async move {
            let count: u64 = conn
                .zcard(Self::waiting_key(campaign_id))
                .await
                .map_err(|e| AdmissionError::Store(format!("Failed to read issued count: {e}")))?;
            Ok(count)
        })
    }

    fn set_quota(
        &self,
        campaign_id: CampaignId,
        quota: u32,
    ) -> Pin<Box<dyn Future<Output = Result<(), AdmissionError>> + Send + '_>> {
        let mut conn = self.conn_manager.clone();
        let ttl = self.ttl.as_secs();
        Box::pin(async move {
            let _: () = redis::cmd("SET")
                .arg(Self::quota_key(campaign_id))
                .arg(quota)
                .arg("EX")
                .arg(ttl)
                .query_async(&mut conn)
                .await
                .map_err(|e| AdmissionError::Store(format!("Failed to set quota: {e}")))?;
            Ok(())
        })
    }

    fn quota(
        &self,
        campaign_id: CampaignId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<u32>, AdmissionError>> + Send + '_>> {
        let mut conn = self.conn_manager.clone();
        Box::pin(async move {
            let quota: Option<u32> = conn
                .get(Self::quota_key(campaign_id))
                .await
                .map_err(|e| AdmissionError::Store(format!("Failed to read quota: {e}")))?;
            Ok(quota)
        })
    }

    fn release(
        &self,
        campaign_id: CampaignId,
        user_id: UserId,
    ) -> Pin<Box<dyn Future<Output = Result<(), AdmissionError>> + Send + '_>> {
        let mut conn = self.conn_manager.clone();
        Box::pin(async move {
            // Entry and marker go together; a partial release would leave
            // the user permanently blocked.
            let _: ((), ()) = redis::pipe()
                .atomic()
                .zrem(Self::waiting_key(campaign_id), user_id.as_i64())
                .del(Self::issued_key(campaign_id, user_id))
                .query_async(&mut conn)
                .await
                .map_err(|e| {
                    AdmissionError::Store(format!("Failed to release admission entry: {e}"))
                })?;

            tracing::info!(
                campaign_id = %campaign_id,
                user_id = %user_id,
                "Released admission entry"
            );

            Ok(())
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use flashdrop_core::store::StoreError;
    use std::collections::HashMap;

    // Note: the live tests require a running Redis instance
    // Run with: docker run -d -p 6379:6379 redis:7-alpine

    struct FixedQuotas(HashMap<i64, u32>);

    impl QuotaSource for FixedQuotas {
        fn quota(
            &self,
            campaign_id: CampaignId,
        ) -> Pin<Box<dyn Future<Output = Result<Option<u32>, StoreError>> + Send + '_>> {
            let quota = self.0.get(&campaign_id.as_i64()).copied();
            Box::pin(async move { Ok(quota) })
        }
    }

    fn quotas(campaign: i64, quota: u32) -> Arc<dyn QuotaSource> {
        Arc::new(FixedQuotas(HashMap::from([(campaign, quota)])))
    }

    #[test]
    fn keys_are_namespaced_per_campaign_and_user() {
        let campaign = CampaignId::new(7);
        let user = UserId::new(42);
        assert_eq!(RedisAdmissionQueue::waiting_key(campaign), "coupon:waiting:7");
        assert_eq!(
            RedisAdmissionQueue::issued_key(campaign, user),
            "coupon:issued:7:42"
        );
        assert_eq!(RedisAdmissionQueue::quota_key(campaign), "coupon:quota:7");
    }

    #[test]
    fn timestamps_do_not_decrease() {
        let a = RedisAdmissionQueue::current_timestamp_ms();
        let b = RedisAdmissionQueue::current_timestamp_ms();
        assert!(b >= a);
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn admits_up_to_quota_then_rejects() {
        let campaign = CampaignId::new(9_100);
        let queue = RedisAdmissionQueue::new("redis://127.0.0.1:6379", quotas(9_100, 3))
            .await
            .unwrap();

        for user in 1..=3 {
            let decision = queue.try_admit(campaign, UserId::new(user)).await.unwrap();
            assert!(decision.is_admitted(), "user {user} should be admitted");
        }

        let decision = queue.try_admit(campaign, UserId::new(4)).await.unwrap();
        assert_eq!(decision, AdmissionDecision::QuotaExhausted);
        assert_eq!(queue.issued_count(campaign).await.unwrap(), 3);

        // Cleanup
        for user in 1..=4 {
            queue.release(campaign, UserId::new(user)).await.unwrap();
        }
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn second_attempt_is_rejected_as_duplicate() {
        let campaign = CampaignId::new(9_101);
        let user = UserId::new(1);
        let queue = RedisAdmissionQueue::new("redis://127.0.0.1:6379", quotas(9_101, 10))
            .await
            .unwrap();

        let first = queue.try_admit(campaign, user).await.unwrap();
        assert!(first.is_admitted());

        let second = queue.try_admit(campaign, user).await.unwrap();
        assert_eq!(second, AdmissionDecision::AlreadyAdmitted);
        assert_eq!(queue.issued_count(campaign).await.unwrap(), 1);

        queue.release(campaign, user).await.unwrap();
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn release_allows_readmission() {
        let campaign = CampaignId::new(9_102);
        let user = UserId::new(1);
        let queue = RedisAdmissionQueue::new("redis://127.0.0.1:6379", quotas(9_102, 10))
            .await
            .unwrap();

        assert!(queue.try_admit(campaign, user).await.unwrap().is_admitted());
        queue.release(campaign, user).await.unwrap();
        assert!(queue.rank(campaign, user).await.unwrap().is_none());
        assert!(queue.try_admit(campaign, user).await.unwrap().is_admitted());

        queue.release(campaign, user).await.unwrap();
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn unknown_campaign_is_rejected() {
        let queue = RedisAdmissionQueue::new(
            "redis://127.0.0.1:6379",
            Arc::new(FixedQuotas(HashMap::new())),
        )
        .await
        .unwrap();

        let result = queue.try_admit(CampaignId::new(9_103), UserId::new(1)).await;
        assert!(matches!(result, Err(AdmissionError::CampaignNotFound(_))));
    }
}
