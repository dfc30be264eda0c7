//! Campaign and grant storage with the authoritative issuance transaction.

use crate::{classify_sqlx, is_unique_violation};
use flashdrop_core::admission::QuotaSource;
use flashdrop_core::outbox::{COUPON_ISSUED, CouponIssued};
use flashdrop_core::store::{CampaignStore, IssuedGrant, StoreError};
use flashdrop_core::types::{Campaign, CampaignId, Discount, GrantId, UserId};
use sqlx::{PgPool, Row};
use std::future::Future;
use std::pin::Pin;

/// PostgreSQL-backed campaign store.
///
/// # Example
///
/// ```no_run
/// use flashdrop_postgres::PgCampaignStore;
/// use flashdrop_core::store::CampaignStore;
/// use flashdrop_core::types::{CampaignId, UserId};
///
/// # async fn example(pool: sqlx::PgPool) -> Result<(), Box<dyn std::error::Error>> {
/// let store = PgCampaignStore::new(pool);
/// let issued = store.issue_grant(UserId::new(42), CampaignId::new(1)).await?;
/// println!("grant {} issued, {} left", issued.grant_id, issued.remaining_stock);
/// # Ok(())
/// # }
/// ```
pub struct PgCampaignStore {
    pool: PgPool,
}

impl PgCampaignStore {
    /// Create a store over the given connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_campaign(row: &sqlx::postgres::PgRow) -> Result<Campaign, StoreError> {
        let kind: String = row.get("discount_kind");
        let value: i64 = row.get("discount_value");
        let discount = match kind.as_str() {
            "amount" => Discount::Amount(value),
            "percent" => {
                let percent = u8::try_from(value)
                    .map_err(|_| StoreError::Database(format!("percent out of range: {value}")))?;
                Discount::Percent(percent)
            }
            other => {
                return Err(StoreError::Database(format!("unknown discount kind: {other}")));
            }
        };

        Ok(Campaign {
            id: CampaignId::new(row.get("id")),
            discount,
            stock: row.get("stock"),
            valid_from: row.get("valid_from"),
            valid_until: row.get("valid_until"),
        })
    }
}

impl CampaignStore for PgCampaignStore {
    fn fetch(
        &self,
        campaign_id: CampaignId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Campaign>, StoreError>> + Send + '_>> {
        Box::pin(async move {
            let row = sqlx::query(
                r"
                SELECT id, discount_kind, discount_value, stock, valid_from, valid_until
                FROM campaigns
                WHERE id = $1
                ",
            )
            .bind(campaign_id.as_i64())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| classify_sqlx(&e))?;

            row.as_ref().map(Self::row_to_campaign).transpose()
        })
    }

    fn issue_grant(
        &self,
        user_id: UserId,
        campaign_id: CampaignId,
    ) -> Pin<Box<dyn Future<Output = Result<IssuedGrant, StoreError>> + Send + '_>> {
        Box::pin(async move {
            let mut tx = self.pool.begin().await.map_err(|e| classify_sqlx(&e))?;

            // Check order: campaign missing, then duplicate grant, then
            // stock. The campaign row also supplies the grant expiry.
            let campaign = sqlx::query("SELECT valid_until FROM campaigns WHERE id = $1")
                .bind(campaign_id.as_i64())
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| classify_sqlx(&e))?;
            let Some(campaign) = campaign else {
                return Err(StoreError::CampaignNotFound(campaign_id));
            };
            let expires_at: chrono::DateTime<chrono::Utc> = campaign.get("valid_until");

            // The unique index still guards the concurrent race on insert.
            let existing = sqlx::query("SELECT 1 FROM grants WHERE user_id = $1 AND campaign_id = $2")
                .bind(user_id.as_i64())
                .bind(campaign_id.as_i64())
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| classify_sqlx(&e))?;
            if existing.is_some() {
                return Err(StoreError::AlreadyIssued {
                    user_id,
                    campaign_id,
                });
            }

            // Conditional decrement: the predicate rejects a decrement below
            // zero instead of clamping. Row-level locking serializes
            // concurrent decrements of the same campaign.
            let decremented = sqlx::query(
                r"
                UPDATE campaigns
                SET stock = stock - 1
                WHERE id = $1 AND stock > 0
                RETURNING stock
                ",
            )
            .bind(campaign_id.as_i64())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| classify_sqlx(&e))?;

            // The campaign exists, so a missing row means the stock is gone.
            let Some(row) = decremented else {
                return Err(StoreError::OutOfStock(campaign_id));
            };

            let remaining_stock: i64 = row.get("stock");
            let grant_id = GrantId::new();

            sqlx::query(
                r"
                INSERT INTO grants (id, user_id, campaign_id, used, expires_at)
                VALUES ($1, $2, $3, FALSE, $4)
                ",
            )
            .bind(grant_id.as_uuid())
            .bind(user_id.as_i64())
            .bind(campaign_id.as_i64())
            .bind(expires_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    StoreError::AlreadyIssued {
                        user_id,
                        campaign_id,
                    }
                } else {
                    classify_sqlx(&e)
                }
            })?;

            // Outbox row rides the same transaction: the coupon-issued event
            // becomes durable exactly when the grant does.
            let payload = CouponIssued {
                grant_id,
                user_id,
                campaign_id,
                remaining_stock,
            }
            .to_bytes()
            .map_err(|e| StoreError::Database(e.to_string()))?;

            sqlx::query(
                r"
                INSERT INTO outbox_events (event_type, payload, status, retry_count)
                VALUES ($1, $2, 'PENDING', 0)
                ",
            )
            .bind(COUPON_ISSUED)
            .bind(&payload)
            .execute(&mut *tx)
            .await
            .map_err(|e| classify_sqlx(&e))?;

            tx.commit().await.map_err(|e| classify_sqlx(&e))?;

            tracing::info!(
                grant_id = %grant_id,
                user_id = %user_id,
                campaign_id = %campaign_id,
                remaining_stock = remaining_stock,
                "Coupon issued"
            );
            metrics::counter!("issuance_grants_total").increment(1);

            Ok(IssuedGrant {
                grant_id,
                remaining_stock,
            })
        })
    }
}

impl QuotaSource for PgCampaignStore {
    fn quota(
        &self,
        campaign_id: CampaignId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<u32>, StoreError>> + Send + '_>> {
        Box::pin(async move {
            let row: Option<(i64,)> = sqlx::query_as("SELECT stock FROM campaigns WHERE id = $1")
                .bind(campaign_id.as_i64())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| classify_sqlx(&e))?;

            // stock is constrained non-negative; saturate rather than fail
            // on a value past u32.
            Ok(row.map(|(stock,)| u32::try_from(stock).unwrap_or(u32::MAX)))
        })
    }
}
