//! Relational campaign and grant store: the single source of truth for
//! stock.
//!
//! Only the issuance worker calls [`CampaignStore::issue_grant`]; the
//! decrement, the grant insert, and the outbox row are one transaction, so
//! a campaign's stock can never disagree with its grant count.

use crate::types::{Campaign, CampaignId, GrantId, UserId};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors from the relational store, split along the retryable /
/// non-retryable line the worker's acknowledgment policy depends on.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The campaign does not exist. Terminal.
    #[error("Campaign {0} not found")]
    CampaignNotFound(CampaignId),

    /// A grant for this (user, campaign) already exists. Terminal.
    #[error("User {user_id} already holds a grant for campaign {campaign_id}")]
    AlreadyIssued {
        /// The user holding the existing grant.
        user_id: UserId,
        /// The campaign already issued from.
        campaign_id: CampaignId,
    },

    /// Remaining stock is zero. Terminal.
    #[error("Campaign {0} is out of stock")]
    OutOfStock(CampaignId),

    /// Optimistic-lock or serialization conflict during the decrement.
    /// Retryable: the request is redelivered, no failure result produced.
    #[error("Concurrent update conflict: {0}")]
    Conflict(String),

    /// Transient connectivity failure. Retryable.
    #[error("Store connection error: {0}")]
    Connection(String),

    /// Any other database error. Non-retryable; resolves to an internal
    /// failure result.
    #[error("Database error: {0}")]
    Database(String),
}

impl StoreError {
    /// Whether the worker should redeliver the request instead of producing
    /// a failure result.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict(_) | Self::Connection(_))
    }
}

/// A successful issuance: the new grant and the stock left behind.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IssuedGrant {
    /// Id of the newly persisted grant row.
    pub grant_id: GrantId,
    /// Stock remaining after the decrement.
    pub remaining_stock: i64,
}

/// The relational campaign store.
///
/// # Dyn Compatibility
///
/// Explicit `Pin<Box<dyn Future>>` returns so the worker can hold
/// `Arc<dyn CampaignStore>`.
pub trait CampaignStore: Send + Sync {
    /// Fetch a campaign, `None` if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on database failure.
    fn fetch(
        &self,
        campaign_id: CampaignId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Campaign>, StoreError>> + Send + '_>>;

    /// Authoritatively issue one coupon: check stock, decrement by one,
    /// persist the grant, and record the outbox event - all in one
    /// transaction. Concurrent attempts to decrement below zero are
    /// rejected, not clamped.
    ///
    /// # Errors
    ///
    /// - [`StoreError::CampaignNotFound`] - terminal
    /// - [`StoreError::AlreadyIssued`] - terminal, uniqueness enforced by
    ///   the `(user_id, campaign_id)` unique index
    /// - [`StoreError::OutOfStock`] - terminal
    /// - [`StoreError::Conflict`] / [`StoreError::Connection`] - retryable
    /// - [`StoreError::Database`] - non-retryable internal failure
    fn issue_grant(
        &self,
        user_id: UserId,
        campaign_id: CampaignId,
    ) -> Pin<Box<dyn Future<Output = Result<IssuedGrant, StoreError>> + Send + '_>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(StoreError::Conflict("version mismatch".into()).is_retryable());
        assert!(StoreError::Connection("pool timeout".into()).is_retryable());
        assert!(!StoreError::CampaignNotFound(CampaignId::new(1)).is_retryable());
        assert!(
            !StoreError::AlreadyIssued {
                user_id: UserId::new(1),
                campaign_id: CampaignId::new(1),
            }
            .is_retryable()
        );
        assert!(!StoreError::OutOfStock(CampaignId::new(1)).is_retryable());
        assert!(!StoreError::Database("syntax error".into()).is_retryable());
    }
}
