//! Domain identifiers and entities for coupon campaigns and grants.
//!
//! Campaigns and users carry relational `i64` ids (they are rows owned by
//! the wider commerce schema); grants and requests are identified by UUIDs
//! minted inside this pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a coupon campaign.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CampaignId(i64);

impl CampaignId {
    /// Wrap a raw database id.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the raw database id.
    #[must_use]
    pub const fn as_i64(self) -> i64 {
        self.0
    }
}

impl fmt::Display for CampaignId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a user.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(i64);

impl UserId {
    /// Wrap a raw database id.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the raw database id.
    #[must_use]
    pub const fn as_i64(self) -> i64 {
        self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for an issued grant (user coupon).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GrantId(Uuid);

impl GrantId {
    /// Create a new random `GrantId`.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a `GrantId` from an existing `Uuid`.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for GrantId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for GrantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The discount a campaign's coupons carry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Discount {
    /// A fixed amount off, in minor currency units.
    Amount(i64),
    /// A percentage off, 0..=100.
    Percent(u8),
}

/// A coupon promotion with a fixed stock and validity window.
///
/// The `stock` counter lives in the relational store and is mutated only by
/// the issuance worker, under a transaction that makes check-decrement-grant
/// atomic.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Campaign {
    /// Campaign id.
    pub id: CampaignId,
    /// What the coupon is worth.
    pub discount: Discount,
    /// Remaining issuable stock. Never driven below zero.
    pub stock: i64,
    /// Start of the validity window.
    pub valid_from: DateTime<Utc>,
    /// End of the validity window; issued grants expire at this instant.
    pub valid_until: DateTime<Utc>,
}

/// The record of a coupon successfully issued to a specific user.
///
/// At most one grant exists per `(user_id, campaign_id)` pair; the database
/// unique index is the authority on that invariant.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    /// Grant id.
    pub id: GrantId,
    /// Owner of the coupon.
    pub user_id: UserId,
    /// Campaign the coupon was issued from.
    pub campaign_id: CampaignId,
    /// Whether the coupon has been redeemed.
    pub used: bool,
    /// When the coupon expires.
    pub expires_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn campaign_id_roundtrip() {
        let id = CampaignId::new(42);
        assert_eq!(id.as_i64(), 42);
        assert_eq!(id.to_string(), "42");
    }

    #[test]
    fn grant_ids_are_unique() {
        assert_ne!(GrantId::new(), GrantId::new());
    }

    #[test]
    fn grant_id_uuid_roundtrip() {
        let uuid = Uuid::new_v4();
        let id = GrantId::from_uuid(uuid);
        assert_eq!(*id.as_uuid(), uuid);
    }
}
