//! Issuance request and result messages.
//!
//! These are the transient, channel-carried messages of the pipeline. An
//! [`IssueRequest`] is immutable once created; exactly one [`IssueResult`]
//! is produced per accepted request, carrying one of a small fixed set of
//! outcomes. Infrastructure-level errors never appear here - they are
//! classified at the point of occurrence and drive acknowledgment behavior
//! instead (see [`crate::channel::Disposition`]).

use crate::types::{CampaignId, GrantId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Errors from encoding or decoding channel messages.
#[derive(Error, Debug)]
pub enum CodecError {
    /// Failed to serialize a message to bytes.
    #[error("Failed to encode message: {0}")]
    Encode(String),

    /// Failed to deserialize a message from bytes.
    #[error("Failed to decode message: {0}")]
    Decode(String),
}

/// A request to issue one coupon from a campaign to a user.
///
/// `request_id` is unique per submission and is used for idempotency and
/// correlation with the eventual [`IssueResult`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueRequest {
    /// Correlation id, unique per submission.
    pub request_id: Uuid,
    /// The user requesting a coupon.
    pub user_id: UserId,
    /// The campaign to issue from.
    pub campaign_id: CampaignId,
    /// When the request was admitted.
    pub submitted_at: DateTime<Utc>,
}

impl IssueRequest {
    /// Encode the request to bincode bytes for the wire.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Encode`] if serialization fails (rare with
    /// bincode).
    pub fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        bincode::serialize(self).map_err(|e| CodecError::Encode(e.to_string()))
    }

    /// Decode a request from bincode bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Decode`] if the bytes are not a valid request.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        bincode::deserialize(bytes).map_err(|e| CodecError::Decode(e.to_string()))
    }
}

/// The reason an issuance attempt was rejected.
///
/// This is the complete set of caller-visible failure reasons; the caller
/// never sees infrastructure-level errors directly.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectReason {
    /// The campaign does not exist.
    CampaignNotFound,
    /// A grant for this (user, campaign) pair already exists.
    AlreadyIssued,
    /// The campaign's remaining stock is zero.
    OutOfStock,
    /// An unclassified processing error; permanently resolved as failure.
    Internal,
}

impl RejectReason {
    /// Human-readable message for the caller-facing layer.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::CampaignNotFound => "coupon not found",
            Self::AlreadyIssued => "already issued",
            Self::OutOfStock => "out of stock",
            Self::Internal => "internal error",
        }
    }
}

/// Terminal outcome of one issuance request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum IssueOutcome {
    /// A coupon was granted.
    Granted {
        /// Id of the persisted grant row.
        grant_id: GrantId,
        /// Campaign stock remaining after the decrement.
        remaining_stock: i64,
    },
    /// The request was rejected for one of the fixed reasons.
    Rejected {
        /// Why the request was rejected.
        reason: RejectReason,
    },
}

/// The outcome of an issuance request, produced exactly once per accepted
/// request and published keyed by campaign id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueResult {
    /// Correlation id of the originating request.
    pub request_id: Uuid,
    /// The requesting user.
    pub user_id: UserId,
    /// The campaign issued from.
    pub campaign_id: CampaignId,
    /// Success or one of the fixed rejection reasons.
    pub outcome: IssueOutcome,
    /// When the worker resolved the request.
    pub processed_at: DateTime<Utc>,
}

impl IssueResult {
    /// Whether the request resulted in a grant.
    #[must_use]
    pub const fn is_granted(&self) -> bool {
        matches!(self.outcome, IssueOutcome::Granted { .. })
    }

    /// Encode the result to bincode bytes for the wire.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Encode`] if serialization fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        bincode::serialize(self).map_err(|e| CodecError::Encode(e.to_string()))
    }

    /// Decode a result from bincode bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Decode`] if the bytes are not a valid result.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        bincode::deserialize(bytes).map_err(|e| CodecError::Decode(e.to_string()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;

    fn request() -> IssueRequest {
        IssueRequest {
            request_id: Uuid::new_v4(),
            user_id: UserId::new(7),
            campaign_id: CampaignId::new(3),
            submitted_at: Utc::now(),
        }
    }

    #[test]
    fn request_bincode_roundtrip() {
        let req = request();
        let bytes = req.to_bytes().expect("encode");
        let decoded = IssueRequest::from_bytes(&bytes).expect("decode");
        assert_eq!(req, decoded);
    }

    #[test]
    fn result_bincode_roundtrip() {
        let result = IssueResult {
            request_id: Uuid::new_v4(),
            user_id: UserId::new(1),
            campaign_id: CampaignId::new(2),
            outcome: IssueOutcome::Granted {
                grant_id: GrantId::new(),
                remaining_stock: 99,
            },
            processed_at: Utc::now(),
        };
        let decoded = IssueResult::from_bytes(&result.to_bytes().expect("encode")).expect("decode");
        assert!(decoded.is_granted());
        assert_eq!(result, decoded);
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(IssueRequest::from_bytes(&[0xff, 0x01]).is_err());
    }

    #[test]
    fn reject_reason_messages_are_stable() {
        assert_eq!(RejectReason::CampaignNotFound.message(), "coupon not found");
        assert_eq!(RejectReason::AlreadyIssued.message(), "already issued");
        assert_eq!(RejectReason::OutOfStock.message(), "out of stock");
        assert_eq!(RejectReason::Internal.message(), "internal error");
    }

    proptest::proptest! {
        #[test]
        fn any_request_survives_the_wire(user in i64::MIN..i64::MAX, campaign in i64::MIN..i64::MAX) {
            let req = IssueRequest {
                request_id: Uuid::new_v4(),
                user_id: UserId::new(user),
                campaign_id: CampaignId::new(campaign),
                submitted_at: Utc::now(),
            };
            let decoded = IssueRequest::from_bytes(&req.to_bytes().unwrap()).unwrap();
            proptest::prop_assert_eq!(req, decoded);
        }
    }
}
