//! Core traits and types for the flashdrop coupon issuance pipeline.
//!
//! This crate defines the domain model (campaigns, grants, issuance
//! requests and results) and the trait seams between the pipeline's
//! components:
//!
//! - [`admission::AdmissionQueue`] - the fast pre-check that reserves a rank
//!   in a campaign's quota before authoritative issuance
//! - [`channel`] - the ordered, partitioned request/result channels and the
//!   handler contract for consuming them
//! - [`store::CampaignStore`] - the relational source of truth for stock and
//!   grants
//! - [`outbox`] - durable events-to-publish written in the same transaction
//!   as the business change they describe
//! - [`dlq`] - dead-letter envelopes for cross-system delivery failures
//!
//! Infrastructure crates (`flashdrop-admission`, `flashdrop-redpanda`,
//! `flashdrop-postgres`) implement these traits against Redis, Kafka-compatible
//! brokers, and PostgreSQL respectively; `flashdrop-testing` provides
//! in-memory doubles for the same seams.
//!
//! # Serialization
//!
//! Channel payloads are encoded with `bincode`: compact, fast, and every
//! service speaking them is Rust. Payloads are not human-readable on the
//! wire, which is an accepted trade-off.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod admission;
pub mod channel;
pub mod clock;
pub mod dlq;
pub mod issue;
pub mod outbox;
pub mod store;
pub mod types;
