//! flashdrop service wiring.
//!
//! [`ResourceManager`] centralizes infrastructure setup (Postgres, Redis,
//! Redpanda, the external data platform) and hands out the two surfaces of
//! the pipeline:
//!
//! - [`ResourceManager::issuance_gate`] - the submission seam the (external)
//!   transport layer calls: admission, rank/issued-count polling, and the
//!   channel submit;
//! - [`ResourceManager::spawn_pipeline`] - the background tasks the daemon
//!   binary runs: issuance worker, outbox relay, dead-letter pipeline.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod platform;
pub mod resources;

pub use config::Config;
pub use resources::ResourceManager;
