//! PostgreSQL storage for the flashdrop pipeline.
//!
//! Three concerns, one pool:
//!
//! - [`PgCampaignStore`] - campaigns and grants, the single source of truth
//!   for stock. The authoritative decrement, the grant insert, and the
//!   outbox row are one transaction.
//! - [`PgOutboxStore`] - the events-to-publish table drained by the relay.
//! - [`PgFailureSink`] - the terminal table for dead-letter envelopes that
//!   exhausted their retry budget.
//!
//! Schema lives in `migrations/`; run with `sqlx::migrate!` at service
//! startup.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod campaign_store;
mod failure_sink;
mod outbox_store;

pub use campaign_store::PgCampaignStore;
pub use failure_sink::{PgFailureSink, TerminalFailure};
pub use outbox_store::PgOutboxStore;

use flashdrop_core::store::StoreError;

/// Map a sqlx error onto the pipeline's retryable / non-retryable split.
///
/// Serialization failures (40001) and deadlocks (40P01) are the optimistic
/// concurrency conflicts of the issuance path; pool and IO failures are
/// transient connectivity. Everything else is an unclassified database
/// error and resolves to a terminal internal failure.
pub(crate) fn classify_sqlx(e: &sqlx::Error) -> StoreError {
    match e {
        sqlx::Error::Database(db) => match db.code().as_deref() {
            Some("40001" | "40P01") => StoreError::Conflict(db.to_string()),
            _ => StoreError::Database(db.to_string()),
        },
        sqlx::Error::Io(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => StoreError::Connection(e.to_string()),
        _ => StoreError::Database(e.to_string()),
    }
}

/// Whether a database error is a unique-constraint violation (duplicate
/// grant).
pub(crate) fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(
        e,
        sqlx::Error::Database(db) if db.code().as_deref() == Some("23505")
    )
}
