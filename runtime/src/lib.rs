//! Runtime components of the flashdrop pipeline: the submission gate, the
//! issuance worker, the outbox relay, and the dead-letter retry pipeline.
//!
//! # Control flow
//!
//! ```text
//! caller ──► IssuanceGate ──► request channel ──► IssuanceWorker
//!            (admission)      (per-campaign       │ one transaction:
//!                              ordering)          │ decrement + grant
//!                                                 │ + outbox row
//!                                                 ▼
//!                                           result channel ──► caller-facing
//!
//! outbox table ──► OutboxRelay ──► downstream effect
//!                  (sweeps, retry budget 3)
//!
//! external delivery ──fail──► DlqEnvelope ──► DlqConsumer
//!                             (backoff 1s/2s/4s, budget 3) ──► failure sink
//! ```
//!
//! Everything here is wiring over the trait seams in `flashdrop-core`; the
//! Redis/Kafka/Postgres implementations live in their own crates and the
//! in-memory doubles in `flashdrop-testing`.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod backoff;
pub mod dlq;
pub mod gate;
pub mod metrics;
pub mod relay;
pub mod worker;

pub use backoff::BackoffPolicy;
pub use dlq::{DlqConsumer, ReliableDelivery};
pub use gate::{GateError, IssuanceGate, SubmitOutcome};
pub use relay::{OutboxRelay, RelayConfig};
pub use worker::IssuanceWorker;
