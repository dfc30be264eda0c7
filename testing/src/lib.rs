//! In-memory doubles for the flashdrop pipeline seams.
//!
//! Every trait in `flashdrop-core` has a deterministic in-memory
//! implementation here, so pipeline behavior - quota bounds, uniqueness,
//! retry budgets, backoff routing - can be exercised without Redis, Kafka,
//! or Postgres:
//!
//! - [`InMemoryAdmissionQueue`] - mutex-serialized admission with real
//!   quota/duplicate semantics
//! - [`InMemoryCampaignStore`] - stock, grants, uniqueness, and injectable
//!   store failures
//! - [`InMemoryIssueChannel`] / [`CapturingResultPublisher`] - request
//!   queue with redelivery-on-`Retry`, and a result recorder
//! - [`InMemoryOutboxStore`] / [`FlakyExecutor`] - outbox rows and an
//!   effect that fails a configurable number of times
//! - [`InMemoryDlqChannel`] / [`FlakyDelivery`] / [`CollectingFailureSink`]
//!   - the dead-letter loop
//! - [`FixedClock`] - deterministic timestamps

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod admission;
pub mod channel;
pub mod clock;
pub mod dlq;
pub mod outbox;
pub mod store;

pub use admission::InMemoryAdmissionQueue;
pub use channel::{CapturingResultPublisher, FailingRequestChannel, InMemoryIssueChannel};
pub use clock::FixedClock;
pub use dlq::{CollectingFailureSink, FlakyDelivery, InMemoryDlqChannel};
pub use outbox::{FlakyExecutor, InMemoryOutboxStore};
pub use store::InMemoryCampaignStore;
