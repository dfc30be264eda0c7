//! Outbox relay tests: sweep behavior, the fixed retry budget, and the
//! never-PROCESSED-unless-executed invariant.

#![allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect

use flashdrop_core::outbox::{MAX_OUTBOX_RETRIES, OutboxStatus};
use flashdrop_runtime::{OutboxRelay, RelayConfig};
use flashdrop_testing::{FlakyExecutor, InMemoryOutboxStore};
use std::sync::Arc;

fn relay(
    store: &Arc<InMemoryOutboxStore>,
    executor: &Arc<FlakyExecutor>,
) -> OutboxRelay {
    OutboxRelay::new(store.clone(), executor.clone(), RelayConfig::default())
}

/// A healthy event is executed once and retired.
#[tokio::test]
async fn pending_event_is_processed_and_retired() {
    let store = Arc::new(InMemoryOutboxStore::new());
    let executor = Arc::new(FlakyExecutor::failing(0));
    let id = store.enqueue("coupon.issued", vec![1, 2, 3]);

    let processed = relay(&store, &executor).sweep_pending().await;

    assert_eq!(processed, 1);
    assert_eq!(executor.executions(), 1);
    assert_eq!(store.row(id).unwrap().status, OutboxStatus::Processed);
}

/// A transient failure is recovered by the retry sweep within the budget.
#[tokio::test]
async fn failed_event_recovers_on_retry_sweep() {
    let store = Arc::new(InMemoryOutboxStore::new());
    let executor = Arc::new(FlakyExecutor::failing(1));
    let id = store.enqueue("coupon.issued", vec![]);
    let relay = relay(&store, &executor);

    assert_eq!(relay.sweep_pending().await, 0);
    let row = store.row(id).unwrap();
    assert_eq!(row.status, OutboxStatus::Failed);
    assert_eq!(row.retry_count, 1);

    assert_eq!(relay.sweep_retry().await, 1);
    assert_eq!(store.row(id).unwrap().status, OutboxStatus::Processed);
}

/// Retry boundedness: an event whose effect keeps failing ends FAILED with
/// retry count 3 after the third failure, and later sweeps never select it
/// again.
#[tokio::test]
async fn exhausted_event_is_never_selected_again() {
    let store = Arc::new(InMemoryOutboxStore::new());
    // Would fail four times if asked; the budget must stop it at three.
    let executor = Arc::new(FlakyExecutor::failing(4));
    let id = store.enqueue("coupon.issued", vec![]);
    let relay = relay(&store, &executor);

    relay.sweep_pending().await; // failure 1
    relay.sweep_retry().await; // failure 2
    relay.sweep_retry().await; // failure 3 -> retry_count = 3, terminal

    let row = store.row(id).unwrap();
    assert_eq!(row.status, OutboxStatus::Failed);
    assert_eq!(row.retry_count, MAX_OUTBOX_RETRIES);
    assert!(row.is_exhausted());

    // The fourth sweep selects nothing; the effect is not attempted again.
    assert_eq!(relay.sweep_retry().await, 0);
    assert_eq!(relay.sweep_pending().await, 0);
    assert_eq!(executor.executions(), 3);
}

/// The pending sweep handles batches oldest-first and reports only
/// successful executions.
#[tokio::test]
async fn mixed_batch_counts_only_successes() {
    let store = Arc::new(InMemoryOutboxStore::new());
    // First execution fails, the remaining two succeed.
    let executor = Arc::new(FlakyExecutor::failing(1));
    let first = store.enqueue("coupon.issued", vec![1]);
    let second = store.enqueue("coupon.issued", vec![2]);
    let third = store.enqueue("coupon.issued", vec![3]);

    let processed = relay(&store, &executor).sweep_pending().await;

    assert_eq!(processed, 2);
    assert_eq!(store.row(first).unwrap().status, OutboxStatus::Failed);
    assert_eq!(store.row(second).unwrap().status, OutboxStatus::Processed);
    assert_eq!(store.row(third).unwrap().status, OutboxStatus::Processed);
}
