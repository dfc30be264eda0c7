//! Dead-letter pipeline tests: routing on failure, bounded backoff retries,
//! and terminal sink routing once the budget is spent.

#![allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect

use chrono::Utc;
use flashdrop_core::outbox::DomainEvent;
use flashdrop_runtime::{BackoffPolicy, DlqConsumer, ReliableDelivery};
use flashdrop_testing::{CollectingFailureSink, FixedClock, FlakyDelivery, InMemoryDlqChannel};
use std::sync::Arc;
use std::time::Duration;

fn event() -> DomainEvent {
    DomainEvent {
        event_type: "order.completed".to_string(),
        payload: vec![0xDE, 0xAD],
        occurred_at: Utc::now(),
    }
}

/// Millisecond-scale backoff so tests run fast; same shape as the
/// production 1s/2s/4s schedule.
fn fast_backoff() -> BackoffPolicy {
    BackoffPolicy {
        max_retries: 3,
        initial_delay: Duration::from_millis(5),
        multiplier: 2.0,
        max_delay: Duration::from_millis(100),
    }
}

struct DlqFixture {
    channel: Arc<InMemoryDlqChannel>,
    delivery: Arc<FlakyDelivery>,
    sink: Arc<CollectingFailureSink>,
    reliable: ReliableDelivery,
    consumer: DlqConsumer,
}

fn fixture(failures: u32) -> DlqFixture {
    let channel = Arc::new(InMemoryDlqChannel::new());
    let delivery = Arc::new(FlakyDelivery::failing(failures));
    let sink = Arc::new(CollectingFailureSink::new());
    let clock = Arc::new(FixedClock::new(Utc::now()));

    let reliable = ReliableDelivery::new(delivery.clone(), channel.clone(), clock.clone());
    let consumer = DlqConsumer::new(channel.clone(), delivery.clone(), sink.clone(), clock)
        .with_backoff(fast_backoff());

    DlqFixture {
        channel,
        delivery,
        sink,
        reliable,
        consumer,
    }
}

/// Drain queued envelopes through the consumer until the channel is quiet.
async fn drain(fixture: &DlqFixture) {
    loop {
        let envelopes = fixture.channel.drain_queued();
        if envelopes.is_empty() {
            break;
        }
        for envelope in envelopes {
            fixture.consumer.process(envelope).await;
        }
    }
}

/// A healthy delivery never touches the dead-letter channel.
#[tokio::test]
async fn successful_delivery_skips_the_dlq() {
    let f = fixture(0);

    f.reliable.send(event()).await.unwrap();

    assert_eq!(f.delivery.attempts(), 1);
    assert!(f.channel.drain_queued().is_empty());
    assert!(f.sink.records().is_empty());
}

/// A transient failure is recovered by a resubmission within the budget.
#[tokio::test]
async fn transient_failure_recovers_within_budget() {
    let f = fixture(2); // initial send + first retry fail, second retry succeeds

    f.reliable.send(event()).await.unwrap();
    drain(&f).await;

    assert_eq!(f.delivery.attempts(), 3);
    assert_eq!(f.delivery.delivered().len(), 1);
    assert!(f.sink.records().is_empty());
}

/// Three failed resubmissions route the envelope to the terminal sink; no
/// fourth retry is attempted.
#[tokio::test]
async fn exhausted_envelope_is_routed_to_the_terminal_sink() {
    let f = fixture(u32::MAX); // never delivers

    f.reliable.send(event()).await.unwrap();
    drain(&f).await;

    // Initial attempt plus exactly three resubmissions.
    assert_eq!(f.delivery.attempts(), 4);

    let records = f.sink.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].retry_count, 3);
    assert_eq!(records[0].event.event_type, "order.completed");
    assert!(f.delivery.delivered().is_empty());
}

/// Retry counts climb one per resubmission: 0, 1, 2 ride the channel, 3
/// goes to the sink.
#[tokio::test]
async fn retry_counts_increment_per_resubmission() {
    let f = fixture(u32::MAX);

    f.reliable.send(event()).await.unwrap();

    let mut seen = Vec::new();
    loop {
        let envelopes = f.channel.drain_queued();
        if envelopes.is_empty() {
            break;
        }
        for envelope in envelopes {
            seen.push(envelope.retry_count);
            f.consumer.process(envelope).await;
        }
    }

    assert_eq!(seen, vec![0, 1, 2, 3]);
}

/// The spawned consumer drains the channel in the background and stops on
/// shutdown.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn spawned_consumer_processes_and_shuts_down() {
    let channel = Arc::new(InMemoryDlqChannel::new());
    let delivery = Arc::new(FlakyDelivery::failing(1));
    let sink = Arc::new(CollectingFailureSink::new());
    let clock = Arc::new(FixedClock::new(Utc::now()));

    let reliable = ReliableDelivery::new(delivery.clone(), channel.clone(), clock.clone());
    let consumer = DlqConsumer::new(channel.clone(), delivery.clone(), sink.clone(), clock)
        .with_backoff(fast_backoff());

    let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(1);
    let handle = consumer.spawn(shutdown_rx);

    // Initial send fails and routes to the channel; the background consumer
    // retries and succeeds.
    reliable.send(event()).await.unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while delivery.delivered().is_empty() && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(delivery.delivered().len(), 1);
    assert!(sink.records().is_empty());

    shutdown_tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("consumer should stop on shutdown")
        .unwrap();
}
