//! End-to-end pipeline tests over the in-memory doubles: admission gate,
//! request channel, issuance worker, and result publisher.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect

use chrono::{Duration as ChronoDuration, Utc};
use flashdrop_core::admission::AdmissionQueue;
use flashdrop_core::channel::RequestChannel;
use flashdrop_core::clock::SystemClock;
use flashdrop_core::issue::{IssueOutcome, IssueRequest, RejectReason};
use flashdrop_core::store::StoreError;
use flashdrop_core::types::{Campaign, CampaignId, Discount, UserId};
use flashdrop_runtime::{GateError, IssuanceGate, IssuanceWorker, SubmitOutcome};
use flashdrop_testing::{
    CapturingResultPublisher, FailingRequestChannel, InMemoryAdmissionQueue,
    InMemoryCampaignStore, InMemoryIssueChannel,
};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

fn campaign(id: i64, stock: i64) -> Campaign {
    Campaign {
        id: CampaignId::new(id),
        discount: Discount::Percent(10),
        stock,
        valid_from: Utc::now(),
        valid_until: Utc::now() + ChronoDuration::days(31),
    }
}

struct Pipeline {
    store: Arc<InMemoryCampaignStore>,
    channel: Arc<InMemoryIssueChannel>,
    results: Arc<CapturingResultPublisher>,
    gate: IssuanceGate,
    worker: IssuanceWorker,
}

fn pipeline(campaigns: Vec<Campaign>) -> Pipeline {
    let store = Arc::new(InMemoryCampaignStore::new());
    for c in campaigns {
        store.insert_campaign(c);
    }

    let admission = Arc::new(InMemoryAdmissionQueue::new(store.clone()));
    let channel = Arc::new(InMemoryIssueChannel::new());
    let results = Arc::new(CapturingResultPublisher::new());
    let clock = Arc::new(SystemClock);

    let gate = IssuanceGate::new(admission, channel.clone(), clock.clone());
    let worker = IssuanceWorker::new(store.clone(), results.clone(), clock);

    Pipeline {
        store,
        channel,
        results,
        gate,
        worker,
    }
}

/// Quota invariant under concurrency: 200 distinct users racing for 100
/// coupons end with exactly 100 grants and zero remaining stock.
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn two_hundred_users_race_for_one_hundred_coupons() {
    let p = Arc::new(pipeline(vec![campaign(1, 100)]));
    let campaign_id = CampaignId::new(1);

    let mut handles = Vec::new();
    for user in 1..=200 {
        let p = Arc::clone(&p);
        handles.push(tokio::spawn(async move {
            p.gate.submit(UserId::new(user), campaign_id).await.unwrap()
        }));
    }

    let mut accepted = 0;
    let mut quota_exhausted = 0;
    for handle in handles {
        match handle.await.unwrap() {
            SubmitOutcome::Accepted { .. } => accepted += 1,
            SubmitOutcome::QuotaExhausted => quota_exhausted += 1,
            SubmitOutcome::AlreadyRequested => panic!("users are distinct"),
        }
    }

    assert_eq!(accepted, 100);
    assert_eq!(quota_exhausted, 100);

    let resolved = p.channel.drive(&p.worker).await;
    assert_eq!(resolved, 100);

    let results = p.results.wait_for(100, Duration::from_secs(5)).await;
    assert_eq!(results.len(), 100);
    assert!(results.iter().all(flashdrop_core::issue::IssueResult::is_granted));

    // Conservation law at quiescence.
    assert_eq!(p.store.grant_count(campaign_id), 100);
    assert_eq!(p.store.stock(campaign_id), Some(0));
}

/// Idempotent admission: the same user's second attempt is rejected as a
/// duplicate and consumes no quota.
#[tokio::test]
async fn same_user_twice_yields_one_grant() {
    let p = pipeline(vec![campaign(1, 10)]);
    let campaign_id = CampaignId::new(1);
    let user = UserId::new(7);

    let first = p.gate.submit(user, campaign_id).await.unwrap();
    assert!(matches!(first, SubmitOutcome::Accepted { .. }));

    let second = p.gate.submit(user, campaign_id).await.unwrap();
    assert_eq!(second, SubmitOutcome::AlreadyRequested);

    p.channel.drive(&p.worker).await;

    assert_eq!(p.store.grant_count(campaign_id), 1);
    assert_eq!(p.store.stock(campaign_id), Some(9));
    assert_eq!(p.gate.issued_count(campaign_id).await.unwrap(), 1);
}

/// A zero-stock campaign produces only terminal "out of stock" results at
/// the authoritative check, never a grant.
#[tokio::test]
async fn exhausted_campaign_rejects_every_request_at_the_worker() {
    let p = pipeline(vec![campaign(1, 0)]);
    let campaign_id = CampaignId::new(1);

    // Requests land on the channel directly: the scenario exercises the
    // worker's authoritative check, not the admission gate.
    for user in 1..=5 {
        let request = IssueRequest {
            request_id: Uuid::new_v4(),
            user_id: UserId::new(user),
            campaign_id,
            submitted_at: Utc::now(),
        };
        p.channel.submit(&request).await.unwrap();
    }

    let resolved = p.channel.drive(&p.worker).await;
    assert_eq!(resolved, 5);

    let results = p.results.wait_for(5, Duration::from_secs(5)).await;
    assert_eq!(results.len(), 5);
    for result in &results {
        assert_eq!(
            result.outcome,
            IssueOutcome::Rejected {
                reason: RejectReason::OutOfStock
            }
        );
    }
    assert_eq!(p.store.grant_count(campaign_id), 0);
}

/// Unknown campaigns resolve to the terminal "coupon not found" reason.
#[tokio::test]
async fn unknown_campaign_resolves_to_not_found() {
    let p = pipeline(vec![]);

    let request = IssueRequest {
        request_id: Uuid::new_v4(),
        user_id: UserId::new(1),
        campaign_id: CampaignId::new(404),
        submitted_at: Utc::now(),
    };
    p.channel.submit(&request).await.unwrap();
    p.channel.drive(&p.worker).await;

    let results = p.results.wait_for(1, Duration::from_secs(5)).await;
    assert_eq!(
        results[0].outcome,
        IssueOutcome::Rejected {
            reason: RejectReason::CampaignNotFound
        }
    );
}

/// Retryable store failures produce no result: the request is redelivered
/// and resolves on the retry, with quota spent exactly once.
#[tokio::test]
async fn transient_store_conflict_is_redelivered_not_failed() {
    let p = pipeline(vec![campaign(1, 5)]);
    let campaign_id = CampaignId::new(1);

    p.store
        .inject_failure(StoreError::Conflict("optimistic lock".into()));

    let outcome = p.gate.submit(UserId::new(1), campaign_id).await.unwrap();
    assert!(matches!(outcome, SubmitOutcome::Accepted { .. }));

    p.channel.drive(&p.worker).await;

    // Exactly one result, and it is the successful retry.
    let results = p.results.wait_for(1, Duration::from_secs(5)).await;
    assert_eq!(results.len(), 1);
    assert!(results[0].is_granted());
    assert_eq!(p.store.grant_count(campaign_id), 1);
    assert_eq!(p.store.stock(campaign_id), Some(4));
}

/// Unclassified store errors are terminal: one "internal error" result,
/// acknowledged, never redelivered.
#[tokio::test]
async fn unclassified_store_error_is_terminal() {
    let p = pipeline(vec![campaign(1, 5)]);
    let campaign_id = CampaignId::new(1);

    p.store
        .inject_failure(StoreError::Database("constraint violated".into()));

    p.gate.submit(UserId::new(1), campaign_id).await.unwrap();
    p.channel.drive(&p.worker).await;

    let results = p.results.wait_for(1, Duration::from_secs(5)).await;
    assert_eq!(results.len(), 1);
    assert_eq!(
        results[0].outcome,
        IssueOutcome::Rejected {
            reason: RejectReason::Internal
        }
    );
    assert_eq!(p.store.grant_count(campaign_id), 0);
    // The injected failure fired before the decrement; stock is untouched.
    assert_eq!(p.store.stock(campaign_id), Some(5));
}

/// If the channel submit fails after admission, the admission entry is
/// released so the user can retry instead of being locked out.
#[tokio::test]
async fn failed_submit_releases_the_admission_entry() {
    let store = Arc::new(InMemoryCampaignStore::new());
    store.insert_campaign(campaign(1, 10));
    let admission = Arc::new(InMemoryAdmissionQueue::new(store.clone()));
    let clock = Arc::new(SystemClock);
    let campaign_id = CampaignId::new(1);
    let user = UserId::new(1);

    let broken_gate = IssuanceGate::new(
        admission.clone(),
        Arc::new(FailingRequestChannel),
        clock.clone(),
    );
    let err = broken_gate.submit(user, campaign_id).await.unwrap_err();
    assert!(matches!(err, GateError::Channel(_)));
    assert!(admission.rank(campaign_id, user).await.unwrap().is_none());

    // Same user succeeds once the channel is healthy again.
    let channel = Arc::new(InMemoryIssueChannel::new());
    let gate = IssuanceGate::new(admission, channel, clock);
    let outcome = gate.submit(user, campaign_id).await.unwrap();
    assert!(matches!(outcome, SubmitOutcome::Accepted { .. }));
}
