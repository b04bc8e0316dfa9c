//! End-to-end queue behaviour on the in-memory store with a manual clock.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use rstest::rstest;
use serde_json::json;
use tether_core::app::{App, AppBuilder, ReaperLoop};
use tether_core::config::ReaperConfig;
use tether_core::domain::{EnqueueOptions, JobStatus, JobType, RetryPolicy, WorkerId};
use tether_core::error::HandlerError;
use tether_core::impls::InMemoryJobStore;
use tether_core::ports::{Clock, FixedClock, JobStore};

const LEASE_TIMEOUT: Duration = Duration::from_secs(300);

fn clock() -> Arc<FixedClock> {
    Arc::new(FixedClock::new(
        Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap(),
    ))
}

fn always_retryable_app() -> App {
    AppBuilder::new()
        .register_fn("x", |_| async {
            Err(HandlerError::retryable("downstream unavailable"))
        })
        .unwrap()
        .retry_policy(RetryPolicy::default().without_jitter())
        .build()
        .unwrap()
}

fn reaper(store: Arc<InMemoryJobStore>) -> ReaperLoop {
    ReaperLoop::new(
        store,
        ReaperConfig {
            lease_timeout: LEASE_TIMEOUT,
            interval: Duration::from_secs(60),
        },
    )
}

// Scenario A
#[tokio::test]
async fn always_retryable_job_fails_after_max_attempts() {
    let clock = clock();
    let store = Arc::new(InMemoryJobStore::new(clock.clone()));
    let app = always_retryable_app();
    let dispatcher = app.dispatcher(store.clone(), WorkerId::generate());

    let id = store
        .enqueue(
            JobType::new("x"),
            json!({}),
            EnqueueOptions::default().with_max_attempts(3),
        )
        .await
        .unwrap();

    let mut reports = Vec::new();
    for _ in 0..3 {
        reports.push(dispatcher.dispatch_once(1).await.unwrap());
        clock.advance(Duration::from_secs(600));
    }

    assert_eq!(reports[0].retried, 1);
    assert_eq!(reports[1].retried, 1);
    assert_eq!(reports[2].failed, 1);

    let job = store.get(&id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.attempt_count, 3);
    assert_eq!(job.error_message.as_deref(), Some("downstream unavailable"));
    assert!(job.completed_at.is_some());

    // terminal: nothing left to claim
    let report = dispatcher.dispatch_once(1).await.unwrap();
    assert_eq!(report.none_available, 1);
}

#[rstest]
#[case::single(1)]
#[case::two(2)]
#[case::five(5)]
#[tokio::test]
async fn retryable_job_takes_exactly_max_attempts_cycles(#[case] max_attempts: u32) {
    let clock = clock();
    let store = Arc::new(InMemoryJobStore::new(clock.clone()));
    let dispatcher = always_retryable_app().dispatcher(store.clone(), WorkerId::generate());

    let id = store
        .enqueue(
            JobType::new("x"),
            json!({}),
            EnqueueOptions::default().with_max_attempts(max_attempts),
        )
        .await
        .unwrap();

    for cycle in 1..=max_attempts {
        let report = dispatcher.dispatch_once(1).await.unwrap();
        assert_eq!(report.claimed(), 1, "cycle {cycle}");
        let job = store.get(&id).await.unwrap().unwrap();
        assert_eq!(job.attempt_count, cycle);
        clock.advance(Duration::from_secs(600));
    }

    let job = store.get(&id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.attempt_count, max_attempts);
}

#[tokio::test]
async fn retry_is_not_claimable_before_its_backoff() {
    let clock = clock();
    let store = Arc::new(InMemoryJobStore::new(clock.clone()));
    let dispatcher = always_retryable_app().dispatcher(store.clone(), WorkerId::generate());
    store
        .enqueue(JobType::new("x"), json!({}), EnqueueOptions::default())
        .await
        .unwrap();

    assert_eq!(dispatcher.dispatch_once(1).await.unwrap().retried, 1);

    // first retry waits base * 2^1 = 4s
    clock.advance(Duration::from_secs(3));
    assert!(store.claim_next(&WorkerId::generate()).await.unwrap().is_none());
    clock.advance(Duration::from_secs(1));
    assert!(store.claim_next(&WorkerId::generate()).await.unwrap().is_some());
}

// Scenario B
#[tokio::test]
async fn two_concurrent_claims_get_distinct_jobs() {
    let store = Arc::new(InMemoryJobStore::new(clock()));
    for _ in 0..2 {
        store
            .enqueue(JobType::new("x"), json!({}), EnqueueOptions::default())
            .await
            .unwrap();
    }

    let (w1, w2) = (WorkerId::generate(), WorkerId::generate());
    let (a, b) = tokio::join!(store.claim_next(&w1), store.claim_next(&w2));
    let (a, b) = (a.unwrap().unwrap(), b.unwrap().unwrap());
    assert_ne!(a.id, b.id);
    assert_eq!(a.locked_by, Some(w1));
    assert_eq!(b.locked_by, Some(w2));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn many_concurrent_claims_never_share_a_job() {
    const JOBS: usize = 32;
    const CLAIMERS: usize = 24;

    let store = Arc::new(InMemoryJobStore::new(clock()));
    for _ in 0..JOBS {
        store
            .enqueue(JobType::new("x"), json!({}), EnqueueOptions::default())
            .await
            .unwrap();
    }

    let mut handles = Vec::new();
    for _ in 0..CLAIMERS {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store.claim_next(&WorkerId::generate()).await.unwrap()
        }));
    }

    let mut seen = HashSet::new();
    for h in handles {
        let job = h.await.unwrap().unwrap();
        assert!(seen.insert(job.id), "job {} claimed twice", job.id);
    }
    assert_eq!(seen.len(), CLAIMERS);
    assert_eq!(store.counts().await.unwrap().processing, CLAIMERS as u64);
}

// Scenario C
#[tokio::test]
async fn reaper_returns_abandoned_job_to_pending() {
    let clock = clock();
    let store = Arc::new(InMemoryJobStore::new(clock.clone()));
    let dispatcher = always_retryable_app().dispatcher(store.clone(), WorkerId::generate());

    let id = store
        .enqueue(JobType::new("x"), json!({}), EnqueueOptions::default())
        .await
        .unwrap();
    // one real failure first so attempt_count is non-zero
    dispatcher.dispatch_once(1).await.unwrap();
    clock.advance(Duration::from_secs(600));

    let claimed = store.claim_next(&WorkerId::generate()).await.unwrap().unwrap();
    assert_eq!(claimed.id, id);
    assert_eq!(claimed.status, JobStatus::Processing);

    clock.advance(LEASE_TIMEOUT + Duration::from_secs(1));
    let reclaimed = reaper(store.clone()).tick().await.unwrap();
    assert_eq!(reclaimed, vec![id]);

    let job = store.get(&id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.attempt_count, 1);
    assert_eq!(job.scheduled_at, clock.now());
    assert!(job.locked_by.is_none());
}

// Scenario D
#[tokio::test]
async fn delayed_job_is_not_claimable_early() {
    let clock = clock();
    let store = Arc::new(InMemoryJobStore::new(clock.clone()));
    let id = store
        .enqueue(
            JobType::new("x"),
            json!({}),
            EnqueueOptions::default().with_initial_delay(Duration::from_secs(60)),
        )
        .await
        .unwrap();

    assert!(store.claim_next(&WorkerId::generate()).await.unwrap().is_none());

    clock.advance(Duration::from_secs(59));
    assert!(store.claim_next(&WorkerId::generate()).await.unwrap().is_none());

    clock.advance(Duration::from_secs(1));
    let job = store.claim_next(&WorkerId::generate()).await.unwrap().unwrap();
    assert_eq!(job.id, id);
}

#[tokio::test]
async fn late_result_after_reclaim_is_dropped() {
    let clock = clock();
    let store = Arc::new(InMemoryJobStore::new(clock.clone()));

    // The handler outlives its lease: the reaper runs while it is executing.
    let app = {
        let store = store.clone();
        let clock = clock.clone();
        AppBuilder::new()
            .register_fn("slow", move |_| {
                let store = store.clone();
                let clock = clock.clone();
                async move {
                    clock.advance(LEASE_TIMEOUT * 2);
                    reaper(store).tick().await.map_err(HandlerError::fatal)?;
                    Ok(json!("finished too late"))
                }
            })
            .unwrap()
            .build()
            .unwrap()
    };

    let id = store
        .enqueue(JobType::new("slow"), json!({}), EnqueueOptions::default())
        .await
        .unwrap();
    let report = app
        .dispatcher(store.clone(), WorkerId::generate())
        .dispatch_once(1)
        .await
        .unwrap();

    assert_eq!(report.lease_lost, 1);
    assert_eq!(report.succeeded, 0);
    let job = store.get(&id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.attempt_count, 0);
}

#[tokio::test]
async fn panicking_handler_is_retried_and_dispatcher_survives() {
    let clock = clock();
    let store = Arc::new(InMemoryJobStore::new(clock.clone()));
    let app = AppBuilder::new()
        .register_fn("boom", |payload| async move {
            if payload["explode"] == json!(true) {
                panic!("kaboom");
            }
            Ok(json!(null))
        })
        .unwrap()
        .build()
        .unwrap();
    let dispatcher = app.dispatcher(store.clone(), WorkerId::generate());

    let bad = store
        .enqueue(
            JobType::new("boom"),
            json!({"explode": true}),
            EnqueueOptions::default(),
        )
        .await
        .unwrap();
    let good = store
        .enqueue(
            JobType::new("boom"),
            json!({"explode": false}),
            EnqueueOptions::default(),
        )
        .await
        .unwrap();

    let report = dispatcher.dispatch_once(5).await.unwrap();
    assert_eq!(report.retried, 1);
    assert_eq!(report.succeeded, 1);

    let bad = store.get(&bad).await.unwrap().unwrap();
    assert_eq!(bad.status, JobStatus::Pending);
    assert_eq!(
        bad.error_message.as_deref(),
        Some("handler panicked: kaboom")
    );
    assert_eq!(
        store.get(&good).await.unwrap().unwrap().status,
        JobStatus::Completed
    );
}
