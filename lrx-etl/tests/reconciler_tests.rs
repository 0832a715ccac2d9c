//! Reconciler convergence, dead-letter routing and attempt caps

mod helpers;

use chrono::{Duration as ChronoDuration, Utc};
use helpers::{completed_lesson_json, count, create_test_db, statement_json};
use lrx_common::db::settings::EtlParams;
use lrx_common::events::EventBus;
use lrx_etl::dead_letter::DeadLetterStore;
use lrx_etl::raw_store::RawStore;
use lrx_etl::reconciler::Reconciler;
use uuid::Uuid;

fn window() -> (chrono::DateTime<Utc>, chrono::DateTime<Utc>) {
    let now = Utc::now();
    (now - ChronoDuration::hours(1), now + ChronoDuration::minutes(1))
}

fn test_params() -> EtlParams {
    EtlParams {
        dead_letter_max_attempts: 2,
        ..EtlParams::default()
    }
}

#[tokio::test]
async fn reconcile_normalizes_events_that_bypassed_the_queue() {
    let (_dir, pool) = create_test_db().await;
    let raw_store = RawStore::new(pool.clone());

    // Raw rows exist but nothing was ever published to the queue
    for i in 0..5 {
        let id = Uuid::new_v4();
        let payload = statement_json(
            id,
            "mailto:gap@x.com",
            "http://adlnet.gov/expapi/verbs/attempted",
            &format!("http://learning.example.com/lesson-{}", i),
        );
        raw_store.record(id, &payload, "gateway").await.unwrap();
    }
    assert_eq!(count(&pool, "statements").await, 0);

    let reconciler = Reconciler::new(pool.clone(), test_params(), EventBus::new(16));
    let (start, end) = window();
    let report = reconciler.reconcile(start, end).await.unwrap();

    assert_eq!(report.raw_count, 5);
    assert_eq!(report.normalized_count, 5);
    assert_eq!(report.gap_count, 0);
    assert_eq!(report.dead_letter_count, 0);
    assert!(report.converged());
    assert_eq!(count(&pool, "statements").await, 5);

    // The pass leaves a queryable report behind
    assert_eq!(count(&pool, "drift_reports").await, 1);
}

#[tokio::test]
async fn malformed_raw_event_is_dead_lettered_not_lost() {
    let (_dir, pool) = create_test_db().await;
    let raw_store = RawStore::new(pool.clone());
    let dead_letters = DeadLetterStore::new(pool.clone());

    let bad_id = Uuid::new_v4();
    let payload = serde_json::json!({
        "id": bad_id,
        "actor": {"name": "No Identifier At All"},
        "verb": {"id": "http://adlnet.gov/expapi/verbs/attempted"},
        "object": {"id": "http://learning.example.com/lesson-1"}
    })
    .to_string();
    raw_store.record(bad_id, &payload, "gateway").await.unwrap();

    let good_id = Uuid::new_v4();
    raw_store
        .record(
            good_id,
            &completed_lesson_json(good_id),
            "gateway",
        )
        .await
        .unwrap();

    let reconciler = Reconciler::new(pool.clone(), test_params(), EventBus::new(16));
    let (start, end) = window();
    let report = reconciler.reconcile(start, end).await.unwrap();

    // Never silently missing: normalized or dead-lettered
    assert_eq!(report.raw_count, 2);
    assert_eq!(report.normalized_count, 1);
    assert_eq!(report.dead_letter_count, 1);
    assert_eq!(report.gap_count, 0);

    let entry = dead_letters.get(&bad_id.to_string()).await.unwrap().unwrap();
    assert!(entry.reason.contains("identifier"), "reason: {}", entry.reason);
    assert!(entry.last_payload.is_some());
}

#[tokio::test]
async fn transient_failures_dead_letter_after_attempt_cap() {
    let (_dir, pool) = create_test_db().await;
    let raw_store = RawStore::new(pool.clone());
    let dead_letters = DeadLetterStore::new(pool.clone());

    // Valid shape, but the scaled score violates the schema CHECK, so
    // every re-drive aborts the transaction
    let id = Uuid::new_v4();
    let payload = serde_json::json!({
        "id": id,
        "actor": {"mbox": "mailto:a@x.com"},
        "verb": {"id": "http://adlnet.gov/expapi/verbs/completed"},
        "object": {"id": "http://learning.example.com/lesson-1"},
        "result": {"score": {"scaled": 9.9}}
    })
    .to_string();
    raw_store.record(id, &payload, "gateway").await.unwrap();

    let reconciler = Reconciler::new(pool.clone(), test_params(), EventBus::new(16));
    let (start, end) = window();

    // Passes 1 and 2 leave the event pending retry
    let r1 = reconciler.reconcile(start, end).await.unwrap();
    assert_eq!(r1.gap_count, 1);
    let r2 = reconciler.reconcile(start, end).await.unwrap();
    assert_eq!(r2.gap_count, 1);
    assert!(!dead_letters.contains(&id.to_string()).await.unwrap());

    // Pass 3 exceeds max_attempts = 2 and dead-letters the event
    let r3 = reconciler.reconcile(start, end).await.unwrap();
    assert_eq!(r3.gap_count, 0);
    assert_eq!(r3.dead_letter_count, 1);

    let entry = dead_letters.get(&id.to_string()).await.unwrap().unwrap();
    assert!(entry.reason.contains("attempt limit"));

    // Attempt bookkeeping is cleared once the event terminates
    assert_eq!(count(&pool, "reconcile_attempts").await, 0);
}

#[tokio::test]
async fn reconcile_is_idempotent_over_normalized_events() {
    let (_dir, pool) = create_test_db().await;
    let raw_store = RawStore::new(pool.clone());

    let id = Uuid::new_v4();
    raw_store
        .record(id, &completed_lesson_json(id), "gateway")
        .await
        .unwrap();

    let reconciler = Reconciler::new(pool.clone(), test_params(), EventBus::new(16));
    let (start, end) = window();

    let first = reconciler.reconcile(start, end).await.unwrap();
    assert_eq!(first.normalized_count, 1);

    // Second pass re-scans but re-drives nothing
    let second = reconciler.reconcile(start, end).await.unwrap();
    assert_eq!(second.normalized_count, 1);
    assert_eq!(second.gap_count, 0);
    assert_eq!(count(&pool, "statements").await, 1);
    assert_eq!(count(&pool, "results").await, 1);
}

#[tokio::test]
async fn window_bounds_the_scan() {
    let (_dir, pool) = create_test_db().await;
    let raw_store = RawStore::new(pool.clone());

    let id = Uuid::new_v4();
    let payload = statement_json(
        id,
        "mailto:old@x.com",
        "http://adlnet.gov/expapi/verbs/attempted",
        "http://learning.example.com/lesson-1",
    );
    raw_store.record(id, &payload, "gateway").await.unwrap();

    // A window that ended before the event arrived must not touch it
    let stale_end = Utc::now() - ChronoDuration::hours(2);
    let stale_start = stale_end - ChronoDuration::hours(1);

    let reconciler = Reconciler::new(pool.clone(), test_params(), EventBus::new(16));
    let report = reconciler.reconcile(stale_start, stale_end).await.unwrap();

    assert_eq!(report.raw_count, 0);
    assert_eq!(count(&pool, "statements").await, 0);
}
