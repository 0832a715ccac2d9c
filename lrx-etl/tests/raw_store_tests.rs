//! Raw store write-once behavior and the gap query

mod helpers;

use chrono::{Duration as ChronoDuration, Utc};
use helpers::{completed_lesson_json, create_test_db};
use lrx_etl::dead_letter::DeadLetterStore;
use lrx_etl::normalizer::Normalizer;
use lrx_etl::raw_store::RawStore;
use uuid::Uuid;

#[tokio::test]
async fn raw_events_are_write_once() {
    let (_dir, pool) = create_test_db().await;
    let raw_store = RawStore::new(pool);

    let id = Uuid::new_v4();
    assert!(raw_store.record(id, "{\"v\":1}", "gateway").await.unwrap());

    // Second write with the same id is ignored, original payload survives
    assert!(!raw_store.record(id, "{\"v\":2}", "gateway").await.unwrap());

    let row = raw_store.fetch(&id.to_string()).await.unwrap().unwrap();
    assert_eq!(row.payload, "{\"v\":1}");
    assert_eq!(row.source, "gateway");
}

#[tokio::test]
async fn gap_query_excludes_normalized_and_dead_lettered() {
    let (_dir, pool) = create_test_db().await;
    let raw_store = RawStore::new(pool.clone());
    let dead_letters = DeadLetterStore::new(pool.clone());
    let normalizer = Normalizer::new(pool.clone(), 0);

    let normalized_id = Uuid::new_v4();
    let dead_id = Uuid::new_v4();
    let gap_id = Uuid::new_v4();

    for id in [normalized_id, dead_id, gap_id] {
        raw_store
            .record(id, &completed_lesson_json(id), "gateway")
            .await
            .unwrap();
    }

    let result = normalizer
        .normalize_payload(&completed_lesson_json(normalized_id), "test")
        .await;
    assert!(result.is_success());

    dead_letters
        .record(&dead_id.to_string(), "broken", None)
        .await
        .unwrap();

    let now = Utc::now();
    let gap = raw_store
        .unnormalized_in_window(now - ChronoDuration::hours(1), now + ChronoDuration::minutes(1))
        .await
        .unwrap();

    assert_eq!(gap, vec![gap_id.to_string()]);
}

#[tokio::test]
async fn dead_letter_record_bumps_attempts_and_keeps_first_seen() {
    let (_dir, pool) = create_test_db().await;
    let dead_letters = DeadLetterStore::new(pool);

    dead_letters.record("e1", "first reason", Some("{}")).await.unwrap();
    let first = dead_letters.get("e1").await.unwrap().unwrap();
    assert_eq!(first.attempts, 1);

    dead_letters.record("e1", "second reason", None).await.unwrap();
    let second = dead_letters.get("e1").await.unwrap().unwrap();
    assert_eq!(second.attempts, 2);
    assert_eq!(second.reason, "second reason");
    assert_eq!(second.first_seen, first.first_seen);
    // Payload survives a record call that omits it
    assert_eq!(second.last_payload.as_deref(), Some("{}"));
}
