//! Shared helpers for lrx-etl integration tests

use lrx_common::db::init::init_database;
use sqlx::SqlitePool;
use tempfile::TempDir;
use uuid::Uuid;

/// Create a throwaway file-backed database with the full schema
///
/// Keep the TempDir alive for the duration of the test; dropping it
/// deletes the database file.
pub async fn create_test_db() -> (TempDir, SqlitePool) {
    let dir = TempDir::new().expect("create temp dir");
    let db_path = dir.path().join("lrx-test.db");
    let pool = init_database(&db_path, 10, 1)
        .await
        .expect("init test database");
    (dir, pool)
}

/// Minimal valid statement payload
pub fn statement_json(id: Uuid, mbox: &str, verb_iri: &str, activity_iri: &str) -> String {
    serde_json::json!({
        "id": id,
        "actor": {"objectType": "Agent", "mbox": mbox},
        "verb": {"id": verb_iri},
        "object": {"id": activity_iri, "objectType": "Activity"}
    })
    .to_string()
}

/// Completed lesson-1 with a completion flag, scaled score and extensions
pub fn completed_lesson_json(id: Uuid) -> String {
    serde_json::json!({
        "id": id,
        "actor": {"objectType": "Agent", "name": "Ada Learner", "mbox": "mailto:a@x.com"},
        "verb": {
            "id": "http://adlnet.gov/expapi/verbs/completed",
            "display": {"en-US": "completed"}
        },
        "object": {
            "id": "http://learning.example.com/lesson-1",
            "objectType": "Activity",
            "definition": {"name": {"en": "Lesson 1"}}
        },
        "result": {"completion": true, "score": {"scaled": 0.9}},
        "context": {
            "extensions": {
                "http://learning.example.com/ext/device": "tablet",
                "http://learning.example.com/ext/empty": ""
            }
        }
    })
    .to_string()
}

pub async fn count(pool: &SqlitePool, table: &str) -> i64 {
    let sql = format!("SELECT COUNT(*) FROM {}", table);
    sqlx::query_scalar(&sql).fetch_one(pool).await.unwrap()
}
