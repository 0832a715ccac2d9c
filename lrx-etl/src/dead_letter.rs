//! Dead-letter store
//!
//! Durable, append-ish log of events that permanently failed processing:
//! malformed payloads, unresolvable identities, and transient failures
//! that exhausted their reconcile attempts. Keyed by event id; repeated
//! records of the same event bump the attempt count and refresh the
//! reason, keeping `first_seen` from the original failure.

use chrono::{DateTime, Utc};
use lrx_common::db::models::DeadLetterRow;
use lrx_common::Result;
use sqlx::SqlitePool;

#[derive(Clone)]
pub struct DeadLetterStore {
    pool: SqlitePool,
}

impl DeadLetterStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Record a permanent failure (upsert by event id)
    pub async fn record(
        &self,
        event_id: &str,
        reason: &str,
        last_payload: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO dead_letters (event_id, reason, first_seen, attempts, last_payload)
             VALUES (?, ?, ?, 1, ?)
             ON CONFLICT(event_id) DO UPDATE SET
                 reason = excluded.reason,
                 attempts = dead_letters.attempts + 1,
                 last_payload = COALESCE(excluded.last_payload, dead_letters.last_payload)",
        )
        .bind(event_id)
        .bind(reason)
        .bind(Utc::now())
        .bind(last_payload)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn contains(&self, event_id: &str) -> Result<bool> {
        let found: Option<i64> =
            sqlx::query_scalar("SELECT 1 FROM dead_letters WHERE event_id = ?")
                .bind(event_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(found.is_some())
    }

    pub async fn get(&self, event_id: &str) -> Result<Option<DeadLetterRow>> {
        let row = sqlx::query_as::<_, DeadLetterRow>(
            "SELECT event_id, reason, first_seen, attempts, last_payload
             FROM dead_letters WHERE event_id = ?",
        )
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    /// Dead-lettered events whose raw payload arrived inside the window
    pub async fn count_in_window(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM dead_letters d
             JOIN raw_events r ON r.event_id = d.event_id
             WHERE r.received_at >= ? AND r.received_at <= ?",
        )
        .bind(start)
        .bind(end)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    /// Most recent dead letters, newest first
    pub async fn list(&self, limit: i64) -> Result<Vec<DeadLetterRow>> {
        let rows = sqlx::query_as::<_, DeadLetterRow>(
            "SELECT event_id, reason, first_seen, attempts, last_payload
             FROM dead_letters ORDER BY first_seen DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}
