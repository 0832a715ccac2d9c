//! Raw store adapter
//!
//! Append-only table of every accepted event payload, keyed by event id.
//! Rows are written once by the gateway and never mutated; the reconciler
//! reads them back to re-drive events the queue path missed.

use chrono::{DateTime, Utc};
use lrx_common::db::models::RawEventRow;
use lrx_common::Result;
use sqlx::SqlitePool;
use uuid::Uuid;

#[derive(Clone)]
pub struct RawStore {
    pool: SqlitePool,
}

impl RawStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Record an accepted event payload. Write-once: a second record of the
    /// same event id is ignored and reported as `false`.
    pub async fn record(&self, event_id: Uuid, payload: &str, source: &str) -> Result<bool> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO raw_events (event_id, received_at, payload, source)
             VALUES (?, ?, ?, ?)",
        )
        .bind(event_id.to_string())
        .bind(Utc::now())
        .bind(payload)
        .bind(source)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Fetch one raw event by id
    pub async fn fetch(&self, event_id: &str) -> Result<Option<RawEventRow>> {
        let row = sqlx::query_as::<_, RawEventRow>(
            "SELECT event_id, received_at, payload, source FROM raw_events WHERE event_id = ?",
        )
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    /// Count raw events received inside the window
    pub async fn count_in_window(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(DISTINCT event_id) FROM raw_events WHERE received_at >= ? AND received_at <= ?",
        )
        .bind(start)
        .bind(end)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    /// Event ids in the window with no normalized statement and no
    /// dead-letter entry. This is the reconciler's gap query; the window
    /// bound keeps the scan cost fixed.
    pub async fn unnormalized_in_window(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<String>> {
        let ids: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT r.event_id
            FROM raw_events r
            LEFT JOIN statements s ON s.statement_id = r.event_id
            LEFT JOIN dead_letters d ON d.event_id = r.event_id
            WHERE r.received_at >= ? AND r.received_at <= ?
              AND s.statement_id IS NULL
              AND d.event_id IS NULL
            ORDER BY r.received_at
            "#,
        )
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }
}
