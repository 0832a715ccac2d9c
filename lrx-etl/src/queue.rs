//! Durable queue adapter
//!
//! At-least-once delivery over three tables: `queue_messages` holds the
//! published bodies, `queue_deliveries` tracks per-consumer-group state,
//! and `queue_watermarks` records how far each group has materialized.
//! Deliveries are materialized lazily at receive time, so a group created
//! after publishing sees the topic history back to the last compaction.
//! A leased message whose lease expires becomes available again;
//! redelivery is expected and the normalizer's idempotency makes it safe.
//! Fully acked messages are purged by `compact`, keeping both tables
//! bounded by the unacked backlog.

use chrono::{Duration as ChronoDuration, Utc};
use lrx_common::Result;
use sqlx::SqlitePool;
use std::time::Duration;

/// One leased message
#[derive(Debug, Clone)]
pub struct QueueMessage {
    pub message_id: i64,
    pub message_key: String,
    pub body: String,
    /// Delivery count for this consumer group, including this lease
    pub attempts: i64,
}

#[derive(Clone)]
pub struct DurableQueue {
    pool: SqlitePool,
}

impl DurableQueue {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Publish one message; key is the event id
    pub async fn publish(&self, message_key: &str, body: &str) -> Result<i64> {
        let message_id: i64 = sqlx::query_scalar(
            "INSERT INTO queue_messages (message_key, body, enqueued_at)
             VALUES (?, ?, ?)
             RETURNING message_id",
        )
        .bind(message_key)
        .bind(body)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        Ok(message_id)
    }

    /// Lease up to `max` messages for `consumer_group`, returning immediately
    ///
    /// The whole lease runs in one transaction so two workers of the same
    /// group can never lease the same message concurrently.
    pub async fn receive(
        &self,
        consumer_group: &str,
        max: usize,
        lease: Duration,
    ) -> Result<Vec<QueueMessage>> {
        let now = Utc::now();
        let lease_until = now
            + ChronoDuration::from_std(lease)
                .unwrap_or_else(|_| ChronoDuration::seconds(30));

        let mut tx = self.pool.begin().await?;

        // Materialize deliveries for messages this group has not seen yet.
        // The watermark bounds the scan to new messages and keeps compacted
        // (fully acked) messages from reappearing as available.
        let last_seen: Option<i64> = sqlx::query_scalar(
            "SELECT last_seen FROM queue_watermarks WHERE consumer_group = ?",
        )
        .bind(consumer_group)
        .fetch_optional(&mut *tx)
        .await?;
        let last_seen = last_seen.unwrap_or(0);

        sqlx::query(
            "INSERT OR IGNORE INTO queue_deliveries (consumer_group, message_id, state, attempts)
             SELECT ?, message_id, 'available', 0 FROM queue_messages WHERE message_id > ?",
        )
        .bind(consumer_group)
        .bind(last_seen)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO queue_watermarks (consumer_group, last_seen)
             SELECT ?, COALESCE(MAX(message_id), 0) FROM queue_messages WHERE true
             ON CONFLICT(consumer_group) DO UPDATE SET
                 last_seen = MAX(excluded.last_seen, queue_watermarks.last_seen)",
        )
        .bind(consumer_group)
        .execute(&mut *tx)
        .await?;

        // Reclaim expired leases
        sqlx::query(
            "UPDATE queue_deliveries
             SET state = 'available', lease_expires_at = NULL
             WHERE consumer_group = ? AND state = 'leased' AND lease_expires_at <= ?",
        )
        .bind(consumer_group)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let candidates: Vec<(i64, String, String, i64)> = sqlx::query_as(
            "SELECT d.message_id, m.message_key, m.body, d.attempts
             FROM queue_deliveries d
             JOIN queue_messages m ON m.message_id = d.message_id
             WHERE d.consumer_group = ? AND d.state = 'available'
             ORDER BY d.message_id
             LIMIT ?",
        )
        .bind(consumer_group)
        .bind(max as i64)
        .fetch_all(&mut *tx)
        .await?;

        for (message_id, _, _, _) in &candidates {
            sqlx::query(
                "UPDATE queue_deliveries
                 SET state = 'leased', attempts = attempts + 1, lease_expires_at = ?
                 WHERE consumer_group = ? AND message_id = ?",
            )
            .bind(lease_until)
            .bind(consumer_group)
            .bind(message_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        Ok(candidates
            .into_iter()
            .map(|(message_id, message_key, body, attempts)| QueueMessage {
                message_id,
                message_key,
                body,
                // The lease above bumped the stored count
                attempts: attempts + 1,
            })
            .collect())
    }

    /// Lease a batch, polling until messages arrive or `poll_timeout` elapses
    pub async fn receive_blocking(
        &self,
        consumer_group: &str,
        max: usize,
        lease: Duration,
        poll_timeout: Duration,
    ) -> Result<Vec<QueueMessage>> {
        let deadline = tokio::time::Instant::now() + poll_timeout;
        loop {
            let batch = self.receive(consumer_group, max, lease).await?;
            if !batch.is_empty() || tokio::time::Instant::now() >= deadline {
                return Ok(batch);
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Acknowledge a processed message (success or dead-lettered)
    pub async fn ack(&self, consumer_group: &str, message_id: i64) -> Result<()> {
        sqlx::query(
            "UPDATE queue_deliveries
             SET state = 'acked', lease_expires_at = NULL
             WHERE consumer_group = ? AND message_id = ?",
        )
        .bind(consumer_group)
        .bind(message_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Return a leased message for prompt redelivery (transient failure)
    pub async fn release(&self, consumer_group: &str, message_id: i64) -> Result<()> {
        sqlx::query(
            "UPDATE queue_deliveries
             SET state = 'available', lease_expires_at = NULL
             WHERE consumer_group = ? AND message_id = ? AND state = 'leased'",
        )
        .bind(consumer_group)
        .bind(message_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Delivery attempts recorded for one message in one group
    pub async fn attempts(&self, consumer_group: &str, message_id: i64) -> Result<i64> {
        let attempts: Option<i64> = sqlx::query_scalar(
            "SELECT attempts FROM queue_deliveries WHERE consumer_group = ? AND message_id = ?",
        )
        .bind(consumer_group)
        .bind(message_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(attempts.unwrap_or(0))
    }

    /// Purge messages every known consumer group has acked
    ///
    /// Only messages at or below every group's watermark are candidates, so
    /// a group registered by its first receive can never lose messages it
    /// has not processed. Groups created after compaction start from the
    /// current topic tail.
    pub async fn compact(&self) -> Result<u64> {
        let mut tx = self.pool.begin().await?;

        let floor: Option<i64> = sqlx::query_scalar("SELECT MIN(last_seen) FROM queue_watermarks")
            .fetch_one(&mut *tx)
            .await?;
        let Some(floor) = floor else {
            // No group has ever received; nothing is provably done
            tx.commit().await?;
            return Ok(0);
        };

        // Delivery rows first (they reference the messages), then the
        // message bodies that no longer have any outstanding delivery
        sqlx::query(
            "DELETE FROM queue_deliveries
             WHERE message_id IN (
                 SELECT m.message_id FROM queue_messages m
                 WHERE m.message_id <= ?
                   AND NOT EXISTS (
                       SELECT 1 FROM queue_deliveries d
                       WHERE d.message_id = m.message_id AND d.state != 'acked'
                   )
             )",
        )
        .bind(floor)
        .execute(&mut *tx)
        .await?;

        let purged = sqlx::query(
            "DELETE FROM queue_messages
             WHERE message_id <= ?
               AND NOT EXISTS (
                   SELECT 1 FROM queue_deliveries d
                   WHERE d.message_id = queue_messages.message_id
               )",
        )
        .bind(floor)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        tx.commit().await?;

        Ok(purged)
    }

    /// Messages not yet acked for one group (includes never-materialized ones)
    pub async fn pending_count(&self, consumer_group: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM queue_messages m
             WHERE NOT EXISTS (
                 SELECT 1 FROM queue_deliveries d
                 WHERE d.consumer_group = ? AND d.message_id = m.message_id AND d.state = 'acked'
             )",
        )
        .bind(consumer_group)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }
}
