//! Reconciler
//!
//! Periodic catch-up job that compares the raw-store population against
//! the normalized-store population over a trailing window, re-drives any
//! gap through the normalizer in batch mode, and persists a DriftReport.
//! This replaces the manual row-count comparison scripts that used to
//! catch drift only when an operator thought to run them.
//!
//! From the reconciler's viewpoint one raw event moves through:
//! unseen, then per pass either normalized, dead-lettered, or pending
//! retry. Pending retries are capped at `dead_letter_max_attempts` before
//! being dead-lettered, so every event terminates in one of two states.

use crate::dead_letter::DeadLetterStore;
use crate::error::NormalizationResult;
use crate::normalizer::Normalizer;
use crate::queue::DurableQueue;
use crate::raw_store::RawStore;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use lrx_common::db::models::DriftReport;
use lrx_common::db::settings::EtlParams;
use lrx_common::events::{EtlEvent, EventBus};
use lrx_common::Result;
use sqlx::SqlitePool;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

pub struct Reconciler {
    pool: SqlitePool,
    raw_store: RawStore,
    dead_letters: DeadLetterStore,
    normalizer: Normalizer,
    queue: DurableQueue,
    params: EtlParams,
    event_bus: EventBus,
}

impl Reconciler {
    pub fn new(pool: SqlitePool, params: EtlParams, event_bus: EventBus) -> Self {
        Self {
            raw_store: RawStore::new(pool.clone()),
            dead_letters: DeadLetterStore::new(pool.clone()),
            normalizer: Normalizer::new(pool.clone(), params.identity_cache_capacity),
            queue: DurableQueue::new(pool.clone()),
            pool,
            params,
            event_bus,
        }
    }

    /// Run reconciliation passes until cancelled
    pub async fn run(self, cancel_token: CancellationToken) {
        let interval = Duration::from_secs(self.params.reconcile_interval_secs);
        info!(
            interval_secs = self.params.reconcile_interval_secs,
            window_secs = self.params.reconcile_window_secs,
            "Reconciler started"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = cancel_token.cancelled() => break,
            }

            let window_end = Utc::now();
            let window_start =
                window_end - ChronoDuration::seconds(self.params.reconcile_window_secs as i64);

            match self.reconcile(window_start, window_end).await {
                Ok(report) => {
                    if !report.converged() {
                        warn!(
                            gap_count = report.gap_count,
                            "Reconciliation pass left a gap; retrying next pass"
                        );
                    }
                }
                Err(e) => warn!("Reconciliation pass failed: {}", e),
            }

            // Piggyback queue upkeep on the reconcile cadence
            match self.queue.compact().await {
                Ok(purged) if purged > 0 => info!(purged, "Compacted acked queue messages"),
                Ok(_) => {}
                Err(e) => warn!("Queue compaction failed: {}", e),
            }
        }

        info!("Reconciler stopped");
    }

    /// One reconciliation pass over the given window
    ///
    /// Re-drives every raw event in the gap, then reports the counts as
    /// they stand after the re-drive.
    pub async fn reconcile(
        &self,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Result<DriftReport> {
        let gap_ids = self
            .raw_store
            .unnormalized_in_window(window_start, window_end)
            .await?;

        for event_id in &gap_ids {
            self.redrive(event_id).await?;
        }

        let raw_count = self
            .raw_store
            .count_in_window(window_start, window_end)
            .await?;
        let normalized_count = self
            .normalized_count_in_window(window_start, window_end)
            .await?;
        let dead_letter_count = self
            .dead_letters
            .count_in_window(window_start, window_end)
            .await?;
        let gap_count = raw_count - normalized_count - dead_letter_count;

        let report = DriftReport {
            window_start,
            window_end,
            raw_count,
            normalized_count,
            gap_count,
            dead_letter_count,
        };

        self.persist_report(&report).await?;
        self.event_bus.emit_lossy(EtlEvent::DriftReportReady {
            report: report.clone(),
        });

        info!(
            raw = report.raw_count,
            normalized = report.normalized_count,
            gap = report.gap_count,
            dead_lettered = report.dead_letter_count,
            "Reconciliation pass complete"
        );

        Ok(report)
    }

    /// Re-drive one gap event through the normalizer in batch mode
    async fn redrive(&self, event_id: &str) -> Result<()> {
        let attempts = self.bump_attempts(event_id).await?;
        if attempts > self.params.dead_letter_max_attempts as i64 {
            let payload = self
                .raw_store
                .fetch(event_id)
                .await?
                .map(|row| row.payload);
            self.dead_letters
                .record(
                    event_id,
                    "exceeded reconcile attempt limit",
                    payload.as_deref(),
                )
                .await?;
            self.clear_attempts(event_id).await?;
            self.emit_dead_letter(event_id, "exceeded reconcile attempt limit");
            return Ok(());
        }

        let Some(raw) = self.raw_store.fetch(event_id).await? else {
            // Raw rows are immutable and never deleted; a miss here means
            // the id came from a different store generation
            warn!(event_id, "Gap id has no raw row, skipping");
            return Ok(());
        };

        match self
            .normalizer
            .normalize_payload(&raw.payload, "reconciler")
            .await
        {
            NormalizationResult::Normalized { statement_id }
            | NormalizationResult::AlreadyNormalized { statement_id } => {
                self.clear_attempts(event_id).await?;
                self.event_bus.emit_lossy(EtlEvent::StatementNormalized {
                    statement_id,
                    timestamp: Utc::now(),
                });
            }
            NormalizationResult::PermanentFailure { reason } => {
                self.dead_letters
                    .record(event_id, &reason, Some(&raw.payload))
                    .await?;
                self.clear_attempts(event_id).await?;
                self.emit_dead_letter(event_id, &reason);
            }
            NormalizationResult::TransientFailure { reason, .. } => {
                // Pending retry: picked up again next pass, capped by the
                // attempt limit above
                warn!(event_id, "Re-drive failed transiently: {}", reason);
            }
        }

        Ok(())
    }

    async fn normalized_count_in_window(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(DISTINCT s.statement_id)
             FROM statements s
             JOIN raw_events r ON r.event_id = s.statement_id
             WHERE r.received_at >= ? AND r.received_at <= ?",
        )
        .bind(start)
        .bind(end)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    async fn bump_attempts(&self, event_id: &str) -> Result<i64> {
        let attempts: i64 = sqlx::query_scalar(
            "INSERT INTO reconcile_attempts (event_id, attempts, last_attempt_at)
             VALUES (?, 1, ?)
             ON CONFLICT(event_id) DO UPDATE SET
                 attempts = reconcile_attempts.attempts + 1,
                 last_attempt_at = excluded.last_attempt_at
             RETURNING attempts",
        )
        .bind(event_id)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        Ok(attempts)
    }

    async fn clear_attempts(&self, event_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM reconcile_attempts WHERE event_id = ?")
            .bind(event_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn persist_report(&self, report: &DriftReport) -> Result<()> {
        sqlx::query(
            "INSERT INTO drift_reports
                 (window_start, window_end, raw_count, normalized_count, gap_count, dead_letter_count, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(report.window_start)
        .bind(report.window_end)
        .bind(report.raw_count)
        .bind(report.normalized_count)
        .bind(report.gap_count)
        .bind(report.dead_letter_count)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn emit_dead_letter(&self, event_id: &str, reason: &str) {
        if let Ok(event_id) = Uuid::parse_str(event_id) {
            self.event_bus.emit_lossy(EtlEvent::EventDeadLettered {
                event_id,
                reason: reason.to_string(),
                timestamp: Utc::now(),
            });
        }
    }
}
