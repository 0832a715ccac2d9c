//! Read-only status surface
//!
//! The pipeline's only external signals: health, drift-report history and
//! the dead-letter log. Nothing here writes to the normalized store; the
//! store is read-only from the outside.

use crate::error::ApiResult;
use crate::AppState;
use axum::extract::{Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use lrx_common::db::models::DeadLetterRow;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::FromRow;

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub limit: Option<i64>,
}

impl ListParams {
    fn limit(&self) -> i64 {
        self.limit.unwrap_or(20).clamp(1, 500)
    }
}

/// Health check
pub async fn health(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    // A cheap query proves the database is reachable
    sqlx::query_scalar::<_, i64>("SELECT 1")
        .fetch_one(&state.db)
        .await?;

    Ok(Json(json!({
        "status": "ok",
        "service": "lrx-etl",
        "version": env!("CARGO_PKG_VERSION"),
    })))
}

/// One persisted drift report with its creation time
#[derive(Debug, Serialize, FromRow)]
pub struct DriftReportEntry {
    pub report_id: i64,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub raw_count: i64,
    pub normalized_count: i64,
    pub gap_count: i64,
    pub dead_letter_count: i64,
    pub created_at: DateTime<Utc>,
}

/// Recent drift reports, newest first
pub async fn drift_reports(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<Vec<DriftReportEntry>>> {
    let reports = sqlx::query_as::<_, DriftReportEntry>(
        "SELECT report_id, window_start, window_end, raw_count, normalized_count,
                gap_count, dead_letter_count, created_at
         FROM drift_reports ORDER BY report_id DESC LIMIT ?",
    )
    .bind(params.limit())
    .fetch_all(&state.db)
    .await?;

    Ok(Json(reports))
}

/// Recent dead letters, newest first
pub async fn dead_letters(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<Vec<DeadLetterRow>>> {
    let rows = sqlx::query_as::<_, DeadLetterRow>(
        "SELECT event_id, reason, first_seen, attempts, last_payload
         FROM dead_letters ORDER BY first_seen DESC LIMIT ?",
    )
    .bind(params.limit())
    .fetch_all(&state.db)
    .await?;

    Ok(Json(rows))
}
