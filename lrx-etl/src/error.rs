//! Failure taxonomy for the normalization pipeline
//!
//! Failures are split by permanence: permanent ones go to the dead-letter
//! log and are never retried, transient ones are requeued or left for the
//! reconciler. Retry policy lives with the caller (worker loop or
//! reconciler), not in the error handling itself.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

/// Errors raised while normalizing one event
#[derive(Debug, Error)]
pub enum NormalizeError {
    /// Payload malformed (missing actor/verb/object). Permanent.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Actor fragment has none of the four identifying shapes. Permanent.
    #[error("No resolvable actor identity: {0}")]
    Identity(String),

    /// Pool exhausted or storage call timed out. Transient, retry with backoff.
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Concurrent dimension-row race lost. Transient, retry immediately.
    #[error("Dimension conflict: {0}")]
    ConflictRetry(String),

    /// The per-event transaction rolled back. Transient, re-driven by the reconciler.
    #[error("Partial write aborted: {0}")]
    PartialWriteAborted(String),

    /// Other storage error. Transient.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl NormalizeError {
    /// Permanent failures are dead-lettered and never retried
    pub fn is_permanent(&self) -> bool {
        matches!(self, NormalizeError::Validation(_) | NormalizeError::Identity(_))
    }

    /// Classify a storage error raised inside the per-event transaction
    pub fn from_write_error(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                NormalizeError::ResourceExhausted(err.to_string())
            }
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                NormalizeError::ConflictRetry(err.to_string())
            }
            sqlx::Error::Database(db_err) if db_err.is_check_violation() => {
                NormalizeError::PartialWriteAborted(err.to_string())
            }
            _ => NormalizeError::Database(err),
        }
    }
}

/// Outcome of normalizing one event
///
/// Explicit sum type instead of retry loops buried in error handlers: the
/// worker loop and the reconciler route each outcome themselves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NormalizationResult {
    /// Statement and children written in one transaction
    Normalized { statement_id: Uuid },

    /// Statement already present; redelivery treated as success, nothing written
    AlreadyNormalized { statement_id: Uuid },

    /// Never retried; goes to the dead-letter log with this reason
    PermanentFailure { reason: String },

    /// Retried by requeue or by the next reconciler pass. `backoff` marks
    /// exhaustion-class failures that should not be retried immediately.
    TransientFailure { reason: String, backoff: bool },
}

impl NormalizationResult {
    pub fn from_error(err: NormalizeError) -> Self {
        if err.is_permanent() {
            NormalizationResult::PermanentFailure {
                reason: err.to_string(),
            }
        } else {
            let backoff = matches!(err, NormalizeError::ResourceExhausted(_));
            NormalizationResult::TransientFailure {
                reason: err.to_string(),
                backoff,
            }
        }
    }

    /// Normalized or AlreadyNormalized
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            NormalizationResult::Normalized { .. } | NormalizationResult::AlreadyNormalized { .. }
        )
    }
}

/// API error type for the status surface
///
/// The endpoints are read-only queries, so storage failure is the only
/// error the handlers produce.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let ApiError::Database(err) = self;

        let body = Json(json!({
            "error": {
                "code": "DATABASE_ERROR",
                "message": err.to_string(),
            }
        }));

        (StatusCode::INTERNAL_SERVER_ERROR, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permanence_classification() {
        assert!(NormalizeError::Validation("no verb".into()).is_permanent());
        assert!(NormalizeError::Identity("no identifier".into()).is_permanent());
        assert!(!NormalizeError::ResourceExhausted("pool".into()).is_permanent());
        assert!(!NormalizeError::ConflictRetry("actor race".into()).is_permanent());
        assert!(!NormalizeError::PartialWriteAborted("rollback".into()).is_permanent());
    }

    #[test]
    fn result_from_error_routes_by_permanence() {
        let permanent = NormalizationResult::from_error(NormalizeError::Validation("x".into()));
        assert!(matches!(permanent, NormalizationResult::PermanentFailure { .. }));
        assert!(!permanent.is_success());

        let transient =
            NormalizationResult::from_error(NormalizeError::ConflictRetry("y".into()));
        assert!(matches!(transient, NormalizationResult::TransientFailure { .. }));
    }

    #[test]
    fn resource_exhaustion_requests_backoff() {
        let exhausted = NormalizationResult::from_error(NormalizeError::ResourceExhausted(
            "pool timed out".into(),
        ));
        assert!(matches!(
            exhausted,
            NormalizationResult::TransientFailure { backoff: true, .. }
        ));

        // Races and aborted transactions retry immediately
        let conflict = NormalizationResult::from_error(NormalizeError::ConflictRetry("race".into()));
        assert!(matches!(
            conflict,
            NormalizationResult::TransientFailure { backoff: false, .. }
        ));
        let aborted = NormalizationResult::from_error(NormalizeError::PartialWriteAborted(
            "rollback".into(),
        ));
        assert!(matches!(
            aborted,
            NormalizationResult::TransientFailure { backoff: false, .. }
        ));
    }

    #[test]
    fn already_normalized_counts_as_success() {
        let result = NormalizationResult::AlreadyNormalized {
            statement_id: Uuid::new_v4(),
        };
        assert!(result.is_success());
    }
}
