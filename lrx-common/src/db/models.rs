//! Row types for the raw store, normalized store and pipeline bookkeeping

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// One accepted event payload, exactly as received. Write-once.
#[derive(Debug, Clone, FromRow)]
pub struct RawEventRow {
    pub event_id: String,
    pub received_at: DateTime<Utc>,
    pub payload: String,
    pub source: String,
}

/// Deduplicated learner identity
#[derive(Debug, Clone, FromRow)]
pub struct ActorRow {
    pub actor_id: i64,
    pub natural_key: String,
    pub display_name: Option<String>,
    pub kind: String,
}

/// Deduplicated verb, keyed by IRI
#[derive(Debug, Clone, FromRow)]
pub struct VerbRow {
    pub verb_id: i64,
    pub iri: String,
}

/// Deduplicated activity, keyed by IRI; name/description refresh on sight
#[derive(Debug, Clone, FromRow)]
pub struct ActivityRow {
    pub activity_id: i64,
    pub iri: String,
    pub name: Option<String>,
    pub description: Option<String>,
}

/// The normalized fact row; `statement_id` equals the raw `event_id`
#[derive(Debug, Clone, FromRow)]
pub struct StatementRow {
    pub statement_id: String,
    pub actor_id: i64,
    pub verb_id: i64,
    pub activity_id: i64,
    pub timestamp: Option<DateTime<Utc>>,
    pub stored_at: DateTime<Utc>,
    pub source: Option<String>,
}

/// Outcome child row (0 or 1 per statement)
#[derive(Debug, Clone, FromRow)]
pub struct ResultRow {
    pub statement_id: String,
    pub completion: Option<bool>,
    pub success: Option<bool>,
    pub score_raw: Option<f64>,
    pub score_scaled: Option<f64>,
    pub response: Option<String>,
}

/// Context-extension child row (0..N per statement)
#[derive(Debug, Clone, FromRow)]
pub struct ContextExtensionRow {
    pub statement_id: String,
    pub extension_key: String,
    pub extension_value: String,
}

/// Permanently failed event, held durably with its last payload
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct DeadLetterRow {
    pub event_id: String,
    pub reason: String,
    pub first_seen: DateTime<Utc>,
    pub attempts: i64,
    pub last_payload: Option<String>,
}

/// Drift between raw and normalized populations over one trailing window
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DriftReport {
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub raw_count: i64,
    pub normalized_count: i64,
    pub gap_count: i64,
    pub dead_letter_count: i64,
}

impl DriftReport {
    /// True when every raw event in the window is either normalized or
    /// accounted for in the dead-letter log
    pub fn converged(&self) -> bool {
        self.gap_count == 0
    }
}
