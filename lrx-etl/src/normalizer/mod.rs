//! Normalizer
//!
//! Converts one loosely-structured event payload into its normalized rows:
//! resolve/insert the three dimension rows, insert the statement fact row,
//! then the result and context-extension children, all inside a single
//! transaction. Either every row for the event becomes visible together or
//! none do. A redelivered statement id is a success-no-op, which is what
//! makes at-least-once queue delivery safe.

pub mod dimensions;

use crate::error::{NormalizationResult, NormalizeError};
use crate::identity::{self, ActivityIdentity, ActorIdentity, IdentityCache};
use chrono::Utc;
use lrx_common::xapi::XapiStatement;
use sqlx::SqlitePool;
use uuid::Uuid;

pub struct Normalizer {
    pool: SqlitePool,
    actor_cache: IdentityCache,
    verb_cache: IdentityCache,
    activity_cache: IdentityCache,
}

/// Identities resolved from a statement before any storage work
#[derive(Debug)]
struct ResolvedEvent {
    event_id: Uuid,
    actor: ActorIdentity,
    verb_iri: String,
    activity: ActivityIdentity,
}

impl Normalizer {
    /// `cache_capacity` bounds each local dimension cache; 0 disables caching
    pub fn new(pool: SqlitePool, cache_capacity: usize) -> Self {
        Self {
            pool,
            actor_cache: IdentityCache::new(cache_capacity),
            verb_cache: IdentityCache::new(cache_capacity),
            activity_cache: IdentityCache::new(cache_capacity),
        }
    }

    /// Normalize a raw JSON payload (queue body or raw-store row)
    pub async fn normalize_payload(&self, payload: &str, source: &str) -> NormalizationResult {
        match serde_json::from_str::<XapiStatement>(payload) {
            Ok(statement) => self.normalize(&statement, source).await,
            Err(e) => NormalizationResult::PermanentFailure {
                reason: format!("unparseable payload: {}", e),
            },
        }
    }

    /// Normalize one parsed statement
    pub async fn normalize(&self, statement: &XapiStatement, source: &str) -> NormalizationResult {
        match self.try_normalize(statement, source).await {
            Ok(result) => result,
            Err(e) => NormalizationResult::from_error(e),
        }
    }

    async fn try_normalize(
        &self,
        statement: &XapiStatement,
        source: &str,
    ) -> Result<NormalizationResult, NormalizeError> {
        let resolved = validate(statement)?;
        let statement_id = resolved.event_id.to_string();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(NormalizeError::from_write_error)?;

        // Dimension rows first; conflict-tolerant, so concurrent workers
        // first-seeing the same key converge on one row. A cache hit only
        // skips the upsert for fragments with no metadata: a display name
        // or definition must reach the store to refresh the row.
        let cached_actor = if resolved.actor.display_name.is_none() {
            self.actor_cache.get(&resolved.actor.natural_key)
        } else {
            None
        };
        let actor_id = match cached_actor {
            Some(id) => id,
            None => dimensions::upsert_actor(&mut *tx, &resolved.actor)
                .await
                .map_err(NormalizeError::from_write_error)?,
        };

        let cached_verb = self.verb_cache.get(&resolved.verb_iri);
        let verb_id = match cached_verb {
            Some(id) => id,
            None => dimensions::upsert_verb(&mut *tx, &resolved.verb_iri)
                .await
                .map_err(NormalizeError::from_write_error)?,
        };

        let cached_activity =
            if resolved.activity.name.is_none() && resolved.activity.description.is_none() {
                self.activity_cache.get(&resolved.activity.iri)
            } else {
                None
            };
        let activity_id = match cached_activity {
            Some(id) => id,
            None => dimensions::upsert_activity(&mut *tx, &resolved.activity)
                .await
                .map_err(NormalizeError::from_write_error)?,
        };

        // Fact row: insert-if-absent. A second delivery of the same event
        // must neither duplicate nor overwrite stored_at.
        let inserted = sqlx::query(
            "INSERT INTO statements (statement_id, actor_id, verb_id, activity_id, timestamp, stored_at, source)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(statement_id) DO NOTHING",
        )
        .bind(&statement_id)
        .bind(actor_id)
        .bind(verb_id)
        .bind(activity_id)
        .bind(statement.timestamp)
        .bind(Utc::now())
        .bind(source)
        .execute(&mut *tx)
        .await
        .map_err(NormalizeError::from_write_error)?;

        if inserted.rows_affected() == 0 {
            // Redelivery: the first write owns the statement and its
            // children. Roll back the metadata refreshes and report success.
            tx.rollback().await.ok();
            return Ok(NormalizationResult::AlreadyNormalized {
                statement_id: resolved.event_id,
            });
        }

        if let Some(result) = &statement.result {
            let (score_raw, score_scaled) = match &result.score {
                Some(score) => (score.raw, score.scaled),
                None => (None, None),
            };
            sqlx::query(
                "INSERT INTO results (statement_id, completion, success, score_raw, score_scaled, response)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(&statement_id)
            .bind(result.completion)
            .bind(result.success)
            .bind(score_raw)
            .bind(score_scaled)
            .bind(&result.response)
            .execute(&mut *tx)
            .await
            .map_err(NormalizeError::from_write_error)?;
        }

        if let Some(extensions) = statement
            .context
            .as_ref()
            .and_then(|c| c.extensions.as_ref())
        {
            for (key, value) in extensions {
                let Some(stored) = extension_value_text(value) else {
                    continue;
                };
                sqlx::query(
                    "INSERT INTO context_extensions (statement_id, extension_key, extension_value)
                     VALUES (?, ?, ?)",
                )
                .bind(&statement_id)
                .bind(key)
                .bind(stored)
                .execute(&mut *tx)
                .await
                .map_err(NormalizeError::from_write_error)?;
            }
        }

        tx.commit().await.map_err(NormalizeError::from_write_error)?;

        // Cache only after commit: an id from a rolled-back insert would be
        // stale the moment the transaction aborted
        if cached_actor.is_none() {
            self.actor_cache
                .insert(resolved.actor.natural_key.clone(), actor_id);
        }
        if cached_verb.is_none() {
            self.verb_cache.insert(resolved.verb_iri.clone(), verb_id);
        }
        if cached_activity.is_none() {
            self.activity_cache
                .insert(resolved.activity.iri.clone(), activity_id);
        }

        Ok(NormalizationResult::Normalized {
            statement_id: resolved.event_id,
        })
    }
}

/// Minimal shape validation plus identity resolution
///
/// Everything that can permanently fail does so here, before any storage
/// round-trip, so dead-letter reasons stay precise.
fn validate(statement: &XapiStatement) -> Result<ResolvedEvent, NormalizeError> {
    let event_id = statement
        .id
        .ok_or_else(|| NormalizeError::Validation("statement id is missing".to_string()))?;

    let agent = statement
        .actor
        .as_ref()
        .ok_or_else(|| NormalizeError::Validation("actor is missing".to_string()))?;
    let actor = identity::resolve_actor(agent)?;

    let verb = statement
        .verb
        .as_ref()
        .ok_or_else(|| NormalizeError::Validation("verb is missing".to_string()))?;
    let verb_iri = identity::resolve_verb(verb)?;

    let object = statement
        .object
        .as_ref()
        .ok_or_else(|| NormalizeError::Validation("object is missing".to_string()))?;
    if let Some(object_type) = &object.object_type {
        if object_type != "Activity" {
            return Err(NormalizeError::Validation(format!(
                "unsupported object type: {}",
                object_type
            )));
        }
    }
    let activity = identity::resolve_activity(object)?;

    Ok(ResolvedEvent {
        event_id,
        actor,
        verb_iri,
        activity,
    })
}

/// Extension values persist as text; empty and null values are skipped
fn extension_value_text(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) if s.trim().is_empty() => None,
        serde_json::Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn validate_rejects_missing_id() {
        let statement: XapiStatement =
            serde_json::from_value(json!({"actor": {"mbox": "mailto:a@x.com"}})).unwrap();
        let err = validate(&statement).unwrap_err();
        assert!(matches!(err, NormalizeError::Validation(_)));
    }

    #[test]
    fn validate_rejects_non_activity_object() {
        let statement: XapiStatement = serde_json::from_value(json!({
            "id": "11111111-1111-1111-1111-111111111111",
            "actor": {"mbox": "mailto:a@x.com"},
            "verb": {"id": "http://x/verbs/did"},
            "object": {"id": "http://x/other", "objectType": "StatementRef"}
        }))
        .unwrap();
        let err = validate(&statement).unwrap_err();
        assert!(matches!(err, NormalizeError::Validation(_)));
    }

    #[test]
    fn validate_routes_unidentifiable_actor_to_identity_error() {
        let statement: XapiStatement = serde_json::from_value(json!({
            "id": "11111111-1111-1111-1111-111111111111",
            "actor": {"name": "No Identifier"},
            "verb": {"id": "http://x/verbs/did"},
            "object": {"id": "http://x/lesson-1"}
        }))
        .unwrap();
        let err = validate(&statement).unwrap_err();
        assert!(matches!(err, NormalizeError::Identity(_)));
    }

    #[test]
    fn extension_values_skip_empty_and_null() {
        assert_eq!(extension_value_text(&json!(null)), None);
        assert_eq!(extension_value_text(&json!("  ")), None);
        assert_eq!(
            extension_value_text(&json!("tablet")),
            Some("tablet".to_string())
        );
        assert_eq!(
            extension_value_text(&json!({"nested": 1})),
            Some("{\"nested\":1}".to_string())
        );
        assert_eq!(extension_value_text(&json!(42)), Some("42".to_string()));
    }
}
