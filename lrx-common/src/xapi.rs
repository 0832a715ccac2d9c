//! xAPI statement document types
//!
//! Serde model for the one event shape LRX ingests: `actor` performed
//! `verb` on `object`, with optional `result` and `context`. Fields that
//! the xAPI spec requires are still modeled as `Option` here so that the
//! normalizer can reject malformed payloads with a precise reason instead
//! of an opaque deserialization error.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Language-tagged display map, e.g. `{"en-US": "completed"}`
///
/// BTreeMap keeps iteration deterministic when no preferred tag matches.
pub type LanguageMap = BTreeMap<String, String>;

/// One xAPI statement as delivered by the ingestion gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XapiStatement {
    /// Statement id; becomes `event_id` / `statement_id`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<Agent>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verb: Option<VerbRef>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object: Option<ActivityObject>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ResultPayload>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<ContextPayload>,

    /// Time the activity occurred, as reported by the source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<chrono::DateTime<chrono::Utc>>,
}

/// The learner (or group) that performed the activity
///
/// Exactly one of the four inverse-functional identifiers is expected:
/// `mbox`, `mbox_sha1sum`, `openid`, or `account`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    #[serde(rename = "objectType", default, skip_serializing_if = "Option::is_none")]
    pub object_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// `mailto:` IRI
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mbox: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mbox_sha1sum: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub openid: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<Account>,
}

/// Account-scoped identity (`homePage` + `name`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    #[serde(rename = "homePage", default, skip_serializing_if = "Option::is_none")]
    pub home_page: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Verb reference: IRI plus optional display map
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerbRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<LanguageMap>,
}

/// Statement object; LRX only handles Activity objects
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityObject {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(rename = "objectType", default, skip_serializing_if = "Option::is_none")]
    pub object_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub definition: Option<ActivityDefinition>,
}

/// Activity metadata, corrected upstream occasionally (last write wins)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<LanguageMap>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<LanguageMap>,

    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub activity_type: Option<String>,
}

/// Outcome of the activity (0 or 1 per statement)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<Score>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
}

/// Score block; `scaled` is constrained to [-1.0, 1.0] by the xAPI spec
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Score {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scaled: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

/// Statement context; LRX persists only the extensions map
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registration: Option<Uuid>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<BTreeMap<String, serde_json::Value>>,
}

/// Collapse a language map to one display string
///
/// Preference order: "en", then "en-US", then the first entry.
pub fn preferred_display(map: &LanguageMap) -> Option<&str> {
    map.get("en")
        .or_else(|| map.get("en-US"))
        .map(String::as_str)
        .or_else(|| map.values().next().map(String::as_str))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_json() -> &'static str {
        r#"{
            "id": "6d801428-4a4f-41f5-a2c7-b1e6c3e24c87",
            "actor": {
                "objectType": "Agent",
                "name": "Ada Learner",
                "mbox": "mailto:ada@example.com"
            },
            "verb": {
                "id": "http://adlnet.gov/expapi/verbs/completed",
                "display": {"en-US": "completed"}
            },
            "object": {
                "id": "http://learning.example.com/lesson-1",
                "objectType": "Activity",
                "definition": {
                    "name": {"en-US": "Lesson 1"},
                    "description": {"en-US": "Introduction"}
                }
            },
            "result": {
                "completion": true,
                "success": true,
                "score": {"scaled": 0.9, "raw": 90.0}
            },
            "context": {
                "extensions": {
                    "http://learning.example.com/ext/device": "tablet"
                }
            },
            "timestamp": "2024-03-01T10:15:00Z"
        }"#
    }

    #[test]
    fn parses_complete_statement() {
        let stmt: XapiStatement = serde_json::from_str(sample_json()).unwrap();
        assert_eq!(
            stmt.actor.as_ref().unwrap().mbox.as_deref(),
            Some("mailto:ada@example.com")
        );
        assert_eq!(
            stmt.verb.as_ref().unwrap().id.as_deref(),
            Some("http://adlnet.gov/expapi/verbs/completed")
        );
        assert_eq!(
            stmt.object.as_ref().unwrap().id.as_deref(),
            Some("http://learning.example.com/lesson-1")
        );
        let result = stmt.result.as_ref().unwrap();
        assert_eq!(result.completion, Some(true));
        assert_eq!(result.score.as_ref().unwrap().scaled, Some(0.9));
        let extensions = stmt
            .context
            .as_ref()
            .unwrap()
            .extensions
            .as_ref()
            .unwrap();
        assert_eq!(extensions.len(), 1);
    }

    #[test]
    fn missing_fields_deserialize_as_none() {
        let stmt: XapiStatement = serde_json::from_str(r#"{"actor": {}}"#).unwrap();
        assert!(stmt.id.is_none());
        assert!(stmt.verb.is_none());
        assert!(stmt.object.is_none());
        let actor = stmt.actor.unwrap();
        assert!(actor.mbox.is_none() && actor.account.is_none());
    }

    #[test]
    fn preferred_display_order() {
        let mut map = LanguageMap::new();
        map.insert("de".to_string(), "abgeschlossen".to_string());
        assert_eq!(preferred_display(&map), Some("abgeschlossen"));

        map.insert("en-US".to_string(), "completed (US)".to_string());
        assert_eq!(preferred_display(&map), Some("completed (US)"));

        map.insert("en".to_string(), "completed".to_string());
        assert_eq!(preferred_display(&map), Some("completed"));
    }
}
