//! Identity resolution
//!
//! Maps actor, verb and activity fragments to canonical natural keys so
//! the same learner serialized with different casing or spacing lands on
//! one dimension row. Resolution is a pure function; the bounded cache in
//! this module only short-circuits the upsert for fragments with no
//! metadata to refresh (dimension rows are never deleted, so a cached id
//! stays valid).

use crate::error::NormalizeError;
use lrx_common::xapi::{ActivityObject, Agent, VerbRef};
use std::collections::HashMap;
use std::sync::Mutex;

/// Resolved actor identity: natural key plus display metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActorIdentity {
    pub natural_key: String,
    pub display_name: Option<String>,
    pub kind: String,
}

/// Resolved activity identity: IRI plus refreshable display metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityIdentity {
    pub iri: String,
    pub name: Option<String>,
    pub description: Option<String>,
}

/// Derive the canonical natural key for an actor fragment
///
/// Identifier precedence: `mbox` > `mbox_sha1sum` > `openid` > `account`.
/// All keys are lower-cased and trimmed; account names additionally have
/// internal whitespace collapsed to a single underscore. Numeric suffixes
/// inside a name ("Anonymous Learner 12") are kept verbatim; re-parsing
/// them risks colliding distinct anonymous learners with adjacent numbers.
pub fn resolve_actor(agent: &Agent) -> Result<ActorIdentity, NormalizeError> {
    let natural_key = if let Some(mbox) = non_empty(agent.mbox.as_deref()) {
        format!("mbox:{}", normalize(mbox))
    } else if let Some(sha1) = non_empty(agent.mbox_sha1sum.as_deref()) {
        format!("mbox_sha1sum:{}", normalize(sha1))
    } else if let Some(openid) = non_empty(agent.openid.as_deref()) {
        format!("openid:{}", normalize(openid))
    } else if let Some(account) = &agent.account {
        let home_page = non_empty(account.home_page.as_deref());
        let name = non_empty(account.name.as_deref());
        match (home_page, name) {
            (Some(home_page), Some(name)) => format!(
                "account:{}|{}",
                normalize(home_page),
                collapse_whitespace(&normalize(name))
            ),
            _ => {
                return Err(NormalizeError::Identity(
                    "account identifier requires both homePage and name".to_string(),
                ))
            }
        }
    } else {
        return Err(NormalizeError::Identity(
            "actor has no mbox, mbox_sha1sum, openid or account identifier".to_string(),
        ));
    };

    Ok(ActorIdentity {
        natural_key,
        display_name: agent.name.as_ref().map(|n| n.trim().to_string()),
        kind: agent
            .object_type
            .clone()
            .unwrap_or_else(|| "Agent".to_string()),
    })
}

/// Derive the canonical key for a verb fragment (IRI, trimmed)
///
/// Verb IRIs are already globally unique; no further normalization.
pub fn resolve_verb(verb: &VerbRef) -> Result<String, NormalizeError> {
    match non_empty(verb.id.as_deref()) {
        Some(iri) => Ok(iri.trim().to_string()),
        None => Err(NormalizeError::Validation("verb.id is missing".to_string())),
    }
}

/// Derive the canonical identity for an activity object
///
/// Name/description come from the definition's language map; a later
/// sighting with fresh metadata overwrites the stored values (definitions
/// are stable upstream but occasionally corrected).
pub fn resolve_activity(object: &ActivityObject) -> Result<ActivityIdentity, NormalizeError> {
    let iri = match non_empty(object.id.as_deref()) {
        Some(iri) => iri.trim().to_string(),
        None => return Err(NormalizeError::Validation("object.id is missing".to_string())),
    };

    let (name, description) = match &object.definition {
        Some(def) => (
            def.name
                .as_ref()
                .and_then(lrx_common::xapi::preferred_display)
                .map(str::to_string),
            def.description
                .as_ref()
                .and_then(lrx_common::xapi::preferred_display)
                .map(str::to_string),
        ),
        None => (None, None),
    };

    Ok(ActivityIdentity {
        iri,
        name,
        description,
    })
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn normalize(value: &str) -> String {
    value.trim().to_lowercase()
}

/// Collapse every run of internal whitespace to a single underscore
fn collapse_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join("_")
}

/// Bounded natural-key to row-id cache
///
/// Shared mutable caches were a recurring source of duplicate-learner bugs
/// upstream; this one is purely local and evicts wholesale at capacity.
/// Every lookup miss falls through to the conflict-tolerant upsert, which
/// is what actually guarantees dedup. Callers consult it only for
/// fragments carrying no refreshable metadata; anything with a display
/// name or definition goes straight to the store so last write wins.
pub struct IdentityCache {
    entries: Mutex<HashMap<String, i64>>,
    capacity: usize,
}

impl IdentityCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            capacity,
        }
    }

    pub fn get(&self, key: &str) -> Option<i64> {
        if self.capacity == 0 {
            return None;
        }
        self.entries.lock().ok()?.get(key).copied()
    }

    pub fn insert(&self, key: String, id: i64) {
        if self.capacity == 0 {
            return;
        }
        if let Ok(mut entries) = self.entries.lock() {
            if entries.len() >= self.capacity {
                entries.clear();
            }
            entries.insert(key, id);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
