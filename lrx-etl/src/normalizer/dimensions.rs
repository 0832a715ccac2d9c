//! Conflict-tolerant dimension upserts
//!
//! Two workers first-seeing the same new actor must both end up with the
//! same row: `INSERT ... ON CONFLICT ... RETURNING` resolves the race in
//! one statement, without locking the table. Rows are never deleted while
//! referenced, so a returned id stays valid for the life of the process.

use crate::identity::{ActivityIdentity, ActorIdentity};
use sqlx::SqliteConnection;

/// Insert-or-fetch the actor row for a natural key
///
/// Display metadata refreshes when the fragment carries it; an absent
/// display name never clobbers a stored one.
pub async fn upsert_actor(
    conn: &mut SqliteConnection,
    identity: &ActorIdentity,
) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar(
        "INSERT INTO actors (natural_key, display_name, kind)
         VALUES (?, ?, ?)
         ON CONFLICT(natural_key) DO UPDATE SET
             display_name = COALESCE(excluded.display_name, actors.display_name)
         RETURNING actor_id",
    )
    .bind(&identity.natural_key)
    .bind(&identity.display_name)
    .bind(&identity.kind)
    .fetch_one(conn)
    .await
}

/// Insert-or-fetch the verb row for an IRI
pub async fn upsert_verb(conn: &mut SqliteConnection, iri: &str) -> Result<i64, sqlx::Error> {
    // The no-op DO UPDATE keeps RETURNING populated on the conflict path
    sqlx::query_scalar(
        "INSERT INTO verbs (iri) VALUES (?)
         ON CONFLICT(iri) DO UPDATE SET iri = excluded.iri
         RETURNING verb_id",
    )
    .bind(iri)
    .fetch_one(conn)
    .await
}

/// Insert-or-fetch the activity row for an IRI
///
/// Name and description are last-write-wins: definitions are stable
/// upstream but occasionally corrected, and the freshest sighting should
/// win without erasing fields the new fragment omits.
pub async fn upsert_activity(
    conn: &mut SqliteConnection,
    identity: &ActivityIdentity,
) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar(
        "INSERT INTO activities (iri, name, description)
         VALUES (?, ?, ?)
         ON CONFLICT(iri) DO UPDATE SET
             name = COALESCE(excluded.name, activities.name),
             description = COALESCE(excluded.description, activities.description)
         RETURNING activity_id",
    )
    .bind(&identity.iri)
    .bind(&identity.name)
    .bind(&identity.description)
    .fetch_one(conn)
    .await
}
