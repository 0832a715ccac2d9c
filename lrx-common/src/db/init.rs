//! Database initialization
//!
//! Opens (or creates) the LRX database, applies the PRAGMAs the pipeline
//! depends on, creates every table idempotently, and seeds default
//! settings. Safe to call on every startup.

use crate::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::info;

/// Initialize database connection pool and create tables if needed
///
/// Pool bounds come from the config file because the settings table does
/// not exist until this function has run.
pub async fn init_database(
    db_path: &Path,
    max_connections: u32,
    min_connections: u32,
) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // mode=rwc creates the database file on first run
    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .min_connections(min_connections)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    configure_pragmas(&pool).await?;
    create_all_tables(&pool).await?;
    init_default_settings(&pool).await?;

    // Re-apply busy timeout from the now-seeded settings table
    let timeout_ms: i64 = sqlx::query_scalar(
        "SELECT CAST(value AS INTEGER) FROM settings WHERE key = 'etl_database_busy_timeout_ms'",
    )
    .fetch_optional(&pool)
    .await?
    .unwrap_or(5000);

    let pragma_sql = format!("PRAGMA busy_timeout = {}", timeout_ms);
    sqlx::query(&pragma_sql).execute(&pool).await?;

    Ok(pool)
}

async fn configure_pragmas(pool: &SqlitePool) -> Result<()> {
    sqlx::query("PRAGMA foreign_keys = ON").execute(pool).await?;

    // WAL allows concurrent readers while one writer commits; the worker
    // pool and the reconciler write from separate connections
    sqlx::query("PRAGMA journal_mode = WAL").execute(pool).await?;

    sqlx::query("PRAGMA busy_timeout = 5000").execute(pool).await?;

    Ok(())
}

/// Create every table (idempotent)
pub async fn create_all_tables(pool: &SqlitePool) -> Result<()> {
    create_schema_version_table(pool).await?;
    create_settings_table(pool).await?;

    // Raw store
    create_raw_events_table(pool).await?;

    // Normalized store: dimensions, fact, children
    create_actors_table(pool).await?;
    create_verbs_table(pool).await?;
    create_activities_table(pool).await?;
    create_statements_table(pool).await?;
    create_results_table(pool).await?;
    create_context_extensions_table(pool).await?;

    // Durable queue
    create_queue_messages_table(pool).await?;
    create_queue_deliveries_table(pool).await?;
    create_queue_watermarks_table(pool).await?;

    // Dead letters and reconciliation bookkeeping
    create_dead_letters_table(pool).await?;
    create_reconcile_attempts_table(pool).await?;
    create_drift_reports_table(pool).await?;

    Ok(())
}

async fn create_schema_version_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_settings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_raw_events_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS raw_events (
            event_id TEXT PRIMARY KEY,
            received_at TIMESTAMP NOT NULL,
            payload TEXT NOT NULL,
            source TEXT NOT NULL DEFAULT 'gateway'
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_raw_events_received_at ON raw_events(received_at)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_actors_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS actors (
            actor_id INTEGER PRIMARY KEY AUTOINCREMENT,
            natural_key TEXT NOT NULL UNIQUE,
            display_name TEXT,
            kind TEXT NOT NULL DEFAULT 'Agent'
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_verbs_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS verbs (
            verb_id INTEGER PRIMARY KEY AUTOINCREMENT,
            iri TEXT NOT NULL UNIQUE
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_activities_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS activities (
            activity_id INTEGER PRIMARY KEY AUTOINCREMENT,
            iri TEXT NOT NULL UNIQUE,
            name TEXT,
            description TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_statements_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS statements (
            statement_id TEXT PRIMARY KEY,
            actor_id INTEGER NOT NULL REFERENCES actors(actor_id),
            verb_id INTEGER NOT NULL REFERENCES verbs(verb_id),
            activity_id INTEGER NOT NULL REFERENCES activities(activity_id),
            timestamp TIMESTAMP,
            stored_at TIMESTAMP NOT NULL,
            source TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_statements_actor ON statements(actor_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_statements_stored_at ON statements(stored_at)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_results_table(pool: &SqlitePool) -> Result<()> {
    // score_scaled CHECK mirrors the xAPI scaled-score range; a violating
    // payload aborts the whole per-event transaction
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS results (
            statement_id TEXT PRIMARY KEY REFERENCES statements(statement_id),
            completion INTEGER,
            success INTEGER,
            score_raw REAL,
            score_scaled REAL CHECK (score_scaled IS NULL OR (score_scaled >= -1.0 AND score_scaled <= 1.0)),
            response TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_context_extensions_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS context_extensions (
            statement_id TEXT NOT NULL REFERENCES statements(statement_id),
            extension_key TEXT NOT NULL,
            extension_value TEXT NOT NULL,
            PRIMARY KEY (statement_id, extension_key)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_queue_messages_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS queue_messages (
            message_id INTEGER PRIMARY KEY AUTOINCREMENT,
            message_key TEXT NOT NULL,
            body TEXT NOT NULL,
            enqueued_at TIMESTAMP NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_queue_deliveries_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS queue_deliveries (
            consumer_group TEXT NOT NULL,
            message_id INTEGER NOT NULL REFERENCES queue_messages(message_id),
            state TEXT NOT NULL DEFAULT 'available',
            attempts INTEGER NOT NULL DEFAULT 0,
            lease_expires_at TIMESTAMP,
            PRIMARY KEY (consumer_group, message_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_queue_deliveries_state ON queue_deliveries(consumer_group, state)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_queue_watermarks_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS queue_watermarks (
            consumer_group TEXT PRIMARY KEY,
            last_seen INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_dead_letters_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS dead_letters (
            event_id TEXT PRIMARY KEY,
            reason TEXT NOT NULL,
            first_seen TIMESTAMP NOT NULL,
            attempts INTEGER NOT NULL DEFAULT 1,
            last_payload TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_reconcile_attempts_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS reconcile_attempts (
            event_id TEXT PRIMARY KEY,
            attempts INTEGER NOT NULL DEFAULT 0,
            last_attempt_at TIMESTAMP NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_drift_reports_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS drift_reports (
            report_id INTEGER PRIMARY KEY AUTOINCREMENT,
            window_start TIMESTAMP NOT NULL,
            window_end TIMESTAMP NOT NULL,
            raw_count INTEGER NOT NULL,
            normalized_count INTEGER NOT NULL,
            gap_count INTEGER NOT NULL,
            dead_letter_count INTEGER NOT NULL,
            created_at TIMESTAMP NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Seed default settings (INSERT OR IGNORE; existing values win)
pub async fn init_default_settings(pool: &SqlitePool) -> Result<()> {
    let defaults: &[(&str, &str)] = &[
        ("etl_queue_batch_size", "50"),
        ("etl_queue_poll_timeout_ms", "1000"),
        ("etl_batch_timeout_ms", "30000"),
        ("etl_worker_count", "4"),
        ("etl_reconcile_interval_secs", "300"),
        ("etl_reconcile_window_secs", "86400"),
        ("etl_dead_letter_max_attempts", "5"),
        ("etl_database_busy_timeout_ms", "5000"),
        ("etl_identity_cache_capacity", "4096"),
    ];

    for (key, value) in defaults {
        sqlx::query("INSERT OR IGNORE INTO settings (key, value) VALUES (?, ?)")
            .bind(key)
            .bind(value)
            .execute(pool)
            .await?;
    }

    Ok(())
}
