//! Typed access to the settings table and the runtime parameter set

use crate::Result;
use sqlx::SqlitePool;

/// Read an integer setting, falling back to a default when absent or unparsable
pub async fn get_setting_i64(pool: &SqlitePool, key: &str, default: i64) -> Result<i64> {
    let value: Option<String> = sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(pool)
        .await?;

    Ok(value
        .and_then(|v| v.parse::<i64>().ok())
        .unwrap_or(default))
}

/// Write a setting (upsert)
pub async fn set_setting(pool: &SqlitePool, key: &str, value: &str) -> Result<()> {
    sqlx::query(
        "INSERT INTO settings (key, value) VALUES (?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
    )
    .bind(key)
    .bind(value)
    .execute(pool)
    .await?;

    Ok(())
}

/// Runtime tunables for the ETL pipeline
///
/// Loaded once at startup from the settings table. Workers and the
/// reconciler hold a plain copy; there is no shared mutable parameter
/// state at runtime.
#[derive(Debug, Clone)]
pub struct EtlParams {
    /// Max events leased from the queue per receive call
    pub queue_batch_size: usize,
    /// How long a receive call waits for messages before returning empty
    pub queue_poll_timeout_ms: u64,
    /// Abandon a batch (and let leases expire) after this long
    pub batch_timeout_ms: u64,
    /// Number of concurrent normalizer workers
    pub worker_count: usize,
    /// Seconds between reconciler passes
    pub reconcile_interval_secs: u64,
    /// Trailing window the reconciler scans, in seconds
    pub reconcile_window_secs: u64,
    /// Re-drive attempts before a transiently failing event is dead-lettered
    pub dead_letter_max_attempts: u32,
    /// Bounded identity-cache capacity (0 disables the cache)
    pub identity_cache_capacity: usize,
}

impl Default for EtlParams {
    fn default() -> Self {
        Self {
            queue_batch_size: 50,
            queue_poll_timeout_ms: 1000,
            batch_timeout_ms: 30_000,
            worker_count: 4,
            reconcile_interval_secs: 300,
            reconcile_window_secs: 86_400,
            dead_letter_max_attempts: 5,
            identity_cache_capacity: 4096,
        }
    }
}

impl EtlParams {
    /// Load parameters from the settings table, using defaults for gaps
    pub async fn load(pool: &SqlitePool) -> Result<Self> {
        let defaults = Self::default();

        Ok(Self {
            queue_batch_size: get_setting_i64(
                pool,
                "etl_queue_batch_size",
                defaults.queue_batch_size as i64,
            )
            .await?
            .max(1) as usize,
            queue_poll_timeout_ms: get_setting_i64(
                pool,
                "etl_queue_poll_timeout_ms",
                defaults.queue_poll_timeout_ms as i64,
            )
            .await?
            .max(1) as u64,
            batch_timeout_ms: get_setting_i64(
                pool,
                "etl_batch_timeout_ms",
                defaults.batch_timeout_ms as i64,
            )
            .await?
            .max(1) as u64,
            worker_count: get_setting_i64(pool, "etl_worker_count", defaults.worker_count as i64)
                .await?
                .max(1) as usize,
            reconcile_interval_secs: get_setting_i64(
                pool,
                "etl_reconcile_interval_secs",
                defaults.reconcile_interval_secs as i64,
            )
            .await?
            .max(1) as u64,
            reconcile_window_secs: get_setting_i64(
                pool,
                "etl_reconcile_window_secs",
                defaults.reconcile_window_secs as i64,
            )
            .await?
            .max(1) as u64,
            dead_letter_max_attempts: get_setting_i64(
                pool,
                "etl_dead_letter_max_attempts",
                defaults.dead_letter_max_attempts as i64,
            )
            .await?
            .max(1) as u32,
            identity_cache_capacity: get_setting_i64(
                pool,
                "etl_identity_cache_capacity",
                defaults.identity_cache_capacity as i64,
            )
            .await?
            .max(0) as usize,
        })
    }
}
