//! Database initialization
//!
//! Creates the database on first run and brings the schema up to date.
//! Initialization is idempotent; every `CREATE` is `IF NOT EXISTS` and
//! default settings are only written when absent.

use crate::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::{info, warn};

/// Initialize database connection pool and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .min_connections(2)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    configure_and_migrate(&pool).await?;

    Ok(pool)
}

/// Initialize an in-memory database (tests and ephemeral tooling)
///
/// Pinned to a single connection: every SQLite in-memory connection is its
/// own private database, so pooling more than one would shear the schema.
pub async fn init_in_memory() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .connect("sqlite::memory:")
        .await?;
    configure_and_migrate(&pool).await?;
    Ok(pool)
}

/// Apply pragmas, create all tables, and write default settings
async fn configure_and_migrate(pool: &SqlitePool) -> Result<()> {
    // Enable foreign keys
    sqlx::query("PRAGMA foreign_keys = ON").execute(pool).await?;

    // WAL allows concurrent readers with one writer; evaluations read
    // report history while commits write the audit trail
    sqlx::query("PRAGMA journal_mode = WAL").execute(pool).await?;

    sqlx::query("PRAGMA busy_timeout = 5000").execute(pool).await?;

    create_schema_version_table(pool).await?;
    create_settings_table(pool).await?;
    create_speakers_table(pool).await?;
    create_error_reports_table(pool).await?;
    create_bucket_changes_table(pool).await?;
    create_speaker_bucket_state_table(pool).await?;

    init_default_settings(pool).await?;

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

/// Create the settings table
///
/// Stores operational key-value tuning parameters.
pub async fn create_settings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the speakers table
///
/// Speakers are owned by the surrounding user-management service; this
/// table is a reference copy keyed by the same identifiers. Rows are
/// immutable once created.
pub async fn create_speakers_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS speakers (
            guid TEXT PRIMARY KEY,
            display_name TEXT NOT NULL,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the error_reports table
///
/// QA-submitted correction events, consumed read-only by the engine.
pub async fn create_error_reports_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS error_reports (
            guid TEXT PRIMARY KEY,
            speaker_id TEXT NOT NULL REFERENCES speakers(guid) ON DELETE CASCADE,
            original_text TEXT NOT NULL,
            corrected_text TEXT NOT NULL,
            severity TEXT NOT NULL DEFAULT 'medium'
                CHECK (severity IN ('low', 'medium', 'high', 'critical')),
            accepted INTEGER NOT NULL DEFAULT 0,
            submitted_at TIMESTAMP NOT NULL,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_error_reports_speaker ON error_reports(speaker_id, submitted_at)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the bucket_changes table
///
/// Append-only audit trail of tier changes. No code path updates or
/// deletes rows here; "current bucket" is derived from the newest record.
pub async fn create_bucket_changes_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS bucket_changes (
            guid TEXT PRIMARY KEY,
            speaker_id TEXT NOT NULL REFERENCES speakers(guid) ON DELETE CASCADE,
            previous_bucket TEXT NOT NULL
                CHECK (previous_bucket IN ('high_touch', 'medium_touch', 'low_touch', 'no_touch')),
            new_bucket TEXT NOT NULL
                CHECK (new_bucket IN ('high_touch', 'medium_touch', 'low_touch', 'no_touch')),
            confidence REAL NOT NULL CHECK (confidence >= 0.0 AND confidence <= 1.0),
            reason TEXT NOT NULL,
            snapshot TEXT,
            actor TEXT NOT NULL DEFAULT 'system',
            created_at TIMESTAMP NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_bucket_changes_speaker ON bucket_changes(speaker_id, created_at)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the speaker_bucket_state table
///
/// One row per speaker: the cached projection of the audit trail plus
/// evaluation bookkeeping. Invariant: current_bucket equals the
/// new_bucket of the speaker's newest bucket_changes record.
pub async fn create_speaker_bucket_state_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS speaker_bucket_state (
            speaker_id TEXT PRIMARY KEY REFERENCES speakers(guid) ON DELETE CASCADE,
            current_bucket TEXT NOT NULL
                CHECK (current_bucket IN ('high_touch', 'medium_touch', 'low_touch', 'no_touch')),
            entered_at TIMESTAMP NOT NULL,
            last_change_at TIMESTAMP,
            last_evaluated_at TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Initialize or update default settings
///
/// Ensures all operational tuning settings exist with default values and
/// resets NULL values back to their defaults.
async fn init_default_settings(pool: &SqlitePool) -> Result<()> {
    ensure_setting(pool, "evaluation_timeout_ms", "5000").await?;
    ensure_setting(pool, "sweep_concurrency", "4").await?;
    ensure_setting(pool, "event_bus_capacity", "256").await?;

    info!("Default settings initialized");
    Ok(())
}

/// Ensure a setting exists with the specified default value
///
/// If the setting doesn't exist, it will be created with the default.
/// If the setting exists but has a NULL value, it will be reset to the default.
pub async fn ensure_setting(pool: &SqlitePool, key: &str, default_value: &str) -> Result<()> {
    let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM settings WHERE key = ?)")
        .bind(key)
        .fetch_one(pool)
        .await?;

    if !exists {
        // Use INSERT OR IGNORE to handle concurrent initialization races;
        // multiple processes may pass the exists check simultaneously
        sqlx::query("INSERT OR IGNORE INTO settings (key, value) VALUES (?, ?)")
            .bind(key)
            .bind(default_value)
            .execute(pool)
            .await?;
        return Ok(());
    }

    let value: Option<String> = sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_one(pool)
        .await?;

    if value.is_none() {
        sqlx::query("UPDATE settings SET value = ? WHERE key = ?")
            .bind(default_value)
            .bind(key)
            .execute(pool)
            .await?;
        warn!("Setting '{}' was NULL, reset to default: {}", key, default_value);
    }

    Ok(())
}

/// Read an integer setting, falling back to a default
pub async fn get_setting_i64(pool: &SqlitePool, key: &str, default: i64) -> Result<i64> {
    let value: Option<i64> =
        sqlx::query_scalar("SELECT CAST(value AS INTEGER) FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(pool)
            .await?;
    Ok(value.unwrap_or(default))
}
