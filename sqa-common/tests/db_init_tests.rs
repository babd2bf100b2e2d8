//! Integration tests for database initialization
//!
//! Verifies create-on-first-run, idempotent re-initialization, default
//! settings, and the shared speaker/report queries.

use chrono::{Duration, Utc};
use sqa_common::db::{init, models};
use tempfile::TempDir;
use uuid::Uuid;

#[tokio::test]
async fn test_init_creates_database_file() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("nested").join("sqa.db");

    let pool = init::init_database(&db_path).await.unwrap();
    assert!(db_path.exists(), "database file should be created");

    // Re-initialization over an existing database is idempotent
    drop(pool);
    let _pool = init::init_database(&db_path).await.unwrap();
}

#[tokio::test]
async fn test_default_settings_initialized() {
    let pool = init::init_in_memory().await.unwrap();

    let timeout = init::get_setting_i64(&pool, "evaluation_timeout_ms", 0)
        .await
        .unwrap();
    assert_eq!(timeout, 5000);

    let concurrency = init::get_setting_i64(&pool, "sweep_concurrency", 0)
        .await
        .unwrap();
    assert_eq!(concurrency, 4);

    // Missing key falls back to the caller's default
    let missing = init::get_setting_i64(&pool, "no_such_key", 42).await.unwrap();
    assert_eq!(missing, 42);
}

#[tokio::test]
async fn test_ensure_setting_preserves_existing_value() {
    let pool = init::init_in_memory().await.unwrap();

    sqlx::query("UPDATE settings SET value = '9999' WHERE key = 'evaluation_timeout_ms'")
        .execute(&pool)
        .await
        .unwrap();

    init::ensure_setting(&pool, "evaluation_timeout_ms", "5000")
        .await
        .unwrap();

    let value = init::get_setting_i64(&pool, "evaluation_timeout_ms", 0)
        .await
        .unwrap();
    assert_eq!(value, 9999, "existing value must not be overwritten");
}

#[tokio::test]
async fn test_error_report_window_query() {
    let pool = init::init_in_memory().await.unwrap();
    let speaker = Uuid::new_v4();
    let now = Utc::now();

    models::insert_speaker(&pool, speaker, "Speaker A", now - Duration::days(60))
        .await
        .unwrap();

    // One report inside the window, one before it
    models::insert_error_report(
        &pool,
        Uuid::new_v4(),
        speaker,
        "the quick brown fox",
        "the quick brown fox jumps",
        "medium",
        true,
        now - Duration::days(5),
    )
    .await
    .unwrap();
    models::insert_error_report(
        &pool,
        Uuid::new_v4(),
        speaker,
        "hello world",
        "hello there world",
        "low",
        false,
        now - Duration::days(45),
    )
    .await
    .unwrap();

    let rows = models::list_error_reports(&pool, speaker, now - Duration::days(30), now)
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].original_text, "the quick brown fox");
    assert!(rows[0].accepted);

    let (count, earliest) = models::count_reports_before(&pool, speaker, now - Duration::days(30))
        .await
        .unwrap();
    assert_eq!(count, 1);
    assert!(earliest.is_some());
}

#[tokio::test]
async fn test_list_speaker_ids_capped() {
    let pool = init::init_in_memory().await.unwrap();
    let base = Utc::now();

    for i in 0..5 {
        models::insert_speaker(
            &pool,
            Uuid::new_v4(),
            &format!("Speaker {}", i),
            base + Duration::seconds(i),
        )
        .await
        .unwrap();
    }

    let ids = models::list_speaker_ids(&pool, 3).await.unwrap();
    assert_eq!(ids.len(), 3);
}
