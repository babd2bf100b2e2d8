//! Shared fixtures for engine integration tests
#![allow(dead_code)]

use chrono::{Duration, Utc};
use sqa_common::db::{init, models};
use sqa_common::events::EventBus;
use sqa_engine::{EngineCriteria, EvaluationOrchestrator};
use sqlx::SqlitePool;
use std::sync::Arc;
use uuid::Uuid;

/// Fresh in-memory database with the full schema
pub async fn test_pool() -> SqlitePool {
    init::init_in_memory().await.expect("init in-memory database")
}

/// Orchestrator over the pool with default criteria
pub async fn orchestrator(pool: &SqlitePool) -> Arc<EvaluationOrchestrator> {
    orchestrator_with(pool, EngineCriteria::default()).await
}

/// Orchestrator over the pool with custom criteria
pub async fn orchestrator_with(
    pool: &SqlitePool,
    criteria: EngineCriteria,
) -> Arc<EvaluationOrchestrator> {
    EvaluationOrchestrator::new(pool.clone(), EventBus::new(64), criteria)
        .await
        .expect("build orchestrator")
}

/// Insert a speaker created `days_ago` days in the past
pub async fn seed_speaker(pool: &SqlitePool, days_ago: i64) -> Uuid {
    let speaker_id = Uuid::new_v4();
    models::insert_speaker(
        pool,
        speaker_id,
        "Test Speaker",
        Utc::now() - Duration::days(days_ago),
    )
    .await
    .expect("insert speaker");
    speaker_id
}

/// Build an original/corrected pair of `tokens` words with `errors`
/// substitutions, so error_rate = errors / tokens exactly
pub fn text_with_errors(tokens: usize, errors: usize) -> (String, String) {
    assert!(errors <= tokens);
    let original: Vec<String> = (0..tokens).map(|i| format!("w{}", i)).collect();
    let mut corrected = original.clone();
    for (i, slot) in corrected.iter_mut().enumerate().take(errors) {
        *slot = format!("x{}", i);
    }
    (original.join(" "), corrected.join(" "))
}

/// Insert one error report `days_ago` days in the past
pub async fn seed_report(
    pool: &SqlitePool,
    speaker_id: Uuid,
    tokens: usize,
    errors: usize,
    accepted: bool,
    days_ago: i64,
) {
    let (original, corrected) = text_with_errors(tokens, errors);
    models::insert_error_report(
        pool,
        Uuid::new_v4(),
        speaker_id,
        &original,
        &corrected,
        "medium",
        accepted,
        Utc::now() - Duration::days(days_ago),
    )
    .await
    .expect("insert error report");
}

/// Put a speaker into `current` with a back-dated audit record, keeping
/// the projection invariant intact: the state row matches the newest
/// bucket_changes record
pub async fn seed_bucket_state(
    pool: &SqlitePool,
    speaker_id: Uuid,
    previous: &str,
    current: &str,
    entered_days_ago: i64,
    change_days_ago: i64,
) {
    let now = Utc::now();
    sqlx::query(
        r#"
        INSERT INTO bucket_changes (
            guid, speaker_id, previous_bucket, new_bucket,
            confidence, reason, snapshot, actor, created_at
        )
        VALUES (?, ?, ?, ?, 0.9, 'test fixture', NULL, 'system', ?)
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(speaker_id.to_string())
    .bind(previous)
    .bind(current)
    .bind(now - Duration::days(change_days_ago))
    .execute(pool)
    .await
    .expect("insert bucket change fixture");

    sqlx::query(
        r#"
        INSERT INTO speaker_bucket_state (speaker_id, current_bucket, entered_at, last_change_at)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(speaker_id) DO UPDATE SET
            current_bucket = excluded.current_bucket,
            entered_at = excluded.entered_at,
            last_change_at = excluded.last_change_at
        "#,
    )
    .bind(speaker_id.to_string())
    .bind(current)
    .bind(now - Duration::days(entered_days_ago))
    .bind(now - Duration::days(change_days_ago))
    .execute(pool)
    .await
    .expect("upsert bucket state fixture");
}
