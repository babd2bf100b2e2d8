//! Failure-path tests: dependency timeouts and recovery invariants

mod helpers;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use helpers::*;
use sqa_common::events::EventBus;
use sqa_engine::services::performance_aggregator::{ReportStore, VolumeBaseline};
use sqa_engine::types::ErrorReport;
use sqa_engine::{EngineCriteria, EngineError, EngineResult, EvaluationOrchestrator};
use std::sync::Arc;
use uuid::Uuid;

/// Report store that never answers in time
struct StalledReports;

#[async_trait]
impl ReportStore for StalledReports {
    async fn list_reports(
        &self,
        _speaker_id: Uuid,
        _window_start: DateTime<Utc>,
        _window_end: DateTime<Utc>,
    ) -> EngineResult<Vec<ErrorReport>> {
        tokio::time::sleep(std::time::Duration::from_secs(30)).await;
        Ok(vec![])
    }

    async fn volume_baseline(
        &self,
        _speaker_id: Uuid,
        _before: DateTime<Utc>,
    ) -> EngineResult<Option<VolumeBaseline>> {
        Ok(None)
    }
}

/// A stalled report store turns into a retry-later timeout error, never a
/// "no change" outcome, and commits nothing
#[tokio::test]
async fn test_report_store_timeout_abandons_cycle() {
    let pool = test_pool().await;
    let speaker = seed_speaker(&pool, 90).await;

    // Tighten the dependency timeout well below the stall
    sqlx::query("UPDATE settings SET value = '50' WHERE key = 'evaluation_timeout_ms'")
        .execute(&pool)
        .await
        .unwrap();

    let engine = EvaluationOrchestrator::with_report_store(
        pool.clone(),
        EventBus::new(16),
        EngineCriteria::default(),
        Arc::new(StalledReports),
    )
    .await
    .unwrap();

    let error = engine.evaluate_now(speaker, false).await.unwrap_err();
    assert!(matches!(
        error,
        EngineError::DependencyTimeout {
            dependency: "error-report store"
        }
    ));

    assert!(engine.get_history(speaker, 10).await.unwrap().is_empty());
}

/// The orchestrator reads its timeout from the settings table
#[tokio::test]
async fn test_timeout_setting_is_honored() {
    let pool = test_pool().await;
    let speaker = seed_speaker(&pool, 90).await;
    seed_report(&pool, speaker, 200, 2, true, 5).await;

    // Generous timeout: the real store answers instantly, evaluation runs
    let engine = orchestrator(&pool).await;
    let outcome = engine.evaluate_now(speaker, false).await.unwrap();
    assert_eq!(outcome.kind(), "insufficient_data");
}

/// verify_consistency flags a state row that drifted from the audit trail
#[tokio::test]
async fn test_consistency_check_detects_drift() {
    let pool = test_pool().await;
    let speaker = seed_speaker(&pool, 90).await;
    seed_bucket_state(&pool, speaker, "high_touch", "medium_touch", 10, 10).await;

    let engine = orchestrator(&pool).await;
    assert!(engine.store().verify_consistency(speaker).await.unwrap());

    // Corrupt the projection behind the store's back
    sqlx::query("UPDATE speaker_bucket_state SET current_bucket = 'no_touch' WHERE speaker_id = ?")
        .bind(speaker.to_string())
        .execute(&pool)
        .await
        .unwrap();

    assert!(!engine.store().verify_consistency(speaker).await.unwrap());
}

/// A speaker that was evaluated but never changed is consistent: the state
/// row holds the default bucket and the audit trail is empty
#[tokio::test]
async fn test_consistency_with_evaluations_but_no_changes() {
    let pool = test_pool().await;
    let speaker = seed_speaker(&pool, 90).await;
    seed_report(&pool, speaker, 200, 2, true, 5).await;

    let engine = orchestrator(&pool).await;
    engine.evaluate_now(speaker, false).await.unwrap();

    assert!(engine.store().verify_consistency(speaker).await.unwrap());
}
