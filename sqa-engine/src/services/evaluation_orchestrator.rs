//! Evaluation Orchestrator Service
//!
//! Entry point for the engine. Runs the pipeline
//! aggregate → evaluate → gate → commit for one speaker (triggered whenever
//! a new error report is recorded) or for a batch of speakers
//! (administrative sweep).
//!
//! # Concurrency
//! - At most one in-flight evaluation per speaker: a per-speaker async gate
//!   serializes the read-modify-write sequence. A trigger arriving while an
//!   evaluation is in flight collapses into a single re-run after it
//!   completes; triggers are never dropped into concurrent runs.
//! - Different speakers evaluate fully in parallel; sweeps process small
//!   concurrent groups so the interactive trigger path is not starved.
//! - The report store and the state store are externally-owned and
//!   potentially slow; every call to them carries a timeout, and a timeout
//!   abandons the cycle (retry on the next trigger), never "no change".
//! - A commit that hits the optimistic-concurrency check is re-run exactly
//!   once against fresh state.

use crate::config::EngineCriteria;
use crate::db::{BucketStateStore, SqliteReportStore};
use crate::error::{EngineError, EngineResult};
use crate::services::performance_aggregator::{PerformanceAggregator, ReportStore};
use crate::services::progression_evaluator::ProgressionEvaluator;
use crate::services::safeguard_policy::SafeguardPolicy;
use crate::services::text_error_metric::TextErrorMetric;
use crate::types::{
    BucketChangeRecord, ChangeActor, EvaluationOutcome, GatedDecision, QualityBucket,
    SpeakerSweepResult, SweepSummary,
};
use chrono::{Duration, Utc};
use futures::stream::{FuturesUnordered, StreamExt};
use sqa_common::db::init::get_setting_i64;
use sqa_common::events::{EventBus, QaEvent};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

/// Per-speaker serialization gate
///
/// `rerun` collapses triggers that arrive while an evaluation holds the
/// lock into one follow-up run.
#[derive(Default)]
struct SpeakerGate {
    lock: Mutex<()>,
    rerun: AtomicBool,
}

/// Evaluation orchestrator
pub struct EvaluationOrchestrator {
    store: BucketStateStore,
    aggregator: PerformanceAggregator,
    evaluator: ProgressionEvaluator,
    safeguard: SafeguardPolicy,
    criteria: Arc<EngineCriteria>,
    event_bus: EventBus,
    gates: Mutex<HashMap<Uuid, Arc<SpeakerGate>>>,
    dependency_timeout: std::time::Duration,
    sweep_concurrency: usize,
}

impl EvaluationOrchestrator {
    /// Build an orchestrator over the shared pool, reading reports from
    /// the SQLite-backed store
    pub async fn new(
        pool: SqlitePool,
        event_bus: EventBus,
        criteria: EngineCriteria,
    ) -> EngineResult<Arc<Self>> {
        let reports: Arc<dyn ReportStore> = Arc::new(SqliteReportStore::new(pool.clone()));
        Self::with_report_store(pool, event_bus, criteria, reports).await
    }

    /// Build with an injected report store (fakes, remote stores)
    pub async fn with_report_store(
        pool: SqlitePool,
        event_bus: EventBus,
        criteria: EngineCriteria,
        reports: Arc<dyn ReportStore>,
    ) -> EngineResult<Arc<Self>> {
        criteria.validate()?;

        let timeout_ms = get_setting_i64(&pool, "evaluation_timeout_ms", 5000).await?;
        let sweep_concurrency = get_setting_i64(&pool, "sweep_concurrency", 4).await?;

        let metric = TextErrorMetric::new(criteria.metric.clone());
        let aggregator = PerformanceAggregator::new(
            reports,
            metric,
            criteria.min_reports_for_trend,
            criteria.trend_epsilon,
        );
        let store = BucketStateStore::new(pool, criteria.default_bucket);
        let safeguard = SafeguardPolicy::with_defaults(&criteria);

        Ok(Arc::new(Self {
            store,
            aggregator,
            evaluator: ProgressionEvaluator::new(),
            safeguard,
            criteria: Arc::new(criteria),
            event_bus,
            gates: Mutex::new(HashMap::new()),
            dependency_timeout: std::time::Duration::from_millis(timeout_ms.max(1) as u64),
            sweep_concurrency: sweep_concurrency.max(1) as usize,
        }))
    }

    /// The state store (read paths for collaborators)
    pub fn store(&self) -> &BucketStateStore {
        &self.store
    }

    /// Static bucket catalog for the administrative layer
    pub fn bucket_catalog(&self) -> Vec<crate::types::BucketCatalogEntry> {
        QualityBucket::catalog()
    }

    /// Current bucket for a speaker
    pub async fn get_current_bucket(&self, speaker_id: Uuid) -> EngineResult<QualityBucket> {
        self.store.current_bucket(speaker_id).await
    }

    /// Change history for a speaker, newest first
    pub async fn get_history(
        &self,
        speaker_id: Uuid,
        limit: u32,
    ) -> EngineResult<Vec<BucketChangeRecord>> {
        self.store.history(speaker_id, limit).await
    }

    /// Synchronous evaluation for manual "re-check" actions
    ///
    /// `force` applies an actionable recommendation even when a safeguard
    /// would suppress it; the commit is audited identically.
    pub async fn evaluate_now(
        &self,
        speaker_id: Uuid,
        force: bool,
    ) -> EngineResult<EvaluationOutcome> {
        let gate = self.gate_for(speaker_id).await;
        let _guard = gate.lock.lock().await;
        self.evaluate_locked(speaker_id, force).await
    }

    /// Asynchronous trigger from the report-submission path
    ///
    /// Never blocks the caller. If an evaluation for the speaker is already
    /// in flight, the trigger collapses into one re-run after it finishes.
    pub fn on_report_recorded(self: &Arc<Self>, speaker_id: Uuid) {
        let orchestrator = Arc::clone(self);
        tokio::spawn(async move {
            let gate = orchestrator.gate_for(speaker_id).await;
            match gate.lock.try_lock() {
                Ok(_guard) => loop {
                    if let Err(error) = orchestrator.evaluate_locked(speaker_id, false).await {
                        warn!(
                            speaker_id = %speaker_id,
                            %error,
                            "Triggered evaluation abandoned; will retry on next trigger"
                        );
                    }
                    if !gate.rerun.swap(false, Ordering::SeqCst) {
                        break;
                    }
                },
                Err(_) => {
                    gate.rerun.store(true, Ordering::SeqCst);
                }
            };
        });
    }

    /// Administrative sweep over up to `max_profiles` speakers
    ///
    /// Speakers are processed in small concurrent groups; the token is
    /// checked between speakers, never mid-speaker, so cancellation leaves
    /// no partial commit.
    pub async fn batch_evaluate(
        &self,
        max_profiles: u32,
        force: bool,
        cancel: &CancellationToken,
    ) -> EngineResult<SweepSummary> {
        let sweep_id = Uuid::new_v4();
        self.event_bus.emit_lossy(QaEvent::SweepStarted {
            sweep_id,
            max_profiles,
            timestamp: Utc::now(),
        });

        let speaker_ids = self.store.list_speaker_ids(max_profiles).await?;
        info!(
            sweep_id = %sweep_id,
            speakers = speaker_ids.len(),
            concurrency = self.sweep_concurrency,
            "Starting batch sweep"
        );

        let mut summary = SweepSummary {
            sweep_id,
            evaluated_count: 0,
            changed_count: 0,
            suppressed_count: 0,
            insufficient_count: 0,
            failed_count: 0,
            cancelled: false,
            results: Vec::with_capacity(speaker_ids.len()),
        };

        'sweep: for group in speaker_ids.chunks(self.sweep_concurrency) {
            if cancel.is_cancelled() {
                summary.cancelled = true;
                break 'sweep;
            }

            let mut in_flight = FuturesUnordered::new();
            for &speaker_id in group {
                in_flight
                    .push(async move { (speaker_id, self.evaluate_now(speaker_id, force).await) });
            }

            while let Some((speaker_id, result)) = in_flight.next().await {
                match result {
                    Ok(outcome) => {
                        summary.evaluated_count += 1;
                        match &outcome {
                            EvaluationOutcome::Changed { .. } => summary.changed_count += 1,
                            EvaluationOutcome::Suppressed { .. } => summary.suppressed_count += 1,
                            EvaluationOutcome::InsufficientData { .. } => {
                                summary.insufficient_count += 1
                            }
                            EvaluationOutcome::Unchanged { .. } => {}
                        }
                        summary.results.push(SpeakerSweepResult {
                            speaker_id,
                            outcome: outcome.kind().to_string(),
                            detail: match outcome {
                                EvaluationOutcome::Changed { record } => Some(format!(
                                    "{} -> {}",
                                    record.previous_bucket.as_str(),
                                    record.new_bucket.as_str()
                                )),
                                EvaluationOutcome::Suppressed { reason, .. } => {
                                    Some(reason.as_code().to_string())
                                }
                                _ => None,
                            },
                        });
                    }
                    Err(error) => {
                        summary.failed_count += 1;
                        summary.results.push(SpeakerSweepResult {
                            speaker_id,
                            outcome: "failed".to_string(),
                            detail: Some(error.to_string()),
                        });
                    }
                }
            }
        }

        self.event_bus.emit_lossy(QaEvent::SweepCompleted {
            sweep_id,
            evaluated_count: summary.evaluated_count,
            changed_count: summary.changed_count,
            cancelled: summary.cancelled,
            timestamp: Utc::now(),
        });

        Ok(summary)
    }

    /// Force a speaker into a bucket (QA supervisor escape hatch)
    ///
    /// Goes through the same commit path as automatic changes and is logged
    /// identically; no safeguard gating applies.
    pub async fn apply_manual_override(
        &self,
        speaker_id: Uuid,
        new_bucket: QualityBucket,
        user_id: Uuid,
    ) -> EngineResult<BucketChangeRecord> {
        let gate = self.gate_for(speaker_id).await;
        let _guard = gate.lock.lock().await;

        let now = Utc::now();
        let current = self.store.current_bucket(speaker_id).await?;
        let record = self
            .with_timeout("state store", self.store.commit_change(
                speaker_id,
                new_bucket,
                current,
                1.0,
                "manual override by QA supervisor",
                None,
                ChangeActor::User(user_id),
                now,
            ))
            .await??;

        self.event_bus.emit_lossy(QaEvent::ManualOverrideApplied {
            speaker_id,
            record_id: record.id,
            new_bucket: new_bucket.as_str().to_string(),
            user_id,
            timestamp: now,
        });

        Ok(record)
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    async fn gate_for(&self, speaker_id: Uuid) -> Arc<SpeakerGate> {
        let mut gates = self.gates.lock().await;
        gates
            .entry(speaker_id)
            .or_insert_with(|| Arc::new(SpeakerGate::default()))
            .clone()
    }

    async fn with_timeout<T>(
        &self,
        dependency: &'static str,
        future: impl std::future::Future<Output = T>,
    ) -> EngineResult<T> {
        tokio::time::timeout(self.dependency_timeout, future)
            .await
            .map_err(|_| EngineError::DependencyTimeout { dependency })
    }

    /// One evaluation cycle; the caller holds the speaker's gate
    async fn evaluate_locked(
        &self,
        speaker_id: Uuid,
        force: bool,
    ) -> EngineResult<EvaluationOutcome> {
        match self.run_evaluation(speaker_id, force).await {
            Ok(outcome) => Ok(outcome),
            Err(error) => {
                self.event_bus.emit_lossy(QaEvent::EvaluationFailed {
                    speaker_id,
                    error: error.to_string(),
                    timestamp: Utc::now(),
                });
                Err(error)
            }
        }
    }

    async fn run_evaluation(
        &self,
        speaker_id: Uuid,
        force: bool,
    ) -> EngineResult<EvaluationOutcome> {
        let criteria = &self.criteria;
        let now = Utc::now();
        let window_start = now - Duration::days(criteria.evaluation_window_days);

        let snapshot = self
            .with_timeout(
                "error-report store",
                self.aggregator.aggregate(speaker_id, window_start, now),
            )
            .await??;

        self.store.mark_evaluated(speaker_id, now).await?;

        // Below the smallest sample gate no path could ever trigger
        if snapshot.sample_count == 0
            || snapshot.sample_count < criteria.min_reports_for_demotion
        {
            self.event_bus.emit_lossy(QaEvent::EvaluationInsufficientData {
                speaker_id,
                sample_count: snapshot.sample_count,
                timestamp: now,
            });
            return Ok(EvaluationOutcome::InsufficientData {
                sample_count: snapshot.sample_count,
            });
        }

        let baseline = self
            .with_timeout(
                "error-report store",
                self.aggregator.volume_baseline(speaker_id, window_start),
            )
            .await??;

        // First pass, plus exactly one re-run if the commit hits the
        // optimistic-concurrency check
        for attempt in 0..2 {
            let state = self.store.state(speaker_id, now).await?;
            let recommendation =
                self.evaluator
                    .evaluate(&snapshot, state.current_bucket, criteria);

            let Some(target_bucket) = recommendation.target_bucket else {
                return Ok(EvaluationOutcome::Unchanged { recommendation });
            };

            let decision = if force {
                GatedDecision::Apply
            } else {
                self.safeguard.gate(
                    &recommendation,
                    &state,
                    &snapshot,
                    baseline,
                    now,
                    criteria,
                )
            };

            match decision {
                GatedDecision::Suppress {
                    reason,
                    needs_manual_review,
                    detail,
                } => {
                    info!(
                        speaker_id = %speaker_id,
                        reason = reason.as_code(),
                        %detail,
                        "Recommendation suppressed by safeguard"
                    );
                    self.event_bus.emit_lossy(QaEvent::EvaluationSuppressed {
                        speaker_id,
                        reason_code: reason.as_code().to_string(),
                        would_have_changed_to: target_bucket.as_str().to_string(),
                        needs_manual_review,
                        timestamp: now,
                    });
                    return Ok(EvaluationOutcome::Suppressed {
                        reason,
                        needs_manual_review,
                        recommendation,
                    });
                }
                GatedDecision::Apply => {
                    let snapshot_json = serde_json::to_value(&snapshot)?;
                    let committed = self
                        .with_timeout("state store", self.store.commit_change(
                            speaker_id,
                            target_bucket,
                            state.current_bucket,
                            recommendation.confidence,
                            &recommendation.reason,
                            Some(&snapshot_json),
                            ChangeActor::System,
                            now,
                        ))
                        .await?;

                    match committed {
                        Ok(record) => {
                            self.event_bus.emit_lossy(QaEvent::BucketChanged {
                                speaker_id,
                                record_id: record.id,
                                previous_bucket: record.previous_bucket.as_str().to_string(),
                                new_bucket: record.new_bucket.as_str().to_string(),
                                confidence: record.confidence,
                                reason: record.reason.clone(),
                                actor: record.actor.as_db_string(),
                                timestamp: now,
                            });
                            return Ok(EvaluationOutcome::Changed { record });
                        }
                        Err(EngineError::Conflict(detail)) if attempt == 0 => {
                            warn!(
                                speaker_id = %speaker_id,
                                %detail,
                                "Commit conflicted; re-running once against fresh state"
                            );
                            continue;
                        }
                        Err(error) => return Err(error),
                    }
                }
            }
        }

        Err(EngineError::Conflict(format!(
            "evaluation for speaker {} conflicted twice; giving up until the next trigger",
            speaker_id
        )))
    }
}
