//! Core types for the speaker-quality engine
//!
//! Shared across the aggregator, evaluator, safeguard, store, and
//! orchestrator. All timestamps are UTC.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Buckets
// ============================================================================

/// Service-quality tier for a speaker's transcripts
///
/// Ordering is by explicit rank, highest-intervention to lowest:
/// HighTouch (0) < MediumTouch (1) < LowTouch (2) < NoTouch (3).
/// "Promotion" moves to a higher rank (less intervention), "demotion"
/// the reverse. Comparisons go through `rank()`, never declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityBucket {
    /// Every transcript is manually reviewed
    HighTouch,
    /// Sampled review with full correction workflow
    MediumTouch,
    /// Spot checks only
    LowTouch,
    /// Transcripts pass through without manual QA
    NoTouch,
}

impl QualityBucket {
    /// All buckets in rank order (most intervention first)
    pub const ALL: [QualityBucket; 4] = [
        QualityBucket::HighTouch,
        QualityBucket::MediumTouch,
        QualityBucket::LowTouch,
        QualityBucket::NoTouch,
    ];

    /// Explicit integer rank (0 = most intervention)
    pub fn rank(&self) -> u8 {
        match self {
            QualityBucket::HighTouch => 0,
            QualityBucket::MediumTouch => 1,
            QualityBucket::LowTouch => 2,
            QualityBucket::NoTouch => 3,
        }
    }

    /// Next bucket toward less intervention (promotion target)
    pub fn promoted(&self) -> Option<QualityBucket> {
        match self {
            QualityBucket::HighTouch => Some(QualityBucket::MediumTouch),
            QualityBucket::MediumTouch => Some(QualityBucket::LowTouch),
            QualityBucket::LowTouch => Some(QualityBucket::NoTouch),
            QualityBucket::NoTouch => None,
        }
    }

    /// Next bucket toward more intervention (demotion target)
    pub fn demoted(&self) -> Option<QualityBucket> {
        match self {
            QualityBucket::HighTouch => None,
            QualityBucket::MediumTouch => Some(QualityBucket::HighTouch),
            QualityBucket::LowTouch => Some(QualityBucket::MediumTouch),
            QualityBucket::NoTouch => Some(QualityBucket::LowTouch),
        }
    }

    /// Database / event string form
    pub fn as_str(&self) -> &'static str {
        match self {
            QualityBucket::HighTouch => "high_touch",
            QualityBucket::MediumTouch => "medium_touch",
            QualityBucket::LowTouch => "low_touch",
            QualityBucket::NoTouch => "no_touch",
        }
    }

    /// Parse the database string form
    pub fn parse(s: &str) -> Option<QualityBucket> {
        match s {
            "high_touch" => Some(QualityBucket::HighTouch),
            "medium_touch" => Some(QualityBucket::MediumTouch),
            "low_touch" => Some(QualityBucket::LowTouch),
            "no_touch" => Some(QualityBucket::NoTouch),
            _ => None,
        }
    }

    /// Display label for the administrative UI
    pub fn label(&self) -> &'static str {
        match self {
            QualityBucket::HighTouch => "High Touch",
            QualityBucket::MediumTouch => "Medium Touch",
            QualityBucket::LowTouch => "Low Touch",
            QualityBucket::NoTouch => "No Touch",
        }
    }

    /// Description for the administrative UI
    pub fn description(&self) -> &'static str {
        match self {
            QualityBucket::HighTouch => "Every transcript receives full manual review",
            QualityBucket::MediumTouch => "Transcripts are sampled for full correction",
            QualityBucket::LowTouch => "Transcripts receive spot checks only",
            QualityBucket::NoTouch => "Transcripts are delivered without manual QA",
        }
    }

    /// Static ordered catalog of all buckets
    pub fn catalog() -> Vec<BucketCatalogEntry> {
        QualityBucket::ALL
            .iter()
            .map(|b| BucketCatalogEntry {
                bucket: *b,
                rank: b.rank(),
                label: b.label().to_string(),
                description: b.description().to_string(),
            })
            .collect()
    }
}

/// One entry of the bucket catalog exposed to the administrative layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketCatalogEntry {
    pub bucket: QualityBucket,
    pub rank: u8,
    pub label: String,
    pub description: String,
}

// ============================================================================
// Reports and snapshots
// ============================================================================

/// One QA-submitted correction event, consumed read-only
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub id: Uuid,
    pub speaker_id: Uuid,
    pub original_text: String,
    pub corrected_text: String,
    pub severity: String,
    /// Whether the correction was accepted downstream
    pub accepted: bool,
    pub submitted_at: DateTime<Utc>,
}

/// Direction of a speaker's error-rate trend across the evaluation window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Improving,
    Stable,
    Declining,
    InsufficientData,
}

impl TrendDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrendDirection::Improving => "improving",
            TrendDirection::Stable => "stable",
            TrendDirection::Declining => "declining",
            TrendDirection::InsufficientData => "insufficient_data",
        }
    }
}

/// Rolled-up performance statistics for one speaker over one window
///
/// Recomputed fresh on every evaluation, serialized into the audit record
/// when a change commits, and discarded otherwise.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeakerPerformanceSnapshot {
    pub speaker_id: Uuid,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    /// Number of error reports in the window
    pub sample_count: u32,
    /// Arithmetic mean error rate across the window
    pub mean_error_rate: f64,
    /// Fraction of reports whose correction was accepted downstream
    pub mean_acceptance_rate: f64,
    /// Population standard deviation of the error rate (lower = steadier)
    pub consistency: f64,
    pub trend: TrendDirection,
}

impl SpeakerPerformanceSnapshot {
    /// Snapshot for a window with no reports; callers must treat this as
    /// "no recommendation possible", not as a fault
    pub fn insufficient(
        speaker_id: Uuid,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Self {
        Self {
            speaker_id,
            window_start,
            window_end,
            sample_count: 0,
            mean_error_rate: 0.0,
            mean_acceptance_rate: 0.0,
            consistency: 0.0,
            trend: TrendDirection::InsufficientData,
        }
    }
}

// ============================================================================
// Recommendations
// ============================================================================

/// Proposed action from the progression evaluator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressionAction {
    None,
    Promote,
    Demote,
}

impl ProgressionAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgressionAction::None => "none",
            ProgressionAction::Promote => "promote",
            ProgressionAction::Demote => "demote",
        }
    }
}

/// One scoring factor's contribution to a confidence score
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactorContribution {
    /// Normalized factor value in [0, 1]
    pub value: f64,
    /// Configured weight
    pub weight: f64,
    /// value × weight
    pub weighted: f64,
}

impl FactorContribution {
    pub fn new(value: f64, weight: f64) -> Self {
        Self {
            value,
            weight,
            weighted: value * weight,
        }
    }
}

/// Per-factor breakdown of a confidence score
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactorBreakdown {
    pub error_rate: FactorContribution,
    pub accuracy: FactorContribution,
    pub consistency: FactorContribution,
    pub trend: FactorContribution,
}

impl FactorBreakdown {
    /// Weighted sum of all factors
    pub fn total(&self) -> f64 {
        self.error_rate.weighted
            + self.accuracy.weighted
            + self.consistency.weighted
            + self.trend.weighted
    }
}

/// Output of the progression evaluator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressionRecommendation {
    pub action: ProgressionAction,
    /// Bucket the action would move the speaker into (None when action is None)
    pub target_bucket: Option<QualityBucket>,
    /// Confidence in [0, 1]; for a `None` action this is the strongest
    /// score that was computed, so callers can see how close the call was
    pub confidence: f64,
    /// Breakdown of the promotion-side score, when that path was scorable
    pub promotion_factors: Option<FactorBreakdown>,
    /// Breakdown of the demotion-side score, when that path was scorable
    pub demotion_factors: Option<FactorBreakdown>,
    /// Error rate spiked past the severe-regression multiple of the current
    /// bucket's ceiling; demotions carrying this flag bypass dwell/cooldown
    pub severe_regression: bool,
    pub reason: String,
}

// ============================================================================
// Safeguards
// ============================================================================

/// Machine-readable suppression reason codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuppressReason {
    MinDaysInBucketNotMet,
    CooldownActive,
    MaxChangesPerMonthReached,
    AnomalousSampleVolume,
}

impl SuppressReason {
    pub fn as_code(&self) -> &'static str {
        match self {
            SuppressReason::MinDaysInBucketNotMet => "min_days_in_bucket_not_met",
            SuppressReason::CooldownActive => "cooldown_active",
            SuppressReason::MaxChangesPerMonthReached => "max_changes_per_month_reached",
            SuppressReason::AnomalousSampleVolume => "anomalous_sample_volume",
        }
    }
}

/// Safeguard verdict over an actionable recommendation
#[derive(Debug, Clone)]
pub enum GatedDecision {
    /// No guard objects; the change may be committed
    Apply,
    /// A guard blocked the change; recorded as "suppressed, would have
    /// changed", never surfaced as an error
    Suppress {
        reason: SuppressReason,
        /// Anomaly suppressions request a human look before auto-applying
        needs_manual_review: bool,
        detail: String,
    },
}

// ============================================================================
// State and audit
// ============================================================================

/// Who committed a bucket change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeActor {
    /// Automatic evaluation pipeline
    System,
    /// Manual override by a QA supervisor
    User(Uuid),
}

impl ChangeActor {
    pub fn as_db_string(&self) -> String {
        match self {
            ChangeActor::System => "system".to_string(),
            ChangeActor::User(id) => id.to_string(),
        }
    }

    pub fn parse(s: &str) -> ChangeActor {
        if s == "system" {
            ChangeActor::System
        } else {
            match Uuid::parse_str(s) {
                Ok(id) => ChangeActor::User(id),
                Err(_) => ChangeActor::System,
            }
        }
    }
}

/// One append-only audit record of a bucket change
#[derive(Debug, Clone)]
pub struct BucketChangeRecord {
    pub id: Uuid,
    pub speaker_id: Uuid,
    pub previous_bucket: QualityBucket,
    pub new_bucket: QualityBucket,
    pub confidence: f64,
    pub reason: String,
    /// Serialized evaluation snapshot (absent for manual overrides)
    pub snapshot: Option<serde_json::Value>,
    pub actor: ChangeActor,
    pub created_at: DateTime<Utc>,
}

/// Current bucket state for one speaker
///
/// Mutated only by the orchestrator's commit path; read-only everywhere else.
#[derive(Debug, Clone)]
pub struct SpeakerBucketState {
    pub speaker_id: Uuid,
    pub current_bucket: QualityBucket,
    /// When the speaker entered the current bucket
    pub entered_at: DateTime<Utc>,
    /// When the last committed change happened (None if never changed)
    pub last_change_at: Option<DateTime<Utc>>,
    pub last_evaluated_at: Option<DateTime<Utc>>,
    /// Committed changes in the trailing 30 days, derived from the audit
    /// trail at read time
    pub changes_in_trailing_30_days: u32,
}

// ============================================================================
// Outcomes
// ============================================================================

/// Terminal outcome of one evaluation; the four cases a caller must be
/// able to distinguish
#[derive(Debug, Clone)]
pub enum EvaluationOutcome {
    /// Evaluation ran, no change warranted
    Unchanged { recommendation: ProgressionRecommendation },
    /// A change was committed
    Changed { record: BucketChangeRecord },
    /// A recommendation existed but a safeguard suppressed it
    Suppressed {
        reason: SuppressReason,
        needs_manual_review: bool,
        recommendation: ProgressionRecommendation,
    },
    /// Not enough history to evaluate; current bucket untouched
    InsufficientData { sample_count: u32 },
}

impl EvaluationOutcome {
    pub fn kind(&self) -> &'static str {
        match self {
            EvaluationOutcome::Unchanged { .. } => "unchanged",
            EvaluationOutcome::Changed { .. } => "changed",
            EvaluationOutcome::Suppressed { .. } => "suppressed",
            EvaluationOutcome::InsufficientData { .. } => "insufficient_data",
        }
    }
}

/// Per-speaker line of a sweep summary
#[derive(Debug, Clone)]
pub struct SpeakerSweepResult {
    pub speaker_id: Uuid,
    /// Outcome kind, or "failed" when the evaluation was abandoned
    pub outcome: String,
    pub detail: Option<String>,
}

/// Result of one administrative batch sweep
#[derive(Debug, Clone)]
pub struct SweepSummary {
    pub sweep_id: Uuid,
    pub evaluated_count: u32,
    pub changed_count: u32,
    pub suppressed_count: u32,
    pub insufficient_count: u32,
    pub failed_count: u32,
    pub cancelled: bool,
    pub results: Vec<SpeakerSweepResult>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_rank_ordering() {
        assert_eq!(QualityBucket::HighTouch.rank(), 0);
        assert_eq!(QualityBucket::MediumTouch.rank(), 1);
        assert_eq!(QualityBucket::LowTouch.rank(), 2);
        assert_eq!(QualityBucket::NoTouch.rank(), 3);

        // Promotion strictly increases rank, demotion strictly decreases it
        for bucket in QualityBucket::ALL {
            if let Some(up) = bucket.promoted() {
                assert_eq!(up.rank(), bucket.rank() + 1);
            }
            if let Some(down) = bucket.demoted() {
                assert_eq!(down.rank() + 1, bucket.rank());
            }
        }
    }

    #[test]
    fn test_bucket_endpoints() {
        assert_eq!(QualityBucket::NoTouch.promoted(), None);
        assert_eq!(QualityBucket::HighTouch.demoted(), None);
    }

    #[test]
    fn test_bucket_string_round_trip() {
        for bucket in QualityBucket::ALL {
            assert_eq!(QualityBucket::parse(bucket.as_str()), Some(bucket));
        }
        assert_eq!(QualityBucket::parse("bogus"), None);
    }

    #[test]
    fn test_catalog_is_ordered_by_rank() {
        let catalog = QualityBucket::catalog();
        assert_eq!(catalog.len(), 4);
        for (i, entry) in catalog.iter().enumerate() {
            assert_eq!(entry.rank as usize, i);
            assert!(!entry.label.is_empty());
            assert!(!entry.description.is_empty());
        }
    }

    #[test]
    fn test_actor_round_trip() {
        assert_eq!(ChangeActor::System.as_db_string(), "system");
        assert_eq!(ChangeActor::parse("system"), ChangeActor::System);

        let id = Uuid::new_v4();
        let user = ChangeActor::User(id);
        assert_eq!(ChangeActor::parse(&user.as_db_string()), user);
    }

    #[test]
    fn test_factor_breakdown_total() {
        let breakdown = FactorBreakdown {
            error_rate: FactorContribution::new(0.4, 0.40),
            accuracy: FactorContribution::new(0.90, 0.30),
            consistency: FactorContribution::new(0.8, 0.15),
            trend: FactorContribution::new(1.0, 0.15),
        };
        let expected = 0.4 * 0.40 + 0.90 * 0.30 + 0.8 * 0.15 + 1.0 * 0.15;
        assert!((breakdown.total() - expected).abs() < 1e-12);
    }

    #[test]
    fn test_suppress_reason_codes() {
        assert_eq!(
            SuppressReason::MinDaysInBucketNotMet.as_code(),
            "min_days_in_bucket_not_met"
        );
        assert_eq!(SuppressReason::CooldownActive.as_code(), "cooldown_active");
    }
}
