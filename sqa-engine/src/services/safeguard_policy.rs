//! Safeguard Policy Service
//!
//! Last line of defense before a state mutation. Gates an actionable
//! recommendation against business-rule constraints:
//! - minimum dwell time in the current bucket
//! - cooldown since the last committed change
//! - maximum changes per trailing 30 days
//! - anomalously small sample volume (pluggable detector)
//!
//! Severe-regression demotions bypass dwell and cooldown: protecting
//! downstream quality outweighs thrash-avoidance. Promotions never bypass
//! anything. The trailing-30-day cap holds in all cases.
//!
//! A suppression is a verdict, not a veto error; every suppression carries
//! a machine-readable reason code.

use crate::config::EngineCriteria;
use crate::services::performance_aggregator::VolumeBaseline;
use crate::types::{
    GatedDecision, ProgressionAction, ProgressionRecommendation, SpeakerBucketState,
    SpeakerPerformanceSnapshot, SuppressReason,
};
use chrono::{DateTime, Duration, Utc};
use sqa_common::human_time::format_duration;
use tracing::debug;

/// Pluggable anomaly-detection strategy for the sample-volume check
///
/// The exact statistic is swappable without touching the rest of the
/// pipeline; the shipped default compares window volume against the
/// speaker's historical daily average.
pub trait AnomalyDetector: Send + Sync {
    fn name(&self) -> &'static str;

    /// True when the window's sample volume is implausible for this speaker
    fn is_anomalous(
        &self,
        snapshot: &SpeakerPerformanceSnapshot,
        baseline: Option<VolumeBaseline>,
    ) -> bool;
}

/// Default detector: window daily volume under a configured fraction of
/// the speaker's historical daily average is treated as a noisy burst
pub struct VolumeRatioDetector {
    min_volume_ratio: f64,
}

impl VolumeRatioDetector {
    pub fn new(min_volume_ratio: f64) -> Self {
        Self { min_volume_ratio }
    }
}

impl AnomalyDetector for VolumeRatioDetector {
    fn name(&self) -> &'static str {
        "volume_ratio"
    }

    fn is_anomalous(
        &self,
        snapshot: &SpeakerPerformanceSnapshot,
        baseline: Option<VolumeBaseline>,
    ) -> bool {
        let Some(baseline) = baseline else {
            // No prior history to compare against; nothing to flag
            return false;
        };
        if baseline.daily_average <= 0.0 {
            return false;
        }

        let window_days =
            (snapshot.window_end - snapshot.window_start).num_seconds() as f64 / 86_400.0;
        if window_days <= 0.0 {
            return false;
        }

        let window_daily = snapshot.sample_count as f64 / window_days;
        window_daily < self.min_volume_ratio * baseline.daily_average
    }
}

/// Safeguard policy
pub struct SafeguardPolicy {
    detector: Box<dyn AnomalyDetector>,
}

impl SafeguardPolicy {
    pub fn new(detector: Box<dyn AnomalyDetector>) -> Self {
        Self { detector }
    }

    /// Policy with the default volume-ratio detector
    pub fn with_defaults(criteria: &EngineCriteria) -> Self {
        Self::new(Box::new(VolumeRatioDetector::new(
            criteria.anomaly_min_volume_ratio,
        )))
    }

    /// Gate an actionable recommendation against the speaker's state
    pub fn gate(
        &self,
        recommendation: &ProgressionRecommendation,
        state: &SpeakerBucketState,
        snapshot: &SpeakerPerformanceSnapshot,
        baseline: Option<VolumeBaseline>,
        now: DateTime<Utc>,
        criteria: &EngineCriteria,
    ) -> GatedDecision {
        if recommendation.action == ProgressionAction::None {
            return GatedDecision::Apply;
        }

        // Severe-regression demotions skip the thrash-avoidance guards
        let bypass_thrash_guards = recommendation.action == ProgressionAction::Demote
            && recommendation.severe_regression;

        if !bypass_thrash_guards {
            let dwell = now - state.entered_at;
            let min_dwell = Duration::days(criteria.min_days_in_bucket);
            if dwell < min_dwell {
                return self.suppress(
                    SuppressReason::MinDaysInBucketNotMet,
                    false,
                    format!(
                        "in {} for {} of required {}",
                        state.current_bucket.as_str(),
                        format_duration(dwell.num_seconds()),
                        format_duration(min_dwell.num_seconds()),
                    ),
                );
            }

            if let Some(last_change) = state.last_change_at {
                let since_change = now - last_change;
                let cooldown = Duration::days(criteria.cooldown_days);
                if since_change < cooldown {
                    return self.suppress(
                        SuppressReason::CooldownActive,
                        false,
                        format!(
                            "last change {} ago, cooldown {}",
                            format_duration(since_change.num_seconds()),
                            format_duration(cooldown.num_seconds()),
                        ),
                    );
                }
            }
        }

        if state.changes_in_trailing_30_days >= criteria.max_changes_per_month {
            return self.suppress(
                SuppressReason::MaxChangesPerMonthReached,
                false,
                format!(
                    "{} changes in trailing 30 days, cap {}",
                    state.changes_in_trailing_30_days, criteria.max_changes_per_month,
                ),
            );
        }

        if self.detector.is_anomalous(snapshot, baseline) {
            return self.suppress(
                SuppressReason::AnomalousSampleVolume,
                true,
                format!(
                    "{} flagged {} reports in window as implausibly low volume",
                    self.detector.name(),
                    snapshot.sample_count,
                ),
            );
        }

        GatedDecision::Apply
    }

    fn suppress(
        &self,
        reason: SuppressReason,
        needs_manual_review: bool,
        detail: String,
    ) -> GatedDecision {
        debug!(reason = reason.as_code(), %detail, "Recommendation suppressed");
        GatedDecision::Suppress {
            reason,
            needs_manual_review,
            detail,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{QualityBucket, TrendDirection};
    use uuid::Uuid;

    fn snapshot(sample_count: u32, window_days: i64) -> SpeakerPerformanceSnapshot {
        let end = Utc::now();
        SpeakerPerformanceSnapshot {
            speaker_id: Uuid::new_v4(),
            window_start: end - Duration::days(window_days),
            window_end: end,
            sample_count,
            mean_error_rate: 0.12,
            mean_acceptance_rate: 0.5,
            consistency: 0.05,
            trend: TrendDirection::Declining,
        }
    }

    fn state(
        bucket: QualityBucket,
        days_in_bucket: i64,
        days_since_change: Option<i64>,
        changes_30d: u32,
    ) -> SpeakerBucketState {
        let now = Utc::now();
        SpeakerBucketState {
            speaker_id: Uuid::new_v4(),
            current_bucket: bucket,
            entered_at: now - Duration::days(days_in_bucket),
            last_change_at: days_since_change.map(|d| now - Duration::days(d)),
            last_evaluated_at: None,
            changes_in_trailing_30_days: changes_30d,
        }
    }

    fn recommendation(action: ProgressionAction, severe: bool) -> ProgressionRecommendation {
        ProgressionRecommendation {
            action,
            target_bucket: match action {
                ProgressionAction::Promote => Some(QualityBucket::NoTouch),
                ProgressionAction::Demote => Some(QualityBucket::MediumTouch),
                ProgressionAction::None => None,
            },
            confidence: 0.9,
            promotion_factors: None,
            demotion_factors: None,
            severe_regression: severe,
            reason: "test".to_string(),
        }
    }

    fn policy() -> SafeguardPolicy {
        SafeguardPolicy::with_defaults(&EngineCriteria::default())
    }

    #[test]
    fn test_none_action_passes_through() {
        let decision = policy().gate(
            &recommendation(ProgressionAction::None, false),
            &state(QualityBucket::LowTouch, 1, Some(1), 5),
            &snapshot(10, 30),
            None,
            Utc::now(),
            &EngineCriteria::default(),
        );
        assert!(matches!(decision, GatedDecision::Apply));
    }

    #[test]
    fn test_dwell_time_suppresses_normal_demotion() {
        // 3 days in bucket against a 7-day minimum
        let decision = policy().gate(
            &recommendation(ProgressionAction::Demote, false),
            &state(QualityBucket::LowTouch, 3, None, 0),
            &snapshot(10, 30),
            None,
            Utc::now(),
            &EngineCriteria::default(),
        );
        match decision {
            GatedDecision::Suppress { reason, .. } => {
                assert_eq!(reason, SuppressReason::MinDaysInBucketNotMet)
            }
            GatedDecision::Apply => panic!("expected suppression"),
        }
    }

    #[test]
    fn test_severe_regression_bypasses_dwell_and_cooldown() {
        // 3 days in bucket and a 2-day-old change; severe demotion goes
        // straight through
        let decision = policy().gate(
            &recommendation(ProgressionAction::Demote, true),
            &state(QualityBucket::LowTouch, 3, Some(2), 0),
            &snapshot(10, 30),
            None,
            Utc::now(),
            &EngineCriteria::default(),
        );
        assert!(matches!(decision, GatedDecision::Apply));
    }

    #[test]
    fn test_promotion_never_bypasses_cooldown() {
        // Even a severe-flagged promotion stays subject to cooldown
        let decision = policy().gate(
            &recommendation(ProgressionAction::Promote, true),
            &state(QualityBucket::LowTouch, 30, Some(2), 0),
            &snapshot(10, 30),
            None,
            Utc::now(),
            &EngineCriteria::default(),
        );
        match decision {
            GatedDecision::Suppress { reason, .. } => {
                assert_eq!(reason, SuppressReason::CooldownActive)
            }
            GatedDecision::Apply => panic!("expected suppression"),
        }
    }

    #[test]
    fn test_monthly_change_cap_holds_even_for_severe_demotion() {
        let decision = policy().gate(
            &recommendation(ProgressionAction::Demote, true),
            &state(QualityBucket::LowTouch, 3, Some(1), 2),
            &snapshot(10, 30),
            None,
            Utc::now(),
            &EngineCriteria::default(),
        );
        match decision {
            GatedDecision::Suppress { reason, .. } => {
                assert_eq!(reason, SuppressReason::MaxChangesPerMonthReached)
            }
            GatedDecision::Apply => panic!("expected suppression"),
        }
    }

    #[test]
    fn test_anomalous_volume_requests_manual_review() {
        // Speaker historically averages 10 reports/day; 3 reports across a
        // 30-day window is far below a quarter of that
        let decision = policy().gate(
            &recommendation(ProgressionAction::Demote, false),
            &state(QualityBucket::LowTouch, 30, None, 0),
            &snapshot(3, 30),
            Some(VolumeBaseline { daily_average: 10.0 }),
            Utc::now(),
            &EngineCriteria::default(),
        );
        match decision {
            GatedDecision::Suppress {
                reason,
                needs_manual_review,
                ..
            } => {
                assert_eq!(reason, SuppressReason::AnomalousSampleVolume);
                assert!(needs_manual_review);
            }
            GatedDecision::Apply => panic!("expected suppression"),
        }
    }

    #[test]
    fn test_no_baseline_means_no_anomaly() {
        let detector = VolumeRatioDetector::new(0.25);
        assert!(!detector.is_anomalous(&snapshot(1, 30), None));
    }

    #[test]
    fn test_clean_state_applies() {
        let decision = policy().gate(
            &recommendation(ProgressionAction::Demote, false),
            &state(QualityBucket::LowTouch, 30, Some(20), 1),
            &snapshot(10, 30),
            Some(VolumeBaseline { daily_average: 0.4 }),
            Utc::now(),
            &EngineCriteria::default(),
        );
        assert!(matches!(decision, GatedDecision::Apply));
    }
}
