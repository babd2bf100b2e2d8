//! Progression Evaluator Service
//!
//! Scores an aggregated performance snapshot against tier criteria and
//! decides: no change / promote / demote, with a confidence value and a
//! per-factor breakdown for the audit trail.
//!
//! # Scoring
//! Weighted sum of four factors, each normalized to [0, 1]:
//! - Error rate (weight 0.40): promotion measures headroom under the next
//!   bucket's ceiling; demotion measures overshoot past the current one
//! - Accuracy (0.30): correction-acceptance rate (or its complement)
//! - Consistency (0.15): error-rate standard deviation against full scale
//! - Trend (0.15): improving / stable / declining
//!
//! # Decision policy
//! - Thresholds are inclusive; an error rate exactly at a ceiling "meets"
//!   that bucket
//! - Demotion uses a smaller sample-size gate than promotion, so quality
//!   protection reacts faster than advancement
//! - When both directions trigger at once, demotion wins
//!
//! Pure function, no I/O, deterministic.

use crate::config::EngineCriteria;
use crate::types::{
    FactorBreakdown, FactorContribution, ProgressionAction, ProgressionRecommendation,
    QualityBucket, SpeakerPerformanceSnapshot, TrendDirection,
};
use tracing::debug;

/// Progression evaluator
#[derive(Debug, Clone, Default)]
pub struct ProgressionEvaluator;

impl ProgressionEvaluator {
    pub fn new() -> Self {
        Self
    }

    /// Evaluate a snapshot against the current bucket
    pub fn evaluate(
        &self,
        snapshot: &SpeakerPerformanceSnapshot,
        current_bucket: QualityBucket,
        criteria: &EngineCriteria,
    ) -> ProgressionRecommendation {
        let current_ceiling = criteria.ceilings.for_bucket(current_bucket);
        let severe_regression =
            snapshot.mean_error_rate > criteria.severe_regression_multiplier * current_ceiling;

        // Promotion path: enough samples and not already the highest tier
        let promotion = current_bucket.promoted().and_then(|target| {
            if snapshot.sample_count >= criteria.min_reports_for_promotion {
                Some((target, self.promotion_factors(snapshot, target, criteria)))
            } else {
                None
            }
        });

        // Demotion path: enough samples and not already the lowest tier;
        // the gate is smaller so demotion triggers faster than promotion
        let demotion = current_bucket.demoted().and_then(|target| {
            if snapshot.sample_count >= criteria.min_reports_for_demotion {
                Some((target, self.demotion_factors(snapshot, current_bucket, criteria)))
            } else {
                None
            }
        });

        let promotion_score = promotion.as_ref().map(|(_, f)| f.total());
        let demotion_score = demotion.as_ref().map(|(_, f)| f.total());

        debug!(
            speaker_id = %snapshot.speaker_id,
            current_bucket = current_bucket.as_str(),
            promotion_score = ?promotion_score,
            demotion_score = ?demotion_score,
            severe_regression,
            "Progression scoring complete"
        );

        // Demotion takes precedence over promotion: protecting quality is
        // weighted above advancing throughput
        if let Some((target, ref factors)) = demotion {
            let score = factors.total();
            if score >= criteria.demotion_confidence_threshold {
                return ProgressionRecommendation {
                    action: ProgressionAction::Demote,
                    target_bucket: Some(target),
                    confidence: score,
                    promotion_factors: promotion.map(|(_, f)| f),
                    demotion_factors: Some(factors.clone()),
                    severe_regression,
                    reason: format!(
                        "demotion confidence {:.2} at or above threshold {:.2} \
                         (mean error rate {:.3} against {} ceiling {:.3}{})",
                        score,
                        criteria.demotion_confidence_threshold,
                        snapshot.mean_error_rate,
                        current_bucket.as_str(),
                        current_ceiling,
                        if severe_regression { ", severe regression" } else { "" },
                    ),
                };
            }
        }

        if let Some((target, ref factors)) = promotion {
            let score = factors.total();
            if score >= criteria.promotion_confidence_threshold {
                return ProgressionRecommendation {
                    action: ProgressionAction::Promote,
                    target_bucket: Some(target),
                    confidence: score,
                    promotion_factors: Some(factors.clone()),
                    demotion_factors: demotion.map(|(_, f)| f),
                    severe_regression,
                    reason: format!(
                        "promotion confidence {:.2} at or above threshold {:.2} \
                         (mean error rate {:.3} under {} ceiling {:.3})",
                        score,
                        criteria.promotion_confidence_threshold,
                        snapshot.mean_error_rate,
                        target.as_str(),
                        criteria.ceilings.for_bucket(target),
                    ),
                };
            }
        }

        // No change: surface the strongest score so callers see how close
        // the call was
        let confidence = promotion_score
            .into_iter()
            .chain(demotion_score)
            .fold(0.0_f64, f64::max);

        let reason = match (promotion_score, demotion_score) {
            (Some(p), _) => format!(
                "promotion confidence {:.2} below threshold {:.2}",
                p, criteria.promotion_confidence_threshold
            ),
            (None, Some(d)) => format!(
                "demotion confidence {:.2} below threshold {:.2}",
                d, criteria.demotion_confidence_threshold
            ),
            (None, None) => format!(
                "no scorable path: {} reports in window (promotion needs {}, demotion {})",
                snapshot.sample_count,
                criteria.min_reports_for_promotion,
                criteria.min_reports_for_demotion,
            ),
        };

        ProgressionRecommendation {
            action: ProgressionAction::None,
            target_bucket: None,
            confidence,
            promotion_factors: promotion.map(|(_, f)| f),
            demotion_factors: demotion.map(|(_, f)| f),
            severe_regression,
            reason,
        }
    }

    /// Factors favoring "better than the next bucket's threshold"
    fn promotion_factors(
        &self,
        snapshot: &SpeakerPerformanceSnapshot,
        target: QualityBucket,
        criteria: &EngineCriteria,
    ) -> FactorBreakdown {
        let target_ceiling = criteria.ceilings.for_bucket(target);

        let error_factor = clamp01(1.0 - snapshot.mean_error_rate / target_ceiling);
        let accuracy_factor = clamp01(snapshot.mean_acceptance_rate);
        let consistency_factor =
            clamp01(1.0 - snapshot.consistency / criteria.consistency_full_scale);
        let trend_factor = match snapshot.trend {
            TrendDirection::Improving => 1.0,
            TrendDirection::Stable => 0.5,
            TrendDirection::Declining | TrendDirection::InsufficientData => 0.0,
        };

        FactorBreakdown {
            error_rate: FactorContribution::new(error_factor, criteria.weights.error_rate),
            accuracy: FactorContribution::new(accuracy_factor, criteria.weights.accuracy),
            consistency: FactorContribution::new(consistency_factor, criteria.weights.consistency),
            trend: FactorContribution::new(trend_factor, criteria.weights.trend),
        }
    }

    /// Mirror image: factors measuring deterioration against the current
    /// bucket's own ceiling
    fn demotion_factors(
        &self,
        snapshot: &SpeakerPerformanceSnapshot,
        current: QualityBucket,
        criteria: &EngineCriteria,
    ) -> FactorBreakdown {
        let current_ceiling = criteria.ceilings.for_bucket(current);

        // Zero while the rate still meets the ceiling (inclusive), full
        // scale once it doubles it
        let error_factor = clamp01(snapshot.mean_error_rate / current_ceiling - 1.0);
        let accuracy_factor = clamp01(1.0 - snapshot.mean_acceptance_rate);
        let consistency_factor = clamp01(snapshot.consistency / criteria.consistency_full_scale);
        let trend_factor = match snapshot.trend {
            TrendDirection::Declining => 1.0,
            TrendDirection::Stable => 0.5,
            TrendDirection::Improving | TrendDirection::InsufficientData => 0.0,
        };

        FactorBreakdown {
            error_rate: FactorContribution::new(error_factor, criteria.weights.error_rate),
            accuracy: FactorContribution::new(accuracy_factor, criteria.weights.accuracy),
            consistency: FactorContribution::new(consistency_factor, criteria.weights.consistency),
            trend: FactorContribution::new(trend_factor, criteria.weights.trend),
        }
    }
}

fn clamp01(value: f64) -> f64 {
    value.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    fn snapshot(
        sample_count: u32,
        mean_error_rate: f64,
        mean_acceptance_rate: f64,
        consistency: f64,
        trend: TrendDirection,
    ) -> SpeakerPerformanceSnapshot {
        let end = Utc::now();
        SpeakerPerformanceSnapshot {
            speaker_id: Uuid::new_v4(),
            window_start: end - Duration::days(30),
            window_end: end,
            sample_count,
            mean_error_rate,
            mean_acceptance_rate,
            consistency,
            trend,
        }
    }

    /// 12 reports, error 0.03, acceptance 0.90, consistency 0.02,
    /// improving, in MediumTouch: promotion score lands at 0.70, below the
    /// 0.80 threshold
    #[test]
    fn test_promotion_confidence_below_threshold() {
        let criteria = EngineCriteria::default();
        let snap = snapshot(12, 0.03, 0.90, 0.02, TrendDirection::Improving);

        let rec = ProgressionEvaluator::new().evaluate(&snap, QualityBucket::MediumTouch, &criteria);

        assert_eq!(rec.action, ProgressionAction::None);
        assert!((rec.confidence - 0.70).abs() < 1e-9, "got {}", rec.confidence);
        assert!(rec.reason.contains("below threshold"));

        let factors = rec.promotion_factors.expect("promotion path was scored");
        // 0.40 × (1 − 0.03/0.05) = 0.16
        assert!((factors.error_rate.weighted - 0.16).abs() < 1e-9);
        assert!((factors.accuracy.weighted - 0.27).abs() < 1e-9);
        assert!((factors.consistency.weighted - 0.12).abs() < 1e-9);
        assert!((factors.trend.weighted - 0.15).abs() < 1e-9);
    }

    /// Same speaker at error 0.015: promotion score 0.82 clears the
    /// threshold and targets LowTouch
    #[test]
    fn test_promotion_at_confidence_threshold() {
        let criteria = EngineCriteria::default();
        let snap = snapshot(12, 0.015, 0.90, 0.02, TrendDirection::Improving);

        let rec = ProgressionEvaluator::new().evaluate(&snap, QualityBucket::MediumTouch, &criteria);

        assert_eq!(rec.action, ProgressionAction::Promote);
        assert_eq!(rec.target_bucket, Some(QualityBucket::LowTouch));
        assert!((rec.confidence - 0.82).abs() < 1e-9, "got {}", rec.confidence);
    }

    #[test]
    fn test_promotion_blocked_below_sample_gate() {
        let criteria = EngineCriteria::default();
        // Would score well, but only 9 reports against a gate of 10
        let snap = snapshot(9, 0.005, 0.95, 0.01, TrendDirection::Improving);

        let rec = ProgressionEvaluator::new().evaluate(&snap, QualityBucket::MediumTouch, &criteria);

        assert_eq!(rec.action, ProgressionAction::None);
        assert!(rec.promotion_factors.is_none());
    }

    #[test]
    fn test_demotion_on_regression() {
        let criteria = EngineCriteria::default();
        // LowTouch ceiling is 0.05; rate 0.12 overshoots badly
        let snap = snapshot(8, 0.12, 0.40, 0.09, TrendDirection::Declining);

        let rec = ProgressionEvaluator::new().evaluate(&snap, QualityBucket::LowTouch, &criteria);

        assert_eq!(rec.action, ProgressionAction::Demote);
        assert_eq!(rec.target_bucket, Some(QualityBucket::MediumTouch));
        assert!(rec.confidence >= criteria.demotion_confidence_threshold);
        assert!(rec.severe_regression, "0.12 > 2 × 0.05");
    }

    #[test]
    fn test_error_rate_at_ceiling_is_not_deterioration() {
        let criteria = EngineCriteria::default();
        // Exactly at the LowTouch ceiling: "meets", not "exceeds"
        let snap = snapshot(10, 0.05, 0.80, 0.02, TrendDirection::Stable);

        let rec = ProgressionEvaluator::new().evaluate(&snap, QualityBucket::LowTouch, &criteria);
        let demotion = rec.demotion_factors.expect("demotion path was scored");
        assert_eq!(demotion.error_rate.value, 0.0);
        assert!(!rec.severe_regression);
    }

    #[test]
    fn test_demotion_takes_precedence_over_promotion() {
        let mut criteria = EngineCriteria::default();
        // Rig the thresholds so both directions pass at once
        criteria.promotion_confidence_threshold = 0.10;
        criteria.demotion_confidence_threshold = 0.10;
        criteria.validate().unwrap();

        // Declining trend + poor acceptance push demotion over its bar even
        // though the tiny promotion bar also clears
        let snap = snapshot(15, 0.02, 0.30, 0.05, TrendDirection::Declining);

        let rec = ProgressionEvaluator::new().evaluate(&snap, QualityBucket::MediumTouch, &criteria);
        assert_eq!(rec.action, ProgressionAction::Demote);
    }

    #[test]
    fn test_no_promotion_from_top_tier() {
        let criteria = EngineCriteria::default();
        let snap = snapshot(20, 0.001, 1.0, 0.001, TrendDirection::Improving);

        let rec = ProgressionEvaluator::new().evaluate(&snap, QualityBucket::NoTouch, &criteria);
        assert_eq!(rec.action, ProgressionAction::None);
        assert!(rec.promotion_factors.is_none());
    }

    #[test]
    fn test_no_demotion_from_bottom_tier() {
        let criteria = EngineCriteria::default();
        let snap = snapshot(20, 0.90, 0.10, 0.20, TrendDirection::Declining);

        let rec = ProgressionEvaluator::new().evaluate(&snap, QualityBucket::HighTouch, &criteria);
        assert_eq!(rec.action, ProgressionAction::None);
        assert!(rec.demotion_factors.is_none());
    }

    #[test]
    fn test_deterministic() {
        let criteria = EngineCriteria::default();
        let snap = snapshot(12, 0.03, 0.90, 0.02, TrendDirection::Improving);

        let evaluator = ProgressionEvaluator::new();
        let first = evaluator.evaluate(&snap, QualityBucket::MediumTouch, &criteria);
        let second = evaluator.evaluate(&snap, QualityBucket::MediumTouch, &criteria);

        assert_eq!(first.action, second.action);
        assert_eq!(first.confidence, second.confidence);
        assert_eq!(first.reason, second.reason);
    }
}
