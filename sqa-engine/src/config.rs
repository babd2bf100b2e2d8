//! Engine criteria configuration
//!
//! All thresholds and weights live in one validated, immutable value that
//! is passed into every evaluation call; nothing in the engine mutates it.
//! Violations are rejected at load time, never at evaluation time.

use crate::error::{EngineError, EngineResult};
use crate::types::QualityBucket;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Maximum acceptable mean error rate per bucket (the bucket's "ceiling")
///
/// Ceilings must strictly increase with intervention level: a speaker good
/// enough for NoTouch tolerates far less error than one in HighTouch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BucketCeilings {
    pub high_touch: f64,
    pub medium_touch: f64,
    pub low_touch: f64,
    pub no_touch: f64,
}

impl Default for BucketCeilings {
    fn default() -> Self {
        Self {
            high_touch: 0.20,
            medium_touch: 0.10,
            low_touch: 0.05,
            no_touch: 0.02,
        }
    }
}

impl BucketCeilings {
    /// Ceiling for a given bucket
    pub fn for_bucket(&self, bucket: QualityBucket) -> f64 {
        match bucket {
            QualityBucket::HighTouch => self.high_touch,
            QualityBucket::MediumTouch => self.medium_touch,
            QualityBucket::LowTouch => self.low_touch,
            QualityBucket::NoTouch => self.no_touch,
        }
    }
}

/// Global weights for the four confidence-scoring factors; must sum to 1.0
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FactorWeights {
    pub error_rate: f64,
    pub accuracy: f64,
    pub consistency: f64,
    pub trend: f64,
}

impl Default for FactorWeights {
    fn default() -> Self {
        Self {
            error_rate: 0.40,
            accuracy: 0.30,
            consistency: 0.15,
            trend: 0.15,
        }
    }
}

impl FactorWeights {
    pub fn sum(&self) -> f64 {
        self.error_rate + self.accuracy + self.consistency + self.trend
    }
}

/// Error-rate thresholds for the text metric's quality classification
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricThresholds {
    /// Error rate at or below this classifies as high quality
    pub high_max_error_rate: f64,
    /// Error rate at or below this (and above high) classifies as medium
    pub medium_max_error_rate: f64,
}

impl Default for MetricThresholds {
    fn default() -> Self {
        Self {
            high_max_error_rate: 0.02,
            medium_max_error_rate: 0.10,
        }
    }
}

/// The complete engine criteria
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineCriteria {
    pub ceilings: BucketCeilings,
    pub weights: FactorWeights,
    pub metric: MetricThresholds,

    /// Promotion commits at or above this confidence
    pub promotion_confidence_threshold: f64,
    /// Demotion commits at or above this confidence; lower than promotion so
    /// demotion triggers faster
    pub demotion_confidence_threshold: f64,

    pub min_reports_for_promotion: u32,
    pub min_reports_for_demotion: u32,
    pub min_reports_for_trend: u32,

    /// Half-window mean error-rate delta below which the trend is stable
    pub trend_epsilon: f64,
    /// Consistency (std dev) mapping to a zero consistency factor
    pub consistency_full_scale: f64,

    /// Rolling evaluation window length
    pub evaluation_window_days: i64,

    /// Dwell time before a bucket is eligible for another change
    pub min_days_in_bucket: i64,
    /// Cooldown after any committed change
    pub cooldown_days: i64,
    /// Committed changes allowed in a trailing 30-day window
    pub max_changes_per_month: u32,
    /// Error rate beyond this multiple of the current ceiling counts as a
    /// severe regression (bypasses dwell/cooldown for demotions)
    pub severe_regression_multiplier: f64,

    /// Window daily volume below this fraction of the historical daily
    /// average flags the sample as anomalous (default volume-ratio detector)
    pub anomaly_min_volume_ratio: f64,

    /// Bucket assigned to speakers with no history ("start conservative")
    pub default_bucket: QualityBucket,
}

impl Default for EngineCriteria {
    fn default() -> Self {
        Self {
            ceilings: BucketCeilings::default(),
            weights: FactorWeights::default(),
            metric: MetricThresholds::default(),
            promotion_confidence_threshold: 0.80,
            demotion_confidence_threshold: 0.75,
            min_reports_for_promotion: 10,
            min_reports_for_demotion: 5,
            min_reports_for_trend: 5,
            trend_epsilon: 0.01,
            consistency_full_scale: 0.1,
            evaluation_window_days: 30,
            min_days_in_bucket: 7,
            cooldown_days: 14,
            max_changes_per_month: 2,
            severe_regression_multiplier: 2.0,
            anomaly_min_volume_ratio: 0.25,
            default_bucket: QualityBucket::HighTouch,
        }
    }
}

impl EngineCriteria {
    /// Load criteria from a TOML file and validate; missing fields take
    /// their defaults
    pub fn load(path: &Path) -> EngineResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("Read criteria file failed: {}", e)))?;
        let criteria: EngineCriteria = toml::from_str(&content)
            .map_err(|e| EngineError::Config(format!("Parse criteria file failed: {}", e)))?;
        criteria.validate()?;
        Ok(criteria)
    }

    /// Built-in defaults, validated
    pub fn default_validated() -> EngineResult<Self> {
        let criteria = Self::default();
        criteria.validate()?;
        Ok(criteria)
    }

    /// Fail-fast validation of the full criteria value
    pub fn validate(&self) -> EngineResult<()> {
        let weight_sum = self.weights.sum();
        if (weight_sum - 1.0).abs() > 1e-6 {
            return Err(EngineError::Config(format!(
                "Factor weights must sum to 1.0, got {}",
                weight_sum
            )));
        }

        // Ceilings strictly increase from NoTouch to HighTouch
        let c = &self.ceilings;
        if !(c.no_touch < c.low_touch && c.low_touch < c.medium_touch && c.medium_touch < c.high_touch)
        {
            return Err(EngineError::Config(format!(
                "Bucket ceilings must strictly increase from no_touch to high_touch, \
                 got {} / {} / {} / {}",
                c.no_touch, c.low_touch, c.medium_touch, c.high_touch
            )));
        }
        for bucket in QualityBucket::ALL {
            let ceiling = c.for_bucket(bucket);
            if ceiling <= 0.0 || ceiling > 1.0 {
                return Err(EngineError::Config(format!(
                    "Ceiling for {} out of range (0, 1]: {}",
                    bucket.as_str(),
                    ceiling
                )));
            }
        }

        for (name, value) in [
            ("promotion_confidence_threshold", self.promotion_confidence_threshold),
            ("demotion_confidence_threshold", self.demotion_confidence_threshold),
        ] {
            if value <= 0.0 || value > 1.0 {
                return Err(EngineError::Config(format!(
                    "{} out of range (0, 1]: {}",
                    name, value
                )));
            }
        }

        if self.metric.high_max_error_rate >= self.metric.medium_max_error_rate {
            return Err(EngineError::Config(format!(
                "Metric thresholds must increase: high {} >= medium {}",
                self.metric.high_max_error_rate, self.metric.medium_max_error_rate
            )));
        }

        if self.min_reports_for_demotion > self.min_reports_for_promotion {
            return Err(EngineError::Config(format!(
                "min_reports_for_demotion ({}) must not exceed min_reports_for_promotion ({})",
                self.min_reports_for_demotion, self.min_reports_for_promotion
            )));
        }

        if self.evaluation_window_days <= 0 {
            return Err(EngineError::Config(
                "evaluation_window_days must be positive".to_string(),
            ));
        }
        if self.min_days_in_bucket < 0 || self.cooldown_days < 0 {
            return Err(EngineError::Config(
                "dwell and cooldown durations must not be negative".to_string(),
            ));
        }
        if self.severe_regression_multiplier <= 1.0 {
            return Err(EngineError::Config(format!(
                "severe_regression_multiplier must exceed 1.0, got {}",
                self.severe_regression_multiplier
            )));
        }
        if self.consistency_full_scale <= 0.0 {
            return Err(EngineError::Config(
                "consistency_full_scale must be positive".to_string(),
            ));
        }
        if self.anomaly_min_volume_ratio < 0.0 || self.anomaly_min_volume_ratio >= 1.0 {
            return Err(EngineError::Config(format!(
                "anomaly_min_volume_ratio out of range [0, 1): {}",
                self.anomaly_min_volume_ratio
            )));
        }

        Ok(())
    }
}
