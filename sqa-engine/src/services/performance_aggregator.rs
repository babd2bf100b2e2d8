//! Performance Aggregator Service
//!
//! Rolls a speaker's recent error reports up into one
//! `SpeakerPerformanceSnapshot` per evaluation: sample count, mean error
//! rate, mean correction-acceptance rate, consistency (population standard
//! deviation of the error rate), and trend direction.
//!
//! The report store is an externally-owned, potentially-slow dependency;
//! it sits behind the `ReportStore` trait and the orchestrator wraps calls
//! in a timeout. The statistics themselves are pure over the fetched rows.

use crate::error::EngineResult;
use crate::services::text_error_metric::TextErrorMetric;
use crate::types::{ErrorReport, SpeakerPerformanceSnapshot, TrendDirection};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Historical report-volume baseline for a speaker (pre-window)
#[derive(Debug, Clone, Copy)]
pub struct VolumeBaseline {
    /// Average reports per day before the evaluation window
    pub daily_average: f64,
}

/// Read-only access to the external error-report store
#[async_trait]
pub trait ReportStore: Send + Sync {
    /// List a speaker's reports within a time window, oldest first
    async fn list_reports(
        &self,
        speaker_id: Uuid,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> EngineResult<Vec<ErrorReport>>;

    /// Historical daily report volume before a cutoff, None when the
    /// speaker has no prior history to compare against
    async fn volume_baseline(
        &self,
        speaker_id: Uuid,
        before: DateTime<Utc>,
    ) -> EngineResult<Option<VolumeBaseline>>;
}

/// Performance aggregator
pub struct PerformanceAggregator {
    reports: Arc<dyn ReportStore>,
    metric: TextErrorMetric,
    /// Below this sample count the trend is `insufficient_data`
    min_reports_for_trend: u32,
    /// Half-window mean delta below which the trend is `stable`
    trend_epsilon: f64,
}

impl PerformanceAggregator {
    pub fn new(
        reports: Arc<dyn ReportStore>,
        metric: TextErrorMetric,
        min_reports_for_trend: u32,
        trend_epsilon: f64,
    ) -> Self {
        Self {
            reports,
            metric,
            min_reports_for_trend,
            trend_epsilon,
        }
    }

    /// Fetch the window's reports and summarize them
    ///
    /// An empty window produces the explicit insufficient-data snapshot,
    /// not an error; callers treat it as "no recommendation possible".
    pub async fn aggregate(
        &self,
        speaker_id: Uuid,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> EngineResult<SpeakerPerformanceSnapshot> {
        let reports = self
            .reports
            .list_reports(speaker_id, window_start, window_end)
            .await?;

        debug!(
            speaker_id = %speaker_id,
            sample_count = reports.len(),
            "Aggregating performance window"
        );

        Ok(self.summarize(speaker_id, window_start, window_end, &reports))
    }

    /// Pure summary over already-fetched reports
    pub fn summarize(
        &self,
        speaker_id: Uuid,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
        reports: &[ErrorReport],
    ) -> SpeakerPerformanceSnapshot {
        if reports.is_empty() {
            return SpeakerPerformanceSnapshot::insufficient(speaker_id, window_start, window_end);
        }

        let n = reports.len() as f64;

        let error_rates: Vec<f64> = reports
            .iter()
            .map(|r| {
                self.metric
                    .compute(&r.original_text, &r.corrected_text)
                    .error_rate
            })
            .collect();

        let mean_error_rate = error_rates.iter().sum::<f64>() / n;

        let accepted = reports.iter().filter(|r| r.accepted).count() as f64;
        let mean_acceptance_rate = accepted / n;

        // Population standard deviation: every report in the window is the
        // population, not a sample of one
        let variance = error_rates
            .iter()
            .map(|rate| (rate - mean_error_rate).powi(2))
            .sum::<f64>()
            / n;
        let consistency = variance.sqrt();

        let trend = self.classify_trend(window_start, window_end, reports, &error_rates);

        SpeakerPerformanceSnapshot {
            speaker_id,
            window_start,
            window_end,
            sample_count: reports.len() as u32,
            mean_error_rate,
            mean_acceptance_rate,
            consistency,
            trend,
        }
    }

    /// Split the window into two equal halves by timestamp and compare
    /// half means
    fn classify_trend(
        &self,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
        reports: &[ErrorReport],
        error_rates: &[f64],
    ) -> TrendDirection {
        if (reports.len() as u32) < self.min_reports_for_trend {
            return TrendDirection::InsufficientData;
        }

        let midpoint = window_start + (window_end - window_start) / 2;

        let mut earlier = Vec::new();
        let mut later = Vec::new();
        for (report, rate) in reports.iter().zip(error_rates) {
            if report.submitted_at < midpoint {
                earlier.push(*rate);
            } else {
                later.push(*rate);
            }
        }

        // All activity bunched in one half gives nothing to compare
        if earlier.is_empty() || later.is_empty() {
            return TrendDirection::Stable;
        }

        let earlier_mean = earlier.iter().sum::<f64>() / earlier.len() as f64;
        let later_mean = later.iter().sum::<f64>() / later.len() as f64;

        if later_mean < earlier_mean - self.trend_epsilon {
            TrendDirection::Improving
        } else if later_mean > earlier_mean + self.trend_epsilon {
            TrendDirection::Declining
        } else {
            TrendDirection::Stable
        }
    }

    /// Historical volume baseline passthrough for the safeguard's anomaly
    /// check
    pub async fn volume_baseline(
        &self,
        speaker_id: Uuid,
        before: DateTime<Utc>,
    ) -> EngineResult<Option<VolumeBaseline>> {
        self.reports.volume_baseline(speaker_id, before).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    struct FixedReports(Vec<ErrorReport>);

    #[async_trait]
    impl ReportStore for FixedReports {
        async fn list_reports(
            &self,
            _speaker_id: Uuid,
            _window_start: DateTime<Utc>,
            _window_end: DateTime<Utc>,
        ) -> EngineResult<Vec<ErrorReport>> {
            Ok(self.0.clone())
        }

        async fn volume_baseline(
            &self,
            _speaker_id: Uuid,
            _before: DateTime<Utc>,
        ) -> EngineResult<Option<VolumeBaseline>> {
            Ok(None)
        }
    }

    fn report(speaker_id: Uuid, original: &str, corrected: &str, accepted: bool, at: DateTime<Utc>) -> ErrorReport {
        ErrorReport {
            id: Uuid::new_v4(),
            speaker_id,
            original_text: original.to_string(),
            corrected_text: corrected.to_string(),
            severity: "medium".to_string(),
            accepted,
            submitted_at: at,
        }
    }

    fn aggregator(reports: Vec<ErrorReport>) -> PerformanceAggregator {
        PerformanceAggregator::new(
            Arc::new(FixedReports(reports)),
            TextErrorMetric::default(),
            5,
            0.01,
        )
    }

    #[tokio::test]
    async fn test_empty_window_yields_insufficient_snapshot() {
        let speaker = Uuid::new_v4();
        let end = Utc::now();
        let start = end - Duration::days(30);

        let snapshot = aggregator(vec![])
            .aggregate(speaker, start, end)
            .await
            .unwrap();

        assert_eq!(snapshot.sample_count, 0);
        assert_eq!(snapshot.trend, TrendDirection::InsufficientData);
    }

    #[tokio::test]
    async fn test_means_and_acceptance() {
        let speaker = Uuid::new_v4();
        let end = Utc::now();
        let start = end - Duration::days(30);

        // Two clean reports, one with 1 substitution out of 4 tokens
        let reports = vec![
            report(speaker, "a b c d", "a b c d", true, start + Duration::days(5)),
            report(speaker, "a b c d", "a b c d", true, start + Duration::days(10)),
            report(speaker, "a b c d", "a b x d", false, start + Duration::days(20)),
        ];

        let snapshot = aggregator(reports).aggregate(speaker, start, end).await.unwrap();

        assert_eq!(snapshot.sample_count, 3);
        assert!((snapshot.mean_error_rate - 0.25 / 3.0).abs() < 1e-12);
        assert!((snapshot.mean_acceptance_rate - 2.0 / 3.0).abs() < 1e-12);
        // Below min_reports_for_trend
        assert_eq!(snapshot.trend, TrendDirection::InsufficientData);
    }

    #[tokio::test]
    async fn test_consistency_zero_for_uniform_rates() {
        let speaker = Uuid::new_v4();
        let end = Utc::now();
        let start = end - Duration::days(30);

        let reports: Vec<ErrorReport> = (0..6)
            .map(|i| report(speaker, "a b c d", "a b c d", true, start + Duration::days(i * 4)))
            .collect();

        let snapshot = aggregator(reports).aggregate(speaker, start, end).await.unwrap();
        assert_eq!(snapshot.consistency, 0.0);
    }

    #[tokio::test]
    async fn test_improving_trend() {
        let speaker = Uuid::new_v4();
        let end = Utc::now();
        let start = end - Duration::days(30);

        // Earlier half: 1 error in 4 tokens per report; later half: clean
        let mut reports = Vec::new();
        for i in 0..3 {
            reports.push(report(
                speaker,
                "a b c d",
                "a b x d",
                true,
                start + Duration::days(2 + i),
            ));
        }
        for i in 0..3 {
            reports.push(report(
                speaker,
                "a b c d",
                "a b c d",
                true,
                start + Duration::days(20 + i),
            ));
        }

        let snapshot = aggregator(reports).aggregate(speaker, start, end).await.unwrap();
        assert_eq!(snapshot.trend, TrendDirection::Improving);
    }

    #[tokio::test]
    async fn test_declining_trend() {
        let speaker = Uuid::new_v4();
        let end = Utc::now();
        let start = end - Duration::days(30);

        let mut reports = Vec::new();
        for i in 0..3 {
            reports.push(report(
                speaker,
                "a b c d",
                "a b c d",
                true,
                start + Duration::days(2 + i),
            ));
        }
        for i in 0..3 {
            reports.push(report(
                speaker,
                "a b c d",
                "x b y d",
                true,
                start + Duration::days(20 + i),
            ));
        }

        let snapshot = aggregator(reports).aggregate(speaker, start, end).await.unwrap();
        assert_eq!(snapshot.trend, TrendDirection::Declining);
    }

    #[tokio::test]
    async fn test_one_sided_activity_is_stable() {
        let speaker = Uuid::new_v4();
        let end = Utc::now();
        let start = end - Duration::days(30);

        // All reports land in the later half
        let reports: Vec<ErrorReport> = (0..6)
            .map(|i| report(speaker, "a b c d", "a b c d", true, start + Duration::days(20 + i)))
            .collect();

        let snapshot = aggregator(reports).aggregate(speaker, start, end).await.unwrap();
        assert_eq!(snapshot.trend, TrendDirection::Stable);
    }
}
