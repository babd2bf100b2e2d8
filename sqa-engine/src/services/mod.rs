//! Engine services
//!
//! The pure pipeline stages (metric, aggregator, evaluator, safeguard) and
//! the orchestrator that runs them against the state store.

pub mod evaluation_orchestrator;
pub mod performance_aggregator;
pub mod progression_evaluator;
pub mod safeguard_policy;
pub mod text_error_metric;

pub use evaluation_orchestrator::EvaluationOrchestrator;
pub use performance_aggregator::{PerformanceAggregator, ReportStore, VolumeBaseline};
pub use progression_evaluator::ProgressionEvaluator;
pub use safeguard_policy::{AnomalyDetector, SafeguardPolicy, VolumeRatioDetector};
pub use text_error_metric::{ErrorMetric, QualityClass, TextErrorMetric};
