//! Error types for the evaluation engine
//!
//! Business conditions (insufficient data, safeguard suppression) are normal
//! return values, never errors; only infrastructure failures surface here.
//! The orchestrator boundary turns these into retry-later outcomes.

use thiserror::Error;

/// Result type for engine operations
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Engine error type
#[derive(Debug, Error)]
pub enum EngineError {
    /// Criteria failed validation at load time
    #[error("Configuration error: {0}")]
    Config(String),

    /// An externally-owned dependency did not respond within the timeout;
    /// the evaluation is abandoned for this cycle and retried on the next
    /// trigger
    #[error("Timed out waiting on {dependency}")]
    DependencyTimeout { dependency: &'static str },

    /// The speaker's bucket changed since the snapshot was read
    #[error("Concurrency conflict: {0}")]
    Conflict(String),

    /// Database operation error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Snapshot serialization for the audit trail failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// sqa-common error
    #[error("Common error: {0}")]
    Common(#[from] sqa_common::Error),
}
