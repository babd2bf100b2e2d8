//! Event types for the SQA event system
//!
//! Provides shared event definitions and the EventBus used by the
//! evaluation engine and its administrative tools. The REST layer and the
//! ingestion pipeline subscribe to this bus; the engine only publishes.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// SQA event types
///
/// Events are broadcast via EventBus; all cross-component signaling uses
/// this central enum for type safety and exhaustive matching. Bucket values
/// are carried as their string form so subscribers outside the engine crate
/// can consume events without depending on engine types.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum QaEvent {
    /// A new error report was recorded for a speaker
    ///
    /// Triggers:
    /// - Orchestrator: schedule an evaluation for the speaker
    ReportRecorded {
        /// Speaker the report belongs to
        speaker_id: Uuid,
        /// Report UUID
        report_id: Uuid,
        /// When the report was recorded
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A speaker's bucket changed (committed to the audit trail)
    ///
    /// Triggers:
    /// - Routing: transcripts for this speaker follow the new tier
    /// - Dashboards: refresh speaker listings
    BucketChanged {
        /// Speaker whose bucket changed
        speaker_id: Uuid,
        /// Audit record UUID
        record_id: Uuid,
        /// Bucket before the change
        previous_bucket: String,
        /// Bucket after the change
        new_bucket: String,
        /// Confidence of the recommendation that drove the change
        confidence: f64,
        /// Human-readable reason
        reason: String,
        /// "system" or the overriding user's UUID
        actor: String,
        /// When the change was committed
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A recommendation existed but a safeguard suppressed it
    ///
    /// Informational, not an error; the reason code is machine-readable.
    EvaluationSuppressed {
        /// Speaker that was evaluated
        speaker_id: Uuid,
        /// Machine-readable suppression reason code
        reason_code: String,
        /// Bucket the recommendation would have moved to
        would_have_changed_to: String,
        /// Whether the suppression requests manual review
        needs_manual_review: bool,
        /// When the evaluation completed
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// An evaluation completed without enough history to recommend anything
    EvaluationInsufficientData {
        /// Speaker that was evaluated
        speaker_id: Uuid,
        /// Reports found in the evaluation window
        sample_count: u32,
        /// When the evaluation completed
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// An evaluation was abandoned because a dependency failed or timed out
    ///
    /// Triggers:
    /// - Orchestrator: retry on the next trigger for this speaker
    EvaluationFailed {
        /// Speaker that was being evaluated
        speaker_id: Uuid,
        /// Error summary (never a raw stack trace)
        error: String,
        /// When the failure occurred
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A supervisor forced a speaker into a bucket
    ManualOverrideApplied {
        /// Speaker that was overridden
        speaker_id: Uuid,
        /// Audit record UUID
        record_id: Uuid,
        /// Bucket the speaker was forced into
        new_bucket: String,
        /// Overriding user's UUID
        user_id: Uuid,
        /// When the override was committed
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A batch sweep started
    SweepStarted {
        /// Sweep invocation UUID
        sweep_id: Uuid,
        /// Cap on the number of speakers this sweep may evaluate
        max_profiles: u32,
        /// When the sweep started
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A batch sweep finished (completed or cancelled)
    SweepCompleted {
        /// Sweep invocation UUID
        sweep_id: Uuid,
        /// Speakers evaluated
        evaluated_count: u32,
        /// Speakers whose bucket changed
        changed_count: u32,
        /// Whether the sweep was cancelled before finishing
        cancelled: bool,
        /// When the sweep finished
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl QaEvent {
    /// Get event type as string for filtering
    pub fn event_type(&self) -> &str {
        match self {
            QaEvent::ReportRecorded { .. } => "ReportRecorded",
            QaEvent::BucketChanged { .. } => "BucketChanged",
            QaEvent::EvaluationSuppressed { .. } => "EvaluationSuppressed",
            QaEvent::EvaluationInsufficientData { .. } => "EvaluationInsufficientData",
            QaEvent::EvaluationFailed { .. } => "EvaluationFailed",
            QaEvent::ManualOverrideApplied { .. } => "ManualOverrideApplied",
            QaEvent::SweepStarted { .. } => "SweepStarted",
            QaEvent::SweepCompleted { .. } => "SweepCompleted",
        }
    }
}

// ========================================
// EventBus Implementation
// ========================================

/// Central event distribution bus
///
/// Uses tokio::broadcast internally, providing:
/// - Non-blocking publish (slow subscribers don't block producers)
/// - Multiple concurrent subscribers
/// - Automatic cleanup when subscribers drop
/// - Lagged message detection for slow subscribers
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<QaEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<QaEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists,
    /// `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(&self, event: QaEvent) -> Result<usize, broadcast::error::SendError<QaEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: QaEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
