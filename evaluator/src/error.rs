//! Evaluator error types
//!
//! Every error is local to a single call: the evaluator guarantees that no
//! per-subject state was created or mutated when one of these is returned.

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

/// Result type alias for evaluator operations
pub type EvaluatorResult<T> = Result<T, EvaluatorError>;

/// Errors returned by [`crate::EscalationEvaluator`]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvaluatorError {
    /// Malformed snapshot or identifier. Not retryable; the caller must
    /// supply corrected input.
    #[error("Invalid input: {reason}")]
    InvalidInput { reason: String },

    /// Snapshot older than the configured staleness bound. The caller
    /// should re-ingest a fresh observation.
    #[error("Stale snapshot: recorded at {recorded_at}, {age_secs}s old (bound {bound_secs}s)")]
    StaleInput {
        recorded_at: DateTime<Utc>,
        age_secs: i64,
        bound_secs: i64,
    },

    /// Per-subject state lock was poisoned by a panicking holder
    #[error("State for subject {subject_id} is unavailable (lock poisoned)")]
    StatePoisoned { subject_id: String },
}

impl EvaluatorError {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            reason: reason.into(),
        }
    }

    pub(crate) fn stale(recorded_at: DateTime<Utc>, age: Duration, bound: Duration) -> Self {
        Self::StaleInput {
            recorded_at,
            age_secs: age.num_seconds(),
            bound_secs: bound.num_seconds(),
        }
    }

    /// Whether re-submitting a fresher observation could succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StaleInput { .. })
    }
}

/// Rejected evaluator configuration
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Invalid evaluator configuration: {field}: {message}")]
pub struct ConfigError {
    pub field: &'static str,
    pub message: String,
}

impl ConfigError {
    pub(crate) fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}
