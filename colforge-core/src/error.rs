//! Failure taxonomy
//!
//! One classification function, [`JobFailure::is_retryable`], decides
//! retry versus terminal failure. Executors and the materializer only
//! produce failures; the queue worker is the only place that consults
//! the classification and the remaining retry budget.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classified failure of one execution attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
pub enum JobFailure {
    /// Bad input. Never retried — no retry can fix bad parameters.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Config artifact could not be produced or verified. Validation
    /// problems are reported as [`JobFailure::Validation`] directly,
    /// so everything left here is environmental and retryable.
    #[error("config materialization failed: {0}")]
    Materialize(String),

    /// External tool exited non-zero. Captured stderr travels with
    /// the failure for diagnostics.
    #[error("colbuilder exited with code {exit_code}: {stderr}")]
    Subprocess { exit_code: i32, stderr: String },

    /// Zero exit but a documented artifact is absent from the workdir.
    #[error("expected artifact missing after successful exit: {0}")]
    MissingArtifact(String),

    /// Soft time limit hit; the run was stopped cleanly and may retry.
    #[error("soft time limit exceeded")]
    SoftTimeout,

    /// Hard time limit hit; the process was force-killed.
    #[error("hard time limit exceeded, process killed")]
    HardTimeout,

    /// Execution interrupted by a cancellation request.
    #[error("cancelled")]
    Cancelled,

    /// Persistence failure below the job's own state machine.
    #[error("store error: {0}")]
    Store(String),

    /// Transient filesystem or environment error.
    #[error("i/o error: {0}")]
    Io(String),
}

impl JobFailure {
    /// Whether the queue may re-dispatch after this failure, budget
    /// permitting.
    pub fn is_retryable(&self) -> bool {
        match self {
            JobFailure::Validation(_) | JobFailure::HardTimeout | JobFailure::Cancelled => false,
            JobFailure::Materialize(_)
            | JobFailure::Subprocess { .. }
            | JobFailure::MissingArtifact(_)
            | JobFailure::SoftTimeout
            | JobFailure::Store(_)
            | JobFailure::Io(_) => true,
        }
    }

    /// Short taxonomy kind, prefixed to user-visible error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            JobFailure::Validation(_) => "validation",
            JobFailure::Materialize(_) => "materialize",
            JobFailure::Subprocess { .. } => "subprocess",
            JobFailure::MissingArtifact(_) => "missing-artifact",
            JobFailure::SoftTimeout | JobFailure::HardTimeout => "timeout",
            JobFailure::Cancelled => "cancelled",
            JobFailure::Store(_) => "store",
            JobFailure::Io(_) => "io",
        }
    }
}

impl From<std::io::Error> for JobFailure {
    fn from(err: std::io::Error) -> Self {
        JobFailure::Io(err.to_string())
    }
}
