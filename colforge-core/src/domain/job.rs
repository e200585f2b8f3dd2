//! Job record and status state machine
//!
//! Every status change in the system is expressed as a [`Transition`]
//! and applied through [`JobRecord::apply`]. The store performs the
//! apply under its own lock, which gives compare-and-set semantics:
//! a transition reads the latest persisted status and either moves it
//! or is rejected without touching the record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::domain::params::JobParameters;

/// Kind of computation a job performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Molecule,
    Fibril,
    MixedCrosslinks,
    DensityChange,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Molecule => "molecule",
            JobType::Fibril => "fibril",
            JobType::MixedCrosslinks => "mixed_crosslinks",
            JobType::DensityChange => "density_change",
        }
    }

    /// Short kind used for the on-disk config artifact name
    /// (`<kind>_config.yaml`). Both crosslink modification jobs share
    /// the `modification` config shape.
    pub fn config_kind(&self) -> &'static str {
        match self {
            JobType::Molecule => "molecule",
            JobType::Fibril => "fibril",
            JobType::MixedCrosslinks | JobType::DensityChange => "modification",
        }
    }
}

/// Job lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Initial state when the job is created
    Queued,
    /// A worker is executing the job
    Running,
    /// Job failed but will be re-dispatched
    Retrying,
    /// Job finished successfully
    Completed,
    /// Job failed and won't be retried
    Failed,
    /// Job was cancelled by the owning principal
    Cancelled,
    /// Job files have been reclaimed by the expiry sweep
    Expired,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Retrying => "retrying",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Expired => "expired",
        }
    }

    /// Terminal with respect to worker dispatch: no transition other
    /// than expiry (and nothing at all out of Expired) may leave it.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled | JobStatus::Expired
        )
    }

    pub fn is_active(&self) -> bool {
        matches!(
            self,
            JobStatus::Queued | JobStatus::Running | JobStatus::Retrying
        )
    }

    /// Only queued and running jobs may be cancelled.
    pub fn is_cancellable(&self) -> bool {
        matches!(self, JobStatus::Queued | JobStatus::Running)
    }
}

/// A single status change request
#[derive(Debug, Clone)]
pub enum Transition {
    /// Queued/Retrying → Running, on dispatch to a worker
    Dispatch,
    /// Running → Completed, carrying the artifacts to register
    Complete { output_files: HashMap<String, String> },
    /// Queued/Running/Retrying → Failed (queued and retrying for
    /// validation failures caught before anything was spawned)
    Fail { error: String },
    /// Running → Retrying, on a retryable failure with budget left
    Retry { error: String },
    /// Queued/Running → Cancelled
    Cancel,
    /// Completed/Failed/Cancelled → Expired (expiry sweep only)
    Expire,
}

impl Transition {
    pub fn name(&self) -> &'static str {
        match self {
            Transition::Dispatch => "dispatch",
            Transition::Complete { .. } => "complete",
            Transition::Fail { .. } => "fail",
            Transition::Retry { .. } => "retry",
            Transition::Cancel => "cancel",
            Transition::Expire => "expire",
        }
    }
}

/// Rejected status change; the record is left untouched.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot {attempted} job in status {from:?}")]
pub struct TransitionError {
    pub from: JobStatus,
    pub attempted: &'static str,
}

/// Persistent record of one computation request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: Uuid,
    /// Owning principal (opaque to the core)
    pub principal: String,
    pub job_type: JobType,
    pub description: String,
    pub status: JobStatus,
    /// 0–100, meaningful only while Running/Retrying; forced to 100
    /// on completion
    pub progress: u8,
    pub current_step: Option<String>,
    /// Set only on failure (or cancellation)
    pub error_message: Option<String>,
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    /// Handle into the task queue's bookkeeping, for cancellation
    pub queue_handle: Option<Uuid>,
    pub parameters: JobParameters,
    /// Logical file kind → storage path
    pub input_files: HashMap<String, String>,
    pub output_files: HashMap<String, String>,
}

impl JobRecord {
    pub fn new(
        principal: impl Into<String>,
        job_type: JobType,
        parameters: JobParameters,
        description: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            principal: principal.into(),
            job_type,
            description: description.into(),
            status: JobStatus::Queued,
            progress: 0,
            current_step: None,
            error_message: None,
            retry_count: 0,
            created_at: now,
            started_at: None,
            completed_at: None,
            updated_at: now,
            queue_handle: None,
            parameters,
            input_files: HashMap::new(),
            output_files: HashMap::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// Wall-clock duration of the execution, if it has started.
    pub fn duration(&self) -> Option<chrono::Duration> {
        let started = self.started_at?;
        let end = self.completed_at.unwrap_or_else(Utc::now);
        Some(end - started)
    }

    /// Applies a transition, or rejects it leaving the record unchanged.
    pub fn apply(&mut self, transition: Transition, now: DateTime<Utc>) -> Result<(), TransitionError> {
        let from = self.status;
        let rejected = move |attempted| Err(TransitionError { from, attempted });

        match transition {
            Transition::Dispatch => {
                if !matches!(self.status, JobStatus::Queued | JobStatus::Retrying) {
                    return rejected("dispatch");
                }
                self.status = JobStatus::Running;
                if self.started_at.is_none() {
                    self.started_at = Some(now);
                }
                // New attempt: progress starts over
                self.progress = 0;
                self.current_step = Some("dispatched to worker".to_string());
            }
            Transition::Complete { output_files } => {
                if self.status != JobStatus::Running {
                    return rejected("complete");
                }
                self.status = JobStatus::Completed;
                self.progress = 100;
                self.completed_at = Some(now);
                self.output_files.extend(output_files);
            }
            Transition::Fail { error } => {
                if !matches!(
                    self.status,
                    JobStatus::Queued | JobStatus::Running | JobStatus::Retrying
                ) {
                    return rejected("fail");
                }
                self.status = JobStatus::Failed;
                self.error_message = Some(error);
                self.completed_at = Some(now);
            }
            Transition::Retry { error } => {
                if self.status != JobStatus::Running {
                    return rejected("retry");
                }
                self.status = JobStatus::Retrying;
                self.retry_count += 1;
                self.current_step = Some(format!("retrying after: {error}"));
            }
            Transition::Cancel => {
                if !self.status.is_cancellable() {
                    return rejected("cancel");
                }
                self.status = JobStatus::Cancelled;
                self.error_message = Some("cancelled by user".to_string());
                self.completed_at = Some(now);
            }
            Transition::Expire => {
                if !matches!(
                    self.status,
                    JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
                ) {
                    return rejected("expire");
                }
                self.status = JobStatus::Expired;
                self.input_files.clear();
                self.output_files.clear();
            }
        }

        self.updated_at = now;
        Ok(())
    }

    /// Records progress, valid only while Running/Retrying. Progress
    /// is monotone within an attempt; stale (lower) reports are
    /// absorbed rather than rejected.
    pub fn record_progress(
        &mut self,
        progress: u8,
        step: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        if !matches!(self.status, JobStatus::Running | JobStatus::Retrying) {
            return Err(TransitionError {
                from: self.status,
                attempted: "progress",
            });
        }
        self.progress = self.progress.max(progress.min(100));
        self.current_step = Some(step.into());
        self.updated_at = now;
        Ok(())
    }
}
