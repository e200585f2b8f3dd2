//! Read-path DTOs for polling callers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::job::{JobRecord, JobStatus, JobType};

/// Full status view of one job, safe to poll at arbitrary frequency.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReport {
    pub id: Uuid,
    pub job_type: JobType,
    pub description: String,
    pub status: JobStatus,
    pub progress: u8,
    pub current_step: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<i64>,
    /// Kinds only; storage paths stay server-side.
    pub output_file_kinds: Vec<String>,
    pub can_cancel: bool,
}

impl From<&JobRecord> for StatusReport {
    fn from(job: &JobRecord) -> Self {
        let mut output_file_kinds: Vec<String> = job.output_files.keys().cloned().collect();
        output_file_kinds.sort();

        Self {
            id: job.id,
            job_type: job.job_type,
            description: job.description.clone(),
            status: job.status,
            progress: job.progress,
            current_step: job.current_step.clone(),
            error_message: job.error_message.clone(),
            created_at: job.created_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
            duration_seconds: job.duration().map(|d| d.num_seconds()),
            output_file_kinds,
            can_cancel: job.status.is_cancellable(),
        }
    }
}

/// Lightweight summary for job listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSummary {
    pub id: Uuid,
    pub job_type: JobType,
    pub status: JobStatus,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

impl From<&JobRecord> for JobSummary {
    fn from(job: &JobRecord) -> Self {
        Self {
            id: job.id,
            job_type: job.job_type,
            status: job.status,
            description: job.description.clone(),
            created_at: job.created_at,
        }
    }
}
