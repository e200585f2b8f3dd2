//! Submission gateway
//!
//! The in-crate boundary callers go through: submit, poll, list,
//! cancel, and manual cleanup. Raw submission payloads are parsed
//! into the closed per-type schemas here; a payload that does not
//! parse never creates a record.

use std::sync::Arc;

use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use colforge_core::domain::job::{JobRecord, JobStatus, JobType};
use colforge_core::domain::params::JobParameters;
use colforge_core::dto::{JobSummary, StatusReport};
use colforge_core::error::JobFailure;

use crate::queue::{CancelOutcome, QueueError, TaskPayload, TaskQueue};
use crate::store::{JobStore, StoreError};

#[derive(Debug, Error)]
pub enum GatewayError {
    /// The submission payload did not parse or failed validation.
    #[error(transparent)]
    Invalid(JobFailure),

    #[error("job not found: {0}")]
    NotFound(Uuid),

    /// Cleanup requested for a job that has not finished.
    #[error("job in status {0:?} cannot be cleaned up")]
    NotTerminal(JobStatus),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("store error: {0}")]
    Store(String),
}

impl From<StoreError> for GatewayError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => GatewayError::NotFound(id),
            other => GatewayError::Store(other.to_string()),
        }
    }
}

pub struct SubmissionGateway {
    store: Arc<dyn JobStore>,
    queue: TaskQueue,
}

impl SubmissionGateway {
    pub fn new(store: Arc<dyn JobStore>, queue: TaskQueue) -> Self {
        Self { store, queue }
    }

    /// Accepts a computation request: parse, persist as Queued,
    /// enqueue, remember the queue handle. Unknown fields or a
    /// payload of the wrong shape are rejected before any record
    /// exists.
    pub async fn submit(
        &self,
        job_type: JobType,
        principal: &str,
        raw_params: serde_json::Value,
        description: &str,
    ) -> Result<Uuid, GatewayError> {
        let parameters =
            JobParameters::from_submission(job_type, raw_params).map_err(GatewayError::Invalid)?;

        let job = JobRecord::new(principal, job_type, parameters, description);
        let job_id = job.id;
        self.store.create(job).await?;

        let handle = self
            .queue
            .enqueue(TaskPayload::Execute { job_id, attempt: 0 })
            .await?;
        self.store.set_queue_handle(job_id, handle).await?;

        info!(%job_id, job_type = job_type.as_str(), principal, "job submitted");
        Ok(job_id)
    }

    /// Idempotent status read, safe to poll at any frequency.
    pub async fn get_status(&self, job_id: Uuid) -> Result<StatusReport, GatewayError> {
        let job = self.store.find_by_id(job_id).await?;
        Ok(StatusReport::from(&job))
    }

    /// Summary listing of a principal's jobs, newest first.
    pub async fn list_jobs(&self, principal: &str) -> Result<Vec<JobSummary>, GatewayError> {
        let jobs = self.store.list_by_principal(principal).await?;
        Ok(jobs.iter().map(JobSummary::from).collect())
    }

    /// Cancels a job. Outside Queued/Running the answer is a typed
    /// "not cancellable" outcome, not an error. Cancellation is keyed
    /// by job id, not by the persisted queue handle, so a submission
    /// whose handle is still being recorded is signalled too.
    pub async fn cancel(&self, job_id: Uuid) -> Result<CancelOutcome, GatewayError> {
        let job = self.store.find_by_id(job_id).await?;
        if !job.status.is_cancellable() {
            return Ok(CancelOutcome::NotCancellable(job.status));
        }
        Ok(self.queue.cancel_job(job_id).await?)
    }

    /// Queues reclamation of a finished job's files on the
    /// maintenance lane. Already-expired jobs are accepted silently.
    pub async fn cleanup(&self, job_id: Uuid) -> Result<(), GatewayError> {
        let job = self.store.find_by_id(job_id).await?;
        if job.status == JobStatus::Expired {
            return Ok(());
        }
        if !job.status.is_terminal() {
            return Err(GatewayError::NotTerminal(job.status));
        }

        self.queue.enqueue(TaskPayload::Reclaim { job_id }).await?;
        info!(%job_id, "cleanup queued");
        Ok(())
    }
}
