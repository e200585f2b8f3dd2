//! Lane worker loop
//!
//! Each worker pulls one envelope at a time off its lane's shared
//! receiver. Execution is bracketed by store transitions: dispatch
//! before the run, exactly one of complete / retry / fail after it.
//! A transition the store rejects means another actor (cancellation,
//! usually) won the race, and the worker's report is discarded.

use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use colforge_core::domain::job::{JobStatus, Transition};
use colforge_core::error::JobFailure;

use crate::progress::StoreProgressReporter;
use crate::scheduler;
use crate::store::StoreError;

use super::{Envelope, Lane, QueueInner, TaskPayload};

pub(super) async fn worker_loop(
    inner: Arc<QueueInner>,
    lane: Lane,
    index: usize,
    receiver: Arc<Mutex<mpsc::Receiver<Envelope>>>,
) {
    debug!(lane = lane.as_str(), index, "lane worker started");
    loop {
        let envelope = {
            let mut receiver = receiver.lock().await;
            tokio::select! {
                envelope = receiver.recv() => envelope,
                _ = inner.shutdown.cancelled() => None,
            }
        };
        let Some(envelope) = envelope else {
            debug!(lane = lane.as_str(), index, "lane worker stopping");
            return;
        };

        match envelope.payload {
            TaskPayload::Execute { job_id, attempt } => {
                handle_execute(&inner, envelope.handle, job_id, attempt).await;
            }
            TaskPayload::Reclaim { job_id } => {
                handle_reclaim(&inner, job_id).await;
            }
        }
        inner.remove_handle(envelope.handle).await;
    }
}

async fn handle_execute(inner: &Arc<QueueInner>, handle: Uuid, job_id: Uuid, attempt: u32) {
    let Some((_, cancel)) = inner.cancel_token(handle).await else {
        debug!(%job_id, "handle gone before dispatch, discarding");
        return;
    };
    if cancel.is_cancelled() {
        debug!(%job_id, "cancelled before dispatch, discarding");
        return;
    }

    // Re-read at dispatch time so retries see current parameters
    let job = match inner.store.find_by_id(job_id).await {
        Ok(job) => job,
        Err(e) => {
            warn!(%job_id, "cannot load job for dispatch: {e}");
            return;
        }
    };
    if !matches!(job.status, JobStatus::Queued | JobStatus::Retrying) {
        debug!(%job_id, status = job.status.as_str(), "job no longer dispatchable");
        return;
    }

    // Validation failures never spawn anything; the job fails
    // straight out of Queued
    if let Err(failure) = inner.executor.validate(&job.parameters) {
        report_terminal_failure(inner, job_id, &failure).await;
        return;
    }

    let job = match inner.store.transition(job_id, Transition::Dispatch).await {
        Ok(job) => job,
        Err(StoreError::Rejected(e)) => {
            debug!(%job_id, "lost dispatch race ({e}), discarding");
            return;
        }
        Err(e) => {
            warn!(%job_id, "dispatch transition failed: {e}");
            return;
        }
    };
    info!(%job_id, attempt, job_type = job.job_type.as_str(), "executing job");

    let reporter = StoreProgressReporter::new(inner.store.clone(), job_id, attempt);
    match inner.executor.execute(&job, &reporter, &cancel).await {
        Ok(outcome) => {
            for (kind, path) in &outcome.input_files {
                if let Err(e) = inner.store.add_input_file(job_id, kind, path).await {
                    warn!(%job_id, kind, "could not register input file: {e}");
                }
            }
            let completion = inner
                .store
                .transition(
                    job_id,
                    Transition::Complete {
                        output_files: outcome.output_files,
                    },
                )
                .await;
            match completion {
                Ok(_) => info!(%job_id, attempt, "job completed"),
                Err(e) => debug!(%job_id, "completion report discarded: {e}"),
            }
        }
        Err(JobFailure::Cancelled) => {
            // The cancel path already moved the record to Cancelled
            info!(%job_id, attempt, "execution stopped by cancellation");
        }
        Err(failure) => {
            handle_failure(inner, job_id, attempt, failure).await;
        }
    }
}

async fn handle_failure(inner: &Arc<QueueInner>, job_id: Uuid, attempt: u32, failure: JobFailure) {
    let retry_budget_left = attempt < inner.retry.max_retries();
    if failure.is_retryable() && retry_budget_left {
        let retried = inner
            .store
            .transition(
                job_id,
                Transition::Retry {
                    error: failure.to_string(),
                },
            )
            .await;
        let job = match retried {
            Ok(job) => job,
            Err(e) => {
                debug!(%job_id, "retry report discarded: {e}");
                return;
            }
        };

        let delay = inner.retry.delay_for(job.retry_count);
        info!(
            %job_id,
            retry = job.retry_count,
            delay_ms = delay.as_millis() as u64,
            "scheduling retry after {}", failure.kind()
        );

        let inner = inner.clone();
        let next_attempt = job.retry_count;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            match inner
                .enqueue(TaskPayload::Execute {
                    job_id,
                    attempt: next_attempt,
                })
                .await
            {
                Ok(handle) => {
                    if let Err(e) = inner.store.set_queue_handle(job_id, handle).await {
                        warn!(%job_id, "could not persist retry handle: {e}");
                    }
                }
                Err(e) => warn!(%job_id, "could not re-enqueue retry: {e}"),
            }
        });
    } else {
        report_terminal_failure(inner, job_id, &failure).await;
    }
}

async fn report_terminal_failure(inner: &Arc<QueueInner>, job_id: Uuid, failure: &JobFailure) {
    let error = format!("{}: {failure}", failure.kind());
    match inner
        .store
        .transition(job_id, Transition::Fail { error })
        .await
    {
        Ok(_) => warn!(%job_id, kind = failure.kind(), "job failed: {failure}"),
        Err(e) => debug!(%job_id, "failure report discarded: {e}"),
    }
}

async fn handle_reclaim(inner: &Arc<QueueInner>, job_id: Uuid) {
    match scheduler::reclaim_job(inner.store.as_ref(), &inner.workdir_base, job_id).await {
        Ok(true) => info!(%job_id, "job files reclaimed"),
        Ok(false) => debug!(%job_id, "nothing to reclaim"),
        Err(e) => warn!(%job_id, "reclamation failed: {e}"),
    }
}
