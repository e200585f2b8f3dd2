//! Task queue with lanes, retries, and cancellation
//!
//! Two lanes, each a bounded channel with its own worker set: the
//! molecular lane carries heavy colbuilder runs, the default lane
//! carries maintenance work like file reclamation. Workers take one
//! envelope at a time. Delivery is at-least-once: the store, not the
//! channel, is the durable side, and [`TaskQueue::recover`] re-reads
//! active records at startup and re-enqueues them. Duplicate delivery
//! is harmless because every status change is a compare-and-set in
//! the store.

mod retry;
mod worker;

pub use retry::RetryPolicy;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use colforge_core::domain::job::{JobStatus, Transition};

use crate::config::Config;
use crate::executor::JobExecutor;
use crate::store::{JobStore, StoreError};

/// Queue lanes, one per workload class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lane {
    /// Maintenance work: reclamation, bookkeeping
    Default,
    /// colbuilder runs
    Molecular,
}

impl Lane {
    pub fn as_str(&self) -> &'static str {
        match self {
            Lane::Default => "default",
            Lane::Molecular => "molecular",
        }
    }
}

/// Work carried by one queue envelope.
#[derive(Debug, Clone)]
pub enum TaskPayload {
    /// Run one execution attempt of a job.
    Execute { job_id: Uuid, attempt: u32 },
    /// Reclaim a terminal job's files and expire it.
    Reclaim { job_id: Uuid },
}

impl TaskPayload {
    pub fn lane(&self) -> Lane {
        match self {
            TaskPayload::Execute { .. } => Lane::Molecular,
            TaskPayload::Reclaim { .. } => Lane::Default,
        }
    }

    pub fn job_id(&self) -> Uuid {
        match self {
            TaskPayload::Execute { job_id, .. } | TaskPayload::Reclaim { job_id } => *job_id,
        }
    }
}

#[derive(Debug, Clone)]
struct Envelope {
    handle: Uuid,
    payload: TaskPayload,
}

struct HandleEntry {
    job_id: Uuid,
    cancel: CancellationToken,
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue lane {0} is closed")]
    LaneClosed(&'static str),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Outcome of a cancellation request. Not being cancellable is a
/// normal answer, not an error.
#[derive(Debug, PartialEq, Eq)]
pub enum CancelOutcome {
    Cancelled,
    NotCancellable(JobStatus),
    UnknownHandle,
}

struct QueueInner {
    store: Arc<dyn JobStore>,
    executor: Arc<JobExecutor>,
    retry: RetryPolicy,
    workdir_base: PathBuf,
    default_tx: mpsc::Sender<Envelope>,
    molecular_tx: mpsc::Sender<Envelope>,
    handles: RwLock<HashMap<Uuid, HandleEntry>>,
    shutdown: CancellationToken,
}

impl QueueInner {
    async fn enqueue(&self, payload: TaskPayload) -> Result<Uuid, QueueError> {
        let lane = payload.lane();
        let handle = Uuid::new_v4();
        let entry = HandleEntry {
            job_id: payload.job_id(),
            cancel: CancellationToken::new(),
        };
        self.handles.write().await.insert(handle, entry);

        let envelope = Envelope { handle, payload };
        let sender = match lane {
            Lane::Default => &self.default_tx,
            Lane::Molecular => &self.molecular_tx,
        };
        if sender.send(envelope).await.is_err() {
            self.handles.write().await.remove(&handle);
            return Err(QueueError::LaneClosed(lane.as_str()));
        }
        Ok(handle)
    }

    async fn remove_handle(&self, handle: Uuid) {
        self.handles.write().await.remove(&handle);
    }

    async fn cancel_token(&self, handle: Uuid) -> Option<(Uuid, CancellationToken)> {
        self.handles
            .read()
            .await
            .get(&handle)
            .map(|entry| (entry.job_id, entry.cancel.clone()))
    }

    async fn tokens_for_job(&self, job_id: Uuid) -> Vec<CancellationToken> {
        self.handles
            .read()
            .await
            .values()
            .filter(|entry| entry.job_id == job_id)
            .map(|entry| entry.cancel.clone())
            .collect()
    }
}

/// Handle to the running queue.
#[derive(Clone)]
pub struct TaskQueue {
    inner: Arc<QueueInner>,
}

impl TaskQueue {
    /// Builds the queue and spawns its worker sets.
    pub fn start(
        config: &Config,
        store: Arc<dyn JobStore>,
        executor: Arc<JobExecutor>,
    ) -> Self {
        let (default_tx, default_rx) = mpsc::channel(config.lane_capacity);
        let (molecular_tx, molecular_rx) = mpsc::channel(config.lane_capacity);

        let inner = Arc::new(QueueInner {
            store,
            executor,
            retry: RetryPolicy::new(config.retry.clone()),
            workdir_base: config.workdir_base.clone(),
            default_tx,
            molecular_tx,
            handles: RwLock::new(HashMap::new()),
            shutdown: CancellationToken::new(),
        });

        spawn_lane(
            inner.clone(),
            Lane::Default,
            default_rx,
            config.default_lane_workers,
        );
        spawn_lane(
            inner.clone(),
            Lane::Molecular,
            molecular_rx,
            config.molecular_lane_workers,
        );

        Self { inner }
    }

    /// Enqueues work on the lane its payload belongs to and returns
    /// the queue handle for later cancellation.
    pub async fn enqueue(&self, payload: TaskPayload) -> Result<Uuid, QueueError> {
        self.inner.enqueue(payload).await
    }

    /// Cancels the work behind a handle by cancelling its job.
    pub async fn cancel(&self, handle: Uuid) -> Result<CancelOutcome, QueueError> {
        let Some((job_id, _)) = self.inner.cancel_token(handle).await else {
            return Ok(CancelOutcome::UnknownHandle);
        };
        self.cancel_job(job_id).await
    }

    /// Cancels a job by id, independent of queue-handle bookkeeping.
    /// Every live token for the job is tripped first, so a queued
    /// envelope is discarded and a running subprocess is terminated
    /// even while its handle has not been persisted yet; then the
    /// record transitions. The record reaches Cancelled immediately,
    /// however long the process takes to die.
    pub async fn cancel_job(&self, job_id: Uuid) -> Result<CancelOutcome, QueueError> {
        for token in self.inner.tokens_for_job(job_id).await {
            token.cancel();
        }

        match self.inner.store.transition(job_id, Transition::Cancel).await {
            Ok(_) => {
                info!(%job_id, "job cancelled");
                Ok(CancelOutcome::Cancelled)
            }
            Err(StoreError::Rejected(e)) => Ok(CancelOutcome::NotCancellable(e.from)),
            Err(e) => Err(e.into()),
        }
    }

    /// Current status of the job behind a handle.
    pub async fn status(&self, handle: Uuid) -> Result<Option<JobStatus>, QueueError> {
        let Some((job_id, _)) = self.inner.cancel_token(handle).await else {
            return Ok(None);
        };
        Ok(Some(self.inner.store.find_by_id(job_id).await?.status))
    }

    /// Re-enqueues every non-terminal job found in the store. Called
    /// once at startup so work survives a worker crash: a job caught
    /// mid-run is moved back through Retrying and delivered again.
    pub async fn recover(&self) -> Result<usize, QueueError> {
        let active = self.inner.store.list_active().await?;
        let mut recovered = 0;

        for job in active {
            // A job caught mid-run counts the lost attempt against
            // its retry budget
            let job = if job.status == JobStatus::Running {
                let result = self
                    .inner
                    .store
                    .transition(
                        job.id,
                        Transition::Retry {
                            error: "worker restarted during execution".to_string(),
                        },
                    )
                    .await;
                match result {
                    Ok(updated) => updated,
                    Err(e) => {
                        warn!(job_id = %job.id, "could not mark interrupted job for retry: {e}");
                        continue;
                    }
                }
            } else {
                job
            };

            let handle = self
                .enqueue(TaskPayload::Execute {
                    job_id: job.id,
                    attempt: job.retry_count,
                })
                .await?;
            self.inner.store.set_queue_handle(job.id, handle).await?;
            recovered += 1;
        }

        if recovered > 0 {
            info!(recovered, "re-enqueued jobs found active at startup");
        }
        Ok(recovered)
    }

    /// Stops the worker sets. In-flight envelopes finish; queued ones
    /// are redelivered by the next `recover`.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }
}

fn spawn_lane(
    inner: Arc<QueueInner>,
    lane: Lane,
    receiver: mpsc::Receiver<Envelope>,
    workers: usize,
) {
    let receiver = Arc::new(Mutex::new(receiver));
    for index in 0..workers {
        tokio::spawn(worker::worker_loop(
            inner.clone(),
            lane,
            index,
            receiver.clone(),
        ));
    }
}
