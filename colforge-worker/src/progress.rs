//! Progress reporting from executors back to the store
//!
//! Executors report milestones through [`ProgressReporter`] without
//! knowing about the store. Reports are best-effort: a failed write
//! is logged and dropped, it never aborts the computation.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;
use uuid::Uuid;

use crate::store::JobStore;

#[async_trait]
pub trait ProgressReporter: Send + Sync {
    async fn report(&self, progress: u8, step: &str);
}

/// Reporter that writes milestones onto the job record.
pub struct StoreProgressReporter {
    store: Arc<dyn JobStore>,
    job_id: Uuid,
    attempt: u32,
}

impl StoreProgressReporter {
    pub fn new(store: Arc<dyn JobStore>, job_id: Uuid, attempt: u32) -> Self {
        Self {
            store,
            job_id,
            attempt,
        }
    }
}

#[async_trait]
impl ProgressReporter for StoreProgressReporter {
    async fn report(&self, progress: u8, step: &str) {
        if let Err(e) = self.store.record_progress(self.job_id, progress, step).await {
            warn!(
                job_id = %self.job_id,
                attempt = self.attempt,
                progress,
                "failed to record progress: {e}"
            );
        }
    }
}

/// Reporter that discards milestones, for recovery paths and tests.
pub struct NullProgressReporter;

#[async_trait]
impl ProgressReporter for NullProgressReporter {
    async fn report(&self, _progress: u8, _step: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryJobStore;
    use colforge_core::domain::job::{JobRecord, JobType, Transition};
    use colforge_core::domain::params::{DensityChangeParams, JobParameters};

    #[tokio::test]
    async fn test_store_reporter_writes_milestone() {
        let store = Arc::new(MemoryJobStore::new());
        let job = JobRecord::new(
            "user-1",
            JobType::DensityChange,
            JobParameters::DensityChange(DensityChangeParams {
                input_pdb: "in.pdb".to_string(),
                target_density: 10.0,
            }),
            "progress test",
        );
        let id = job.id;
        store.create(job).await.unwrap();
        store.transition(id, Transition::Dispatch).await.unwrap();

        let reporter = StoreProgressReporter::new(store.clone(), id, 0);
        reporter.report(50, "running colbuilder").await;

        let current = store.find_by_id(id).await.unwrap();
        assert_eq!(current.progress, 50);
    }

    #[tokio::test]
    async fn test_store_reporter_swallows_rejection() {
        let store = Arc::new(MemoryJobStore::new());
        // No such job; the reporter must not panic or error out
        let reporter = StoreProgressReporter::new(store, Uuid::new_v4(), 0);
        reporter.report(20, "preparing inputs").await;
    }
}
