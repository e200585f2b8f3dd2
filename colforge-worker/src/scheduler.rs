//! Expiry sweep
//!
//! Jobs past the retention window get their workdir and registered
//! files deleted and move to Expired. The sweep runs on a fixed
//! cadence, handles each candidate independently, and is idempotent:
//! an already-expired job is skipped, and an over-age job that is
//! somehow still active is logged and left alone rather than having
//! files pulled out from under a running process.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use colforge_core::domain::job::{JobStatus, Transition};
use colforge_core::error::JobFailure;

use crate::store::{JobStore, StoreError};

/// What one sweep did.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub examined: usize,
    pub expired: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub struct ExpirySweeper {
    store: std::sync::Arc<dyn JobStore>,
    workdir_base: PathBuf,
    retention: Duration,
    interval: Duration,
}

impl ExpirySweeper {
    pub fn new(
        store: std::sync::Arc<dyn JobStore>,
        workdir_base: PathBuf,
        retention: Duration,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            workdir_base,
            retention,
            interval,
        }
    }

    /// Periodic sweep loop, stopped via the shutdown token.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // interval fires immediately; skip the startup tick
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let stats = self.sweep().await;
                    info!(
                        examined = stats.examined,
                        expired = stats.expired,
                        skipped = stats.skipped,
                        failed = stats.failed,
                        "expiry sweep finished"
                    );
                }
                _ = shutdown.cancelled() => {
                    debug!("expiry sweeper stopping");
                    return;
                }
            }
        }
    }

    /// One pass over all jobs older than the retention window.
    pub async fn sweep(&self) -> SweepStats {
        let cutoff = Utc::now() - chrono::Duration::seconds(self.retention.as_secs() as i64);
        let candidates = match self.store.list_created_before(cutoff).await {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!("expiry sweep could not list candidates: {e}");
                return SweepStats::default();
            }
        };

        let mut stats = SweepStats::default();
        for job in candidates {
            stats.examined += 1;
            if job.status == JobStatus::Expired {
                stats.skipped += 1;
                continue;
            }
            if job.status.is_active() {
                warn!(
                    job_id = %job.id,
                    status = job.status.as_str(),
                    "job is past retention but still active, leaving it alone"
                );
                stats.skipped += 1;
                continue;
            }

            match reclaim_job(self.store.as_ref(), &self.workdir_base, job.id).await {
                Ok(true) => stats.expired += 1,
                Ok(false) => stats.skipped += 1,
                Err(e) => {
                    warn!(job_id = %job.id, "could not reclaim expired job: {e}");
                    stats.failed += 1;
                }
            }
        }
        stats
    }
}

/// Deletes a terminal job's registered files and workdir, then expires
/// it. Returns `Ok(false)` when the job is already expired or is not
/// yet terminal. Shared by the sweep and the manual cleanup path.
pub async fn reclaim_job(
    store: &dyn JobStore,
    workdir_base: &Path,
    job_id: Uuid,
) -> Result<bool, JobFailure> {
    let job = match store.find_by_id(job_id).await {
        Ok(job) => job,
        Err(StoreError::NotFound(_)) => return Ok(false),
        Err(e) => return Err(JobFailure::Store(e.to_string())),
    };
    if job.status == JobStatus::Expired || !job.status.is_terminal() {
        return Ok(false);
    }

    for path in job.output_files.values().chain(job.input_files.values()) {
        remove_if_present(Path::new(path)).await?;
    }
    let workdir = workdir_base.join(job.id.to_string());
    match tokio::fs::remove_dir_all(&workdir).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    match store.transition(job_id, Transition::Expire).await {
        Ok(_) => Ok(true),
        // Another reclaimer got there first
        Err(StoreError::Rejected(_)) => Ok(false),
        Err(e) => Err(JobFailure::Store(e.to_string())),
    }
}

async fn remove_if_present(path: &Path) -> Result<(), JobFailure> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryJobStore;
    use colforge_core::domain::job::{JobRecord, JobType};
    use colforge_core::domain::params::{DensityChangeParams, JobParameters};
    use std::collections::HashMap;
    use std::sync::Arc;

    fn aged_job(store_dir: &Path, age_days: i64) -> (JobRecord, PathBuf) {
        let mut job = JobRecord::new(
            "user-1",
            JobType::DensityChange,
            JobParameters::DensityChange(DensityChangeParams {
                input_pdb: "in.pdb".to_string(),
                target_density: 40.0,
            }),
            "sweep test",
        );
        job.created_at = Utc::now() - chrono::Duration::days(age_days);

        let workdir = store_dir.join(job.id.to_string());
        std::fs::create_dir_all(&workdir).unwrap();
        let output = workdir.join("modified.pdb");
        std::fs::write(&output, "data").unwrap();
        job.output_files =
            HashMap::from([("pdb".to_string(), output.display().to_string())]);
        (job, workdir)
    }

    fn sweeper(store: Arc<MemoryJobStore>, base: &Path) -> ExpirySweeper {
        ExpirySweeper::new(
            store,
            base.to_path_buf(),
            Duration::from_secs(30 * 24 * 60 * 60),
            Duration::from_secs(24 * 60 * 60),
        )
    }

    #[tokio::test]
    async fn test_sweep_expires_old_terminal_jobs_and_deletes_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryJobStore::new());

        let (mut job, workdir) = aged_job(dir.path(), 40);
        job.status = JobStatus::Failed;
        let id = job.id;
        store.create(job).await.unwrap();

        let stats = sweeper(store.clone(), dir.path()).sweep().await;
        assert_eq!(stats.expired, 1);
        assert_eq!(stats.failed, 0);

        let job = store.find_by_id(id).await.unwrap();
        assert_eq!(job.status, JobStatus::Expired);
        assert!(job.output_files.is_empty());
        assert!(!workdir.exists());
    }

    #[tokio::test]
    async fn test_sweep_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryJobStore::new());

        let (mut job, _) = aged_job(dir.path(), 40);
        job.status = JobStatus::Completed;
        store.create(job).await.unwrap();

        let sweeper = sweeper(store.clone(), dir.path());
        assert_eq!(sweeper.sweep().await.expired, 1);

        let again = sweeper.sweep().await;
        assert_eq!(again.expired, 0);
        assert_eq!(again.skipped, 1);
    }

    #[tokio::test]
    async fn test_sweep_leaves_recent_and_active_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryJobStore::new());

        let (mut recent, _) = aged_job(dir.path(), 1);
        recent.status = JobStatus::Completed;
        let recent_id = recent.id;
        store.create(recent).await.unwrap();

        let (old_active, active_workdir) = aged_job(dir.path(), 40);
        let active_id = old_active.id;
        store.create(old_active).await.unwrap();

        let stats = sweeper(store.clone(), dir.path()).sweep().await;
        assert_eq!(stats.expired, 0);

        assert_eq!(
            store.find_by_id(recent_id).await.unwrap().status,
            JobStatus::Completed
        );
        assert_eq!(
            store.find_by_id(active_id).await.unwrap().status,
            JobStatus::Queued
        );
        assert!(active_workdir.exists());
    }

    #[tokio::test]
    async fn test_reclaim_refuses_non_terminal_job() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryJobStore::new());

        let (job, workdir) = aged_job(dir.path(), 1);
        let id = job.id;
        store.create(job).await.unwrap();

        let reclaimed = reclaim_job(store.as_ref(), dir.path(), id).await.unwrap();
        assert!(!reclaimed);
        assert!(workdir.exists());
    }

    #[tokio::test]
    async fn test_sweep_reclaims_every_terminal_candidate() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryJobStore::new());

        let (mut first, _) = aged_job(dir.path(), 40);
        first.status = JobStatus::Cancelled;
        store.create(first).await.unwrap();

        let (mut second, _) = aged_job(dir.path(), 40);
        second.status = JobStatus::Completed;
        store.create(second).await.unwrap();

        let stats = sweeper(store.clone(), dir.path()).sweep().await;
        assert_eq!(stats.examined, 2);
        assert_eq!(stats.expired, 2);
    }
}
