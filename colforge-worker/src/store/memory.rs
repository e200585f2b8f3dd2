//! In-memory job store
//!
//! A `RwLock<HashMap>` behind the [`JobStore`] trait. Transitions take
//! the write lock for the whole apply, which is what makes them
//! compare-and-set.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use colforge_core::domain::job::{JobRecord, Transition};

use super::{JobStore, StoreError};

#[derive(Clone, Default)]
pub struct MemoryJobStore {
    jobs: Arc<RwLock<HashMap<Uuid, JobRecord>>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, job: JobRecord) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&job.id) {
            return Err(StoreError::Backend(format!("duplicate job id {}", job.id)));
        }
        jobs.insert(job.id, job);
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<JobRecord, StoreError> {
        self.jobs
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    async fn list_by_principal(&self, principal: &str) -> Result<Vec<JobRecord>, StoreError> {
        let jobs = self.jobs.read().await;
        let mut matches: Vec<JobRecord> = jobs
            .values()
            .filter(|j| j.principal == principal)
            .cloned()
            .collect();
        matches.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matches)
    }

    async fn list_active(&self) -> Result<Vec<JobRecord>, StoreError> {
        let jobs = self.jobs.read().await;
        let mut active: Vec<JobRecord> =
            jobs.values().filter(|j| j.is_active()).cloned().collect();
        active.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(active)
    }

    async fn list_created_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<JobRecord>, StoreError> {
        let jobs = self.jobs.read().await;
        Ok(jobs
            .values()
            .filter(|j| j.created_at < cutoff)
            .cloned()
            .collect())
    }

    async fn transition(&self, id: Uuid, transition: Transition) -> Result<JobRecord, StoreError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        job.apply(transition, Utc::now())?;
        Ok(job.clone())
    }

    async fn record_progress(
        &self,
        id: Uuid,
        progress: u8,
        step: &str,
    ) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        job.record_progress(progress, step, Utc::now())?;
        Ok(())
    }

    async fn set_queue_handle(&self, id: Uuid, handle: Uuid) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        job.queue_handle = Some(handle);
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn add_input_file(&self, id: Uuid, kind: &str, path: &str) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        job.input_files.insert(kind.to_string(), path.to_string());
        job.updated_at = Utc::now();
        Ok(())
    }
}
