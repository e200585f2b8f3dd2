//! Job persistence
//!
//! The store is the single source of truth for job state. Every status
//! change goes through [`JobStore::transition`], which applies the
//! state machine under the store's own lock, so concurrent writers
//! (worker, cancellation, sweeper) race on a compare-and-set rather
//! than on read-modify-write.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use colforge_core::domain::job::{JobRecord, Transition, TransitionError};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("job not found: {0}")]
    NotFound(Uuid),

    /// The state machine refused the change; the record is unchanged.
    #[error(transparent)]
    Rejected(#[from] TransitionError),

    #[error("store backend error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persists a new record. The record's id must be unique.
    async fn create(&self, job: JobRecord) -> Result<(), StoreError>;

    async fn find_by_id(&self, id: Uuid) -> Result<JobRecord, StoreError>;

    /// All jobs owned by a principal, newest first.
    async fn list_by_principal(&self, principal: &str) -> Result<Vec<JobRecord>, StoreError>;

    /// Jobs in a non-terminal status, used for startup recovery.
    async fn list_active(&self) -> Result<Vec<JobRecord>, StoreError>;

    /// Jobs created strictly before the cutoff, used by the expiry
    /// sweep.
    async fn list_created_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<JobRecord>, StoreError>;

    /// Applies a status transition atomically and returns the updated
    /// record. A rejected transition leaves the record untouched and
    /// surfaces as [`StoreError::Rejected`].
    async fn transition(&self, id: Uuid, transition: Transition) -> Result<JobRecord, StoreError>;

    /// Records a progress milestone; valid only while the job runs.
    async fn record_progress(
        &self,
        id: Uuid,
        progress: u8,
        step: &str,
    ) -> Result<(), StoreError>;

    async fn set_queue_handle(&self, id: Uuid, handle: Uuid) -> Result<(), StoreError>;

    /// Registers an input file kind → path on the record.
    async fn add_input_file(&self, id: Uuid, kind: &str, path: &str) -> Result<(), StoreError>;
}
