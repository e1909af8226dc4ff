//! Registry abstraction for persisted jobs, queues, and queue items.
//!
//! The registry is the authoritative definition store. The scheduler
//! re-reads it on every fire and the queue engine routes every status
//! change through it. This module provides a trait-based abstraction with
//! pluggable backends; [`InMemoryRegistry`] ships for development and
//! tests, a relational backend maps the same contract onto SQL.

mod memory;

pub use memory::InMemoryRegistry;

use async_trait::async_trait;
use thiserror::Error;

use crate::core::job::{JobOutcome, ScheduledJob};
use crate::core::queue::{Queue, QueueItem};
use crate::core::types::{ItemId, JobId, QueueId};

/// Errors that can occur during registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The requested row was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// A unique name was already taken.
    #[error("duplicate name: {0}")]
    DuplicateName(String),

    /// Registry lock was poisoned.
    #[error("registry lock poisoned")]
    LockPoisoned,

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Generic backend error.
    #[error("registry error: {0}")]
    Other(String),
}

/// Contract for the persisted definition store.
#[async_trait]
pub trait Registry: Send + Sync {
    // Scheduled job operations

    /// Insert or update a job, keyed by its unique `name`.
    ///
    /// On update the stored `id` and, for batch jobs, the execution
    /// counters are preserved; everything else is replaced by `job`.
    async fn upsert_job(&self, job: ScheduledJob) -> Result<ScheduledJob, RegistryError>;

    /// Get a job by id.
    async fn get_job(&self, id: &JobId) -> Result<ScheduledJob, RegistryError>;

    /// Find a job by its unique name.
    async fn find_job_by_name(&self, name: &str) -> Result<Option<ScheduledJob>, RegistryError>;

    /// List all jobs.
    async fn list_jobs(&self) -> Result<Vec<ScheduledJob>, RegistryError>;

    /// List jobs with `active = true`.
    async fn list_active_jobs(&self) -> Result<Vec<ScheduledJob>, RegistryError>;

    /// Delete a job by id.
    async fn delete_job(&self, id: &JobId) -> Result<(), RegistryError>;

    /// Write back run telemetry, bumping batch counters where applicable.
    async fn record_job_outcome(
        &self,
        id: &JobId,
        outcome: JobOutcome,
    ) -> Result<(), RegistryError>;

    // Queue operations

    /// Insert a new queue. Fails on a duplicate name.
    async fn save_queue(&self, queue: Queue) -> Result<(), RegistryError>;

    /// Get a queue by id.
    async fn get_queue(&self, id: &QueueId) -> Result<Queue, RegistryError>;

    /// Find a queue by its unique name.
    async fn find_queue_by_name(&self, name: &str) -> Result<Option<Queue>, RegistryError>;

    /// List all queues.
    async fn list_queues(&self) -> Result<Vec<Queue>, RegistryError>;

    /// Atomically set `processing = true` if it is currently false.
    ///
    /// Returns whether the flag was acquired. This is the mutual-exclusion
    /// guard for processing passes: of two racing callers, exactly one
    /// observes `true`. A SQL backend implements this as
    /// `UPDATE ... SET processing = true WHERE id = ? AND processing = false`
    /// and checks the affected row count.
    async fn try_begin_processing(&self, id: &QueueId) -> Result<bool, RegistryError>;

    /// Clear `processing`, stamp `last_processed`, and add pass counters.
    ///
    /// Must be called on every pass exit, including the error path.
    async fn finish_processing(
        &self,
        id: &QueueId,
        processed: u64,
        failed: u64,
    ) -> Result<(), RegistryError>;

    // Queue item operations

    /// Bulk-insert items and bump the owning queue's `total_items`.
    async fn enqueue_items(
        &self,
        queue_id: &QueueId,
        items: Vec<QueueItem>,
    ) -> Result<(), RegistryError>;

    /// Fetch up to `limit` eligible items (Pending or Retry), ordered by
    /// priority descending then creation time ascending.
    async fn fetch_batch(
        &self,
        queue_id: &QueueId,
        limit: usize,
    ) -> Result<Vec<QueueItem>, RegistryError>;

    /// Get an item by id.
    async fn get_item(&self, id: &ItemId) -> Result<QueueItem, RegistryError>;

    /// Persist an item's current state.
    async fn update_item(&self, item: QueueItem) -> Result<(), RegistryError>;

    /// List all items of a queue.
    async fn list_items(&self, queue_id: &QueueId) -> Result<Vec<QueueItem>, RegistryError>;
}
