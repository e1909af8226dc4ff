//! Administrative facade over the engine.
//!
//! The [`Admin`] bundles the registry, scheduler, queue processor, and
//! handler resolver behind one surface intended for the platform's
//! management layer: registering and triggering jobs, creating queues,
//! admitting work, and reading queue statistics. Mutations that affect
//! firing cadence re-initialize the scheduler so the timer table follows
//! the registry.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::core::job::{JobOutcome, ScheduledJob};
use crate::core::queue::{Queue, QueueItem};
use crate::core::types::{HandlerRef, ItemId};
use crate::handler::HandlerResolver;
use crate::queue::{DrainResult, ProcessError, ProcessOutcome, QueueProcessor};
use crate::registry::{Registry, RegistryError};
use crate::scheduler::{Scheduler, SchedulerError};

/// Errors surfaced by the administrative facade.
#[derive(Debug, Error)]
pub enum AdminError {
    /// No job with that name exists.
    #[error("job not found: {0}")]
    JobNotFound(String),

    /// No queue with that name exists.
    #[error("queue not found: {0}")]
    QueueNotFound(String),

    /// The queue refuses new items because it is inactive.
    #[error("queue not active: {0}")]
    QueueInactive(String),

    /// Registry error.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Scheduler error.
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    /// Queue processing error.
    #[error(transparent)]
    Process(#[from] ProcessError),
}

/// Point-in-time statistics for one queue.
#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    /// Queue name.
    pub name: String,
    /// Whether the queue accepts and drains work.
    pub active: bool,
    /// Whether a processing pass is in flight right now.
    pub processing: bool,
    /// Items ever admitted.
    pub total_items: u64,
    /// Items that completed.
    pub total_processed: u64,
    /// Items that failed terminally.
    pub total_failed: u64,
    /// Items currently waiting for an attempt (pending or retry).
    pub eligible: u64,
    /// When the queue was last drained.
    pub last_processed: Option<chrono::DateTime<chrono::Utc>>,
}

/// The administrative facade.
#[derive(Clone)]
pub struct Admin {
    registry: Arc<dyn Registry>,
    scheduler: Scheduler,
    processor: Arc<QueueProcessor>,
    resolver: Arc<HandlerResolver>,
}

impl Admin {
    /// Create a facade over the given components.
    pub fn new(
        registry: Arc<dyn Registry>,
        scheduler: Scheduler,
        processor: Arc<QueueProcessor>,
        resolver: Arc<HandlerResolver>,
    ) -> Self {
        Self {
            registry,
            scheduler,
            processor,
            resolver,
        }
    }

    // Job administration

    /// Register a job, or update the one with the same name, then
    /// re-initialize the scheduler so the change takes effect immediately
    /// rather than on the next fire.
    pub async fn register_job(&self, job: ScheduledJob) -> Result<ScheduledJob, AdminError> {
        let stored = self.registry.upsert_job(job).await?;
        self.scheduler.initialize().await?;
        tracing::info!(job_id = %stored.id, name = %stored.name, "job registered");
        Ok(stored)
    }

    /// Delete a job by name and drop its timer.
    pub async fn unregister_job(&self, name: &str) -> Result<(), AdminError> {
        let job = self
            .registry
            .find_job_by_name(name)
            .await?
            .ok_or_else(|| AdminError::JobNotFound(name.to_string()))?;

        self.registry.delete_job(&job.id).await?;
        self.scheduler.initialize().await?;
        tracing::info!(job_id = %job.id, name, "job unregistered");
        Ok(())
    }

    /// All registered jobs.
    pub async fn list_jobs(&self) -> Result<Vec<ScheduledJob>, AdminError> {
        Ok(self.registry.list_jobs().await?)
    }

    /// Execute a job now by name, bypassing its timer. A handler failure is
    /// reported through the outcome, not as an `Err`.
    pub async fn trigger_job(&self, name: &str) -> Result<JobOutcome, AdminError> {
        let job = self
            .registry
            .find_job_by_name(name)
            .await?
            .ok_or_else(|| AdminError::JobNotFound(name.to_string()))?;

        Ok(self.scheduler.force_run(&job.id).await?)
    }

    // Queue administration

    /// Create a new queue. Names are unique.
    pub async fn create_queue(&self, queue: Queue) -> Result<(), AdminError> {
        let name = queue.name.clone();
        self.registry.save_queue(queue).await?;
        tracing::info!(queue = %name, "queue created");
        Ok(())
    }

    /// All queues.
    pub async fn list_queues(&self) -> Result<Vec<Queue>, AdminError> {
        Ok(self.registry.list_queues().await?)
    }

    /// Admit a batch of payloads into a queue at the given priority.
    /// Returns the ids of the admitted items. Inactive queues refuse work.
    pub async fn enqueue(
        &self,
        queue_name: &str,
        payloads: Vec<Value>,
        priority: i32,
    ) -> Result<Vec<ItemId>, AdminError> {
        let queue = self.queue_by_name(queue_name).await?;
        if !queue.active {
            return Err(AdminError::QueueInactive(queue.name));
        }

        let items: Vec<QueueItem> = payloads
            .into_iter()
            .map(|payload| QueueItem::new(queue.id.clone(), payload, priority))
            .collect();
        let ids: Vec<ItemId> = items.iter().map(|i| i.id.clone()).collect();

        self.registry.enqueue_items(&queue.id, items).await?;
        tracing::debug!(queue = %queue.name, admitted = ids.len(), priority, "items enqueued");
        Ok(ids)
    }

    /// Run one processing pass over a queue by name.
    pub async fn process_queue(&self, queue_name: &str) -> Result<ProcessOutcome, AdminError> {
        let queue = self.queue_by_name(queue_name).await?;
        Ok(self.processor.process_queue(&queue.id).await?)
    }

    /// Drain every active, non-busy queue once.
    pub async fn drain_all_queues(&self) -> Result<Vec<DrainResult>, AdminError> {
        Ok(self.processor.drain_all().await?)
    }

    /// Point-in-time statistics for a queue.
    pub async fn queue_stats(&self, queue_name: &str) -> Result<QueueStats, AdminError> {
        let queue = self.queue_by_name(queue_name).await?;
        let items = self.registry.list_items(&queue.id).await?;
        let eligible = items.iter().filter(|i| i.status.is_eligible()).count() as u64;

        Ok(QueueStats {
            name: queue.name,
            active: queue.active,
            processing: queue.processing,
            total_items: queue.total_items,
            total_processed: queue.total_processed,
            total_failed: queue.total_failed,
            eligible,
            last_processed: queue.last_processed,
        })
    }

    // Handler administration

    /// Evict a cached handler binding so the next invocation loads fresh
    /// code. Used after handler code is edited.
    pub fn invalidate_handler(&self, handler: &HandlerRef) {
        self.resolver.invalidate(handler);
        tracing::debug!(handler = %handler, "handler binding invalidated");
    }

    /// Re-read all active jobs and rebuild the timer table.
    pub async fn reload_scheduler(&self) -> Result<usize, AdminError> {
        Ok(self.scheduler.initialize().await?)
    }

    async fn queue_by_name(&self, name: &str) -> Result<Queue, AdminError> {
        self.registry
            .find_queue_by_name(name)
            .await?
            .ok_or_else(|| AdminError::QueueNotFound(name.to_string()))
    }
}
