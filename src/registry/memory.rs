//! In-memory registry implementation.
//!
//! Thread-safe backend for testing and development. Data is not persisted
//! across restarts. The `processing` check-and-set is atomic because it
//! happens under a single write lock, mirroring what a SQL backend gets
//! from a conditional UPDATE.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::RwLock;

use super::{Registry, RegistryError};
use crate::core::job::{JobKind, JobOutcome, ScheduledJob};
use crate::core::queue::{Queue, QueueItem};
use crate::core::types::{ItemId, JobId, QueueId};

/// In-memory registry backend.
pub struct InMemoryRegistry {
    jobs: RwLock<HashMap<JobId, ScheduledJob>>,
    queues: RwLock<HashMap<QueueId, Queue>>,
    items: RwLock<HashMap<ItemId, QueueItem>>,
}

impl InMemoryRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            queues: RwLock::new(HashMap::new()),
            items: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Registry for InMemoryRegistry {
    async fn upsert_job(&self, mut job: ScheduledJob) -> Result<ScheduledJob, RegistryError> {
        let mut jobs = self.jobs.write().map_err(|_| RegistryError::LockPoisoned)?;

        if let Some(existing) = jobs.values().find(|j| j.name == job.name) {
            // Keep the stored identity and monotonic counters across updates.
            job.id = existing.id.clone();
            if let (
                JobKind::Batch { counters, .. },
                JobKind::Batch {
                    counters: existing_counters,
                    ..
                },
            ) = (&mut job.kind, &existing.kind)
            {
                *counters = *existing_counters;
            }
        }

        jobs.insert(job.id.clone(), job.clone());
        Ok(job)
    }

    async fn get_job(&self, id: &JobId) -> Result<ScheduledJob, RegistryError> {
        let jobs = self.jobs.read().map_err(|_| RegistryError::LockPoisoned)?;
        jobs.get(id)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(format!("job: {}", id)))
    }

    async fn find_job_by_name(&self, name: &str) -> Result<Option<ScheduledJob>, RegistryError> {
        let jobs = self.jobs.read().map_err(|_| RegistryError::LockPoisoned)?;
        Ok(jobs.values().find(|j| j.name == name).cloned())
    }

    async fn list_jobs(&self) -> Result<Vec<ScheduledJob>, RegistryError> {
        let jobs = self.jobs.read().map_err(|_| RegistryError::LockPoisoned)?;
        let mut result: Vec<_> = jobs.values().cloned().collect();
        result.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(result)
    }

    async fn list_active_jobs(&self) -> Result<Vec<ScheduledJob>, RegistryError> {
        let jobs = self.jobs.read().map_err(|_| RegistryError::LockPoisoned)?;
        let mut result: Vec<_> = jobs.values().filter(|j| j.active).cloned().collect();
        result.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(result)
    }

    async fn delete_job(&self, id: &JobId) -> Result<(), RegistryError> {
        let mut jobs = self.jobs.write().map_err(|_| RegistryError::LockPoisoned)?;
        jobs.remove(id)
            .ok_or_else(|| RegistryError::NotFound(format!("job: {}", id)))?;
        Ok(())
    }

    async fn record_job_outcome(
        &self,
        id: &JobId,
        outcome: JobOutcome,
    ) -> Result<(), RegistryError> {
        let mut jobs = self.jobs.write().map_err(|_| RegistryError::LockPoisoned)?;
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| RegistryError::NotFound(format!("job: {}", id)))?;
        job.record_outcome(&outcome);
        Ok(())
    }

    async fn save_queue(&self, queue: Queue) -> Result<(), RegistryError> {
        let mut queues = self
            .queues
            .write()
            .map_err(|_| RegistryError::LockPoisoned)?;
        if queues.values().any(|q| q.name == queue.name) {
            return Err(RegistryError::DuplicateName(format!(
                "queue: {}",
                queue.name
            )));
        }
        queues.insert(queue.id.clone(), queue);
        Ok(())
    }

    async fn get_queue(&self, id: &QueueId) -> Result<Queue, RegistryError> {
        let queues = self.queues.read().map_err(|_| RegistryError::LockPoisoned)?;
        queues
            .get(id)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(format!("queue: {}", id)))
    }

    async fn find_queue_by_name(&self, name: &str) -> Result<Option<Queue>, RegistryError> {
        let queues = self.queues.read().map_err(|_| RegistryError::LockPoisoned)?;
        Ok(queues.values().find(|q| q.name == name).cloned())
    }

    async fn list_queues(&self) -> Result<Vec<Queue>, RegistryError> {
        let queues = self.queues.read().map_err(|_| RegistryError::LockPoisoned)?;
        let mut result: Vec<_> = queues.values().cloned().collect();
        result.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(result)
    }

    async fn try_begin_processing(&self, id: &QueueId) -> Result<bool, RegistryError> {
        // Single write lock covers the whole check-and-set.
        let mut queues = self
            .queues
            .write()
            .map_err(|_| RegistryError::LockPoisoned)?;
        let queue = queues
            .get_mut(id)
            .ok_or_else(|| RegistryError::NotFound(format!("queue: {}", id)))?;
        if queue.processing {
            return Ok(false);
        }
        queue.processing = true;
        Ok(true)
    }

    async fn finish_processing(
        &self,
        id: &QueueId,
        processed: u64,
        failed: u64,
    ) -> Result<(), RegistryError> {
        let mut queues = self
            .queues
            .write()
            .map_err(|_| RegistryError::LockPoisoned)?;
        let queue = queues
            .get_mut(id)
            .ok_or_else(|| RegistryError::NotFound(format!("queue: {}", id)))?;
        queue.processing = false;
        queue.last_processed = Some(Utc::now());
        queue.total_processed += processed;
        queue.total_failed += failed;
        Ok(())
    }

    async fn enqueue_items(
        &self,
        queue_id: &QueueId,
        items: Vec<QueueItem>,
    ) -> Result<(), RegistryError> {
        let mut queues = self
            .queues
            .write()
            .map_err(|_| RegistryError::LockPoisoned)?;
        let queue = queues
            .get_mut(queue_id)
            .ok_or_else(|| RegistryError::NotFound(format!("queue: {}", queue_id)))?;
        queue.total_items += items.len() as u64;

        let mut stored = self.items.write().map_err(|_| RegistryError::LockPoisoned)?;
        for item in items {
            stored.insert(item.id.clone(), item);
        }
        Ok(())
    }

    async fn fetch_batch(
        &self,
        queue_id: &QueueId,
        limit: usize,
    ) -> Result<Vec<QueueItem>, RegistryError> {
        let items = self.items.read().map_err(|_| RegistryError::LockPoisoned)?;
        let mut eligible: Vec<_> = items
            .values()
            .filter(|i| &i.queue_id == queue_id && i.status.is_eligible())
            .cloned()
            .collect();
        // Priority descending, oldest first within a tier.
        eligible.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.created_at.cmp(&b.created_at))
        });
        eligible.truncate(limit);
        Ok(eligible)
    }

    async fn get_item(&self, id: &ItemId) -> Result<QueueItem, RegistryError> {
        let items = self.items.read().map_err(|_| RegistryError::LockPoisoned)?;
        items
            .get(id)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(format!("item: {}", id)))
    }

    async fn update_item(&self, item: QueueItem) -> Result<(), RegistryError> {
        let mut items = self.items.write().map_err(|_| RegistryError::LockPoisoned)?;
        if !items.contains_key(&item.id) {
            return Err(RegistryError::NotFound(format!("item: {}", item.id)));
        }
        items.insert(item.id.clone(), item);
        Ok(())
    }

    async fn list_items(&self, queue_id: &QueueId) -> Result<Vec<QueueItem>, RegistryError> {
        let items = self.items.read().map_err(|_| RegistryError::LockPoisoned)?;
        let mut result: Vec<_> = items
            .values()
            .filter(|i| &i.queue_id == queue_id)
            .cloned()
            .collect();
        result.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(result)
    }
}
