//! Queue and queue item definitions.
//!
//! A [`Queue`] is a named, persistent work list drained in priority order
//! with a bounded batch size and attempt-limited retry. The `processing`
//! flag is the mutual-exclusion guard: at most one processing pass per
//! queue is in flight at any time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::types::{HandlerRef, ItemId, QueueId};

/// Default batch size cap when none is given.
pub const DEFAULT_ITEMS_PER_BATCH: usize = 20;

/// Default attempt limit when none is given.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// A named work queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Queue {
    /// Internal identity.
    pub id: QueueId,
    /// Unique, operator-facing name.
    pub name: String,
    /// The handler invoked for every item in this queue.
    pub handler: HandlerRef,
    /// Hard cap on items taken per processing pass.
    pub items_per_batch: usize,
    /// Attempt limit before an item becomes terminally failed.
    pub max_attempts: u32,
    /// Advisory retry delay in seconds. Recorded, but not compared against
    /// elapsed time when picking retry items: the poll cadence of the
    /// drain job is what throttles retries.
    pub retry_delay_secs: u64,
    /// Inactive queues accept no items and are never drained.
    pub active: bool,
    /// Mutual-exclusion flag; true for the duration of one processing pass.
    pub processing: bool,
    /// Append-only count of items ever admitted.
    pub total_items: u64,
    /// Items that reached `Completed`.
    pub total_processed: u64,
    /// Items that reached terminal `Failed`.
    pub total_failed: u64,
    /// When the queue was last drained.
    pub last_processed: Option<DateTime<Utc>>,
}

impl Queue {
    /// Create a new queue with default batch size and attempt limit.
    pub fn new(id: impl Into<QueueId>, name: impl Into<String>, handler: HandlerRef) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            handler,
            items_per_batch: DEFAULT_ITEMS_PER_BATCH,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_delay_secs: 0,
            active: true,
            processing: false,
            total_items: 0,
            total_processed: 0,
            total_failed: 0,
            last_processed: None,
        }
    }

    /// Set the per-pass batch size cap.
    pub fn with_items_per_batch(mut self, items_per_batch: usize) -> Self {
        self.items_per_batch = items_per_batch;
        self
    }

    /// Set the attempt limit.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set the advisory retry delay.
    pub fn with_retry_delay_secs(mut self, secs: u64) -> Self {
        self.retry_delay_secs = secs;
        self
    }

    /// Set whether the queue is active.
    pub fn with_active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }
}

/// Status of a queue item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemStatus {
    /// Waiting for a first attempt.
    Pending,
    /// Currently being handled.
    Processing,
    /// Handled successfully; terminal.
    Completed,
    /// Exhausted its attempts; terminal.
    Failed,
    /// Failed with attempts remaining; eligible for a future pass.
    Retry,
}

impl ItemStatus {
    /// Whether the item is eligible to be picked up by a processing pass.
    pub fn is_eligible(&self) -> bool {
        matches!(self, ItemStatus::Pending | ItemStatus::Retry)
    }

    /// Whether the item has reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ItemStatus::Completed | ItemStatus::Failed)
    }
}

/// A single unit of work within a queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItem {
    /// Unique identity.
    pub id: ItemId,
    /// The owning queue.
    pub queue_id: QueueId,
    /// Opaque structured payload handed to the handler.
    pub payload: Value,
    /// Current lifecycle state.
    pub status: ItemStatus,
    /// Higher priority is drained sooner; ties break oldest-first.
    pub priority: i32,
    /// Attempts made so far.
    pub attempts: u32,
    /// Error from the most recent failed attempt.
    pub error: Option<String>,
    /// When the item was admitted.
    pub created_at: DateTime<Utc>,
    /// When the item reached a terminal state.
    pub processed_at: Option<DateTime<Utc>>,
}

impl QueueItem {
    /// Create a new pending item.
    pub fn new(queue_id: QueueId, payload: Value, priority: i32) -> Self {
        Self {
            id: ItemId::new(),
            queue_id,
            payload,
            status: ItemStatus::Pending,
            priority,
            attempts: 0,
            error: None,
            created_at: Utc::now(),
            processed_at: None,
        }
    }

    /// Mark the item as picked up by a processing pass.
    pub fn mark_processing(&mut self) {
        self.status = ItemStatus::Processing;
        self.attempts += 1;
    }

    /// Mark the item as handled successfully.
    pub fn mark_completed(&mut self) {
        self.status = ItemStatus::Completed;
        self.processed_at = Some(Utc::now());
        self.error = None;
    }

    /// Mark a failed attempt: retry if attempts remain, terminal otherwise.
    pub fn mark_failed(&mut self, error: impl Into<String>, max_attempts: u32) {
        self.error = Some(error.into());
        if self.attempts < max_attempts {
            self.status = ItemStatus::Retry;
        } else {
            self.status = ItemStatus::Failed;
            self.processed_at = Some(Utc::now());
        }
    }
}

/// Summary of one processing pass over a queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    /// Items that completed successfully in this pass.
    pub processed: u64,
    /// Items that reached terminal failure in this pass.
    pub failed: u64,
    /// Items taken from the queue in this pass.
    pub total: u64,
}
