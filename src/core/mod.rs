//! Core data model: identifiers, schedules, jobs, and queues.

pub mod job;
pub mod queue;
pub mod schedule;
pub mod types;

pub use job::{ExecutionCounters, JobKind, JobOutcome, ScheduledJob};
pub use queue::{BatchReport, ItemStatus, Queue, QueueItem};
pub use schedule::{Schedule, ScheduleError};
pub use types::{HandlerRef, ItemId, JobId, QueueId};
