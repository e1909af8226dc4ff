//! Reconciling scheduler.

mod engine;

pub use engine::{Scheduler, SchedulerError};
