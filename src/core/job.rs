//! Scheduled job definitions.
//!
//! A [`ScheduledJob`] ties a cron expression to a handler reference. Two
//! concrete kinds share the shape: plain cron jobs, and batch jobs which
//! additionally carry an opaque parameter payload and execution counters.
//!
//! The registry row is authoritative: the scheduler re-reads the job on
//! every fire and must never execute with a stale copy of the schedule or
//! handler reference.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::types::{HandlerRef, JobId};

/// Monotonically increasing execution counters kept on batch jobs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionCounters {
    /// Total number of executions, successful or not.
    pub total_executions: u64,
    /// Executions whose handler completed without error.
    pub total_success: u64,
    /// Executions whose handler raised an error.
    pub total_errors: u64,
}

/// The two concrete kinds of scheduled job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum JobKind {
    /// A plain cron job: no parameters, no counters.
    Cron,
    /// A batch job: carries parameters for the handler and execution counters.
    Batch {
        /// Opaque structured payload passed to the handler on every run.
        parameters: Option<Value>,
        /// Lifetime execution counters.
        counters: ExecutionCounters,
    },
}

/// A periodically executed unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledJob {
    /// Internal identity; the scheduler's timer key.
    pub id: JobId,
    /// Unique, operator-facing name.
    pub name: String,
    /// Free-form description.
    pub description: String,
    /// The code to run, addressed by module path and entry point.
    pub handler: HandlerRef,
    /// 5-field cron expression driving the firing cadence.
    pub schedule: String,
    /// Inactive jobs are never armed and refuse manual runs.
    pub active: bool,
    /// Cron or batch flavor.
    pub kind: JobKind,
    /// When the job last ran. Overwritten every run; no history is kept.
    pub last_execution: Option<DateTime<Utc>>,
    /// Whether the last run succeeded.
    pub last_success: Option<bool>,
    /// Log line from the last run.
    pub last_log: Option<String>,
}

impl ScheduledJob {
    /// Create a new cron job.
    pub fn cron(
        id: impl Into<JobId>,
        name: impl Into<String>,
        handler: HandlerRef,
        schedule: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            handler,
            schedule: schedule.into(),
            active: true,
            kind: JobKind::Cron,
            last_execution: None,
            last_success: None,
            last_log: None,
        }
    }

    /// Create a new batch job with optional parameters.
    pub fn batch(
        id: impl Into<JobId>,
        name: impl Into<String>,
        handler: HandlerRef,
        schedule: impl Into<String>,
        parameters: Option<Value>,
    ) -> Self {
        Self {
            kind: JobKind::Batch {
                parameters,
                counters: ExecutionCounters::default(),
            },
            ..Self::cron(id, name, handler, schedule)
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set whether the job is active.
    pub fn with_active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }

    /// The batch parameters, if this is a batch job.
    pub fn parameters(&self) -> Option<&Value> {
        match &self.kind {
            JobKind::Batch { parameters, .. } => parameters.as_ref(),
            JobKind::Cron => None,
        }
    }

    /// The execution counters, if this is a batch job.
    pub fn counters(&self) -> Option<&ExecutionCounters> {
        match &self.kind {
            JobKind::Batch { counters, .. } => Some(counters),
            JobKind::Cron => None,
        }
    }

    /// Record the outcome of a run: telemetry always, counters for batch jobs.
    pub fn record_outcome(&mut self, outcome: &JobOutcome) {
        self.last_execution = Some(outcome.executed_at);
        self.last_success = Some(outcome.success);
        self.last_log = Some(outcome.log.clone());

        if let JobKind::Batch { counters, .. } = &mut self.kind {
            counters.total_executions += 1;
            if outcome.success {
                counters.total_success += 1;
            } else {
                counters.total_errors += 1;
            }
        }
    }
}

/// The result of one job execution, written back after every run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobOutcome {
    /// When the run happened.
    pub executed_at: DateTime<Utc>,
    /// Whether the handler completed without error.
    pub success: bool,
    /// Human-readable log line for the run.
    pub log: String,
}

impl JobOutcome {
    /// Record a successful run.
    pub fn success(log: impl Into<String>) -> Self {
        Self {
            executed_at: Utc::now(),
            success: true,
            log: log.into(),
        }
    }

    /// Record a failed run.
    pub fn failure(log: impl Into<String>) -> Self {
        Self {
            executed_at: Utc::now(),
            success: false,
            log: log.into(),
        }
    }
}
