//! Reconciling scheduler engine.
//!
//! The scheduler owns an in-memory table of {job id -> armed timer} and
//! keeps it in sync with the registry, which is authoritative. On every
//! fire the job's row is re-read: a deleted or deactivated job stops its
//! timer; a changed schedule, handler, or parameter set re-arms from the
//! fresh row and skips that fire. The scheduler therefore never executes
//! with a stale copy of a job's configuration, and external edits are
//! reflected within at most one firing interval.
//!
//! A handler failure is caught at the call site, recorded into the job's
//! telemetry and the audit trail, and never propagates out of the timer
//! task: one misbehaving job cannot stop the process or other jobs.
//!
//! Known hazards, deliberate and documented: there is no overlap guard for
//! a job that fires again while a previous run is still in flight (queues
//! have a mutex, scheduled jobs do not), and no watchdog around a hung
//! handler.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::audit::{AuditEntry, AuditSink};
use crate::context::ExecutionContext;
use crate::core::job::{JobOutcome, ScheduledJob};
use crate::core::schedule::{Schedule, ScheduleError};
use crate::core::types::{HandlerRef, JobId};
use crate::credential::CredentialMinter;
use crate::handler::HandlerResolver;
use crate::registry::{Registry, RegistryError};

/// Audit module name used for scheduler entries.
const AUDIT_MODULE: &str = "scheduler";

/// Errors that can occur in the scheduler.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Job not found in the registry.
    #[error("job not found: {0}")]
    JobNotFound(String),

    /// The job is not active.
    #[error("job not active: {0}")]
    JobInactive(String),

    /// The job's schedule could not be parsed.
    #[error("invalid schedule: {0}")]
    InvalidSchedule(#[from] ScheduleError),

    /// Registry error.
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),
}

/// The job configuration captured when a timer is armed.
///
/// Compared against the fresh row on every fire to detect drift.
#[derive(Debug, Clone, PartialEq)]
struct JobSnapshot {
    schedule: String,
    handler: HandlerRef,
    parameters: Option<Value>,
}

impl JobSnapshot {
    fn of(job: &ScheduledJob) -> Self {
        Self {
            schedule: job.schedule.clone(),
            handler: job.handler.clone(),
            parameters: job.parameters().cloned(),
        }
    }
}

/// One armed timer.
struct ArmedJob {
    handle: JoinHandle<()>,
    snapshot: JobSnapshot,
}

/// What the timer loop should do after a fire.
enum FireDisposition {
    /// Keep the timer running.
    Continue,
    /// The timer was dropped or replaced; end this loop.
    Stop,
}

struct SchedulerInner {
    registry: Arc<dyn Registry>,
    resolver: Arc<HandlerResolver>,
    minter: Arc<dyn CredentialMinter>,
    audit: Arc<dyn AuditSink>,
    timers: RwLock<HashMap<JobId, ArmedJob>>,
}

/// The reconciling scheduler.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl Scheduler {
    /// Create a scheduler over the given collaborators. No timers are
    /// armed until [`initialize`](Self::initialize) is called.
    pub fn new(
        registry: Arc<dyn Registry>,
        resolver: Arc<HandlerResolver>,
        minter: Arc<dyn CredentialMinter>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                registry,
                resolver,
                minter,
                audit,
                timers: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Load all active jobs and arm one timer per row.
    ///
    /// Idempotent: any previously held timers are cancelled first. Returns
    /// the number of jobs armed once arming completes; does not wait for
    /// any first execution. Jobs with an unparseable schedule are skipped
    /// for this cycle and logged, never fatal.
    pub async fn initialize(&self) -> Result<usize, SchedulerError> {
        let jobs = self.inner.registry.list_active_jobs().await?;

        {
            let mut timers = self.inner.timers.write().await;
            for (_, armed) in timers.drain() {
                armed.handle.abort();
            }
        }

        let mut armed = 0;
        for job in jobs {
            match Self::arm(&self.inner, &job).await {
                Ok(()) => armed += 1,
                Err(e) => {
                    tracing::warn!(job_id = %job.id, name = %job.name, error = %e,
                        "skipping job with invalid configuration");
                }
            }
        }

        tracing::info!(armed, "scheduler initialized");
        Ok(armed)
    }

    /// Cancel all timers.
    pub async fn shutdown(&self) {
        let mut timers = self.inner.timers.write().await;
        for (_, armed) in timers.drain() {
            armed.handle.abort();
        }
    }

    /// Ids of the currently armed jobs.
    pub async fn armed_jobs(&self) -> Vec<JobId> {
        self.inner.timers.read().await.keys().cloned().collect()
    }

    /// Whether a timer is armed for the job.
    pub async fn is_armed(&self, id: &JobId) -> bool {
        self.inner.timers.read().await.contains_key(id)
    }

    /// Manually execute a job now, bypassing its timer and the drift
    /// check. Refuses inactive jobs. Returns the recorded outcome; handler
    /// failure shows up as `success = false` with the error in the log,
    /// not as an `Err`.
    pub async fn force_run(&self, id: &JobId) -> Result<JobOutcome, SchedulerError> {
        let job = match self.inner.registry.get_job(id).await {
            Ok(job) => job,
            Err(RegistryError::NotFound(_)) => {
                return Err(SchedulerError::JobNotFound(id.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        if !job.active {
            return Err(SchedulerError::JobInactive(job.name));
        }

        Ok(Self::execute(&self.inner, &job).await)
    }

    /// Arm a timer for a job. Replaces any existing entry under one write
    /// lock so a concurrent `initialize` cannot leave an untracked timer
    /// behind.
    // Returns a boxed future to break the `arm` -> `timer_loop` ->
    // `on_fire` -> `arm` auto-trait cycle the compiler cannot resolve.
    fn arm<'a>(
        inner: &'a Arc<SchedulerInner>,
        job: &'a ScheduledJob,
    ) -> std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<(), SchedulerError>> + Send + 'a>,
    > {
        Box::pin(async move {
            let schedule = Schedule::parse(&job.schedule)?;
            let snapshot = JobSnapshot::of(job);

            let mut timers = inner.timers.write().await;

            let task_inner = Arc::clone(inner);
            let task_id = job.id.clone();
            let task_snapshot = snapshot.clone();
            let handle = tokio::spawn(async move {
                Self::timer_loop(task_inner, task_id, schedule, task_snapshot).await;
            });

            if let Some(previous) = timers.insert(job.id.clone(), ArmedJob { handle, snapshot }) {
                previous.handle.abort();
            }

            tracing::debug!(job_id = %job.id, name = %job.name, schedule = %job.schedule, "job armed");
            Ok(())
        })
    }

    /// The per-job timer task: sleep until the next occurrence, fire,
    /// repeat until the job is dropped or re-armed.
    async fn timer_loop(
        inner: Arc<SchedulerInner>,
        job_id: JobId,
        schedule: Schedule,
        snapshot: JobSnapshot,
    ) {
        loop {
            let next = match schedule.next_after(Utc::now()) {
                Ok(next) => next,
                Err(e) => {
                    tracing::warn!(job_id = %job_id, error = %e, "no next occurrence, dropping timer");
                    inner.timers.write().await.remove(&job_id);
                    return;
                }
            };

            let delay = (next - Utc::now()).to_std().unwrap_or_default();
            tokio::time::sleep(delay).await;

            match Self::on_fire(&inner, &job_id, &snapshot).await {
                FireDisposition::Continue => continue,
                FireDisposition::Stop => return,
            }
        }
    }

    /// One timer fire: reconcile against the registry, then execute.
    async fn on_fire(
        inner: &Arc<SchedulerInner>,
        job_id: &JobId,
        snapshot: &JobSnapshot,
    ) -> FireDisposition {
        let fresh = match inner.registry.get_job(job_id).await {
            Ok(job) => job,
            Err(RegistryError::NotFound(_)) => {
                tracing::info!(job_id = %job_id, "job deleted, dropping timer");
                inner.timers.write().await.remove(job_id);
                return FireDisposition::Stop;
            }
            Err(e) => {
                // Transient read failure: skip this fire, keep the timer.
                tracing::warn!(job_id = %job_id, error = %e, "registry read failed, skipping fire");
                return FireDisposition::Continue;
            }
        };

        if !fresh.active {
            tracing::info!(job_id = %job_id, name = %fresh.name, "job deactivated, dropping timer");
            inner.timers.write().await.remove(job_id);
            return FireDisposition::Stop;
        }

        if JobSnapshot::of(&fresh) != *snapshot {
            // Drift: re-arm from the fresh row and skip this fire.
            tracing::info!(job_id = %job_id, name = %fresh.name, "job definition changed, re-arming");
            if let Err(e) = Self::arm(inner, &fresh).await {
                tracing::warn!(job_id = %job_id, error = %e,
                    "re-arm failed, job skipped until next initialize");
                inner.timers.write().await.remove(job_id);
            }
            return FireDisposition::Stop;
        }

        Self::execute(inner, &fresh).await;
        FireDisposition::Continue
    }

    /// Execute a job and write back telemetry. Never propagates handler,
    /// resolution, or minting failures.
    async fn execute(inner: &Arc<SchedulerInner>, job: &ScheduledJob) -> JobOutcome {
        let outcome = match Self::invoke(inner, job).await {
            Ok(_) => {
                tracing::debug!(job_id = %job.id, name = %job.name, "job handler completed");
                inner
                    .audit
                    .record(
                        AuditEntry::normal(AUDIT_MODULE, format!("job {} executed", job.name))
                            .with_context(json!({
                                "job_id": job.id.to_string(),
                                "handler": job.handler.to_string(),
                            })),
                    )
                    .await;
                JobOutcome::success("handler completed")
            }
            Err(message) => {
                tracing::warn!(job_id = %job.id, name = %job.name, error = %message, "job handler failed");
                inner
                    .audit
                    .record(
                        AuditEntry::error(AUDIT_MODULE, format!("job {} failed", job.name))
                            .with_context(json!({
                                "job_id": job.id.to_string(),
                                "handler": job.handler.to_string(),
                                "parameters": job.parameters().cloned().unwrap_or(Value::Null),
                            }))
                            .with_stack(message.clone()),
                    )
                    .await;
                JobOutcome::failure(message)
            }
        };

        if let Err(e) = inner
            .registry
            .record_job_outcome(&job.id, outcome.clone())
            .await
        {
            tracing::warn!(job_id = %job.id, error = %e, "failed to write back job telemetry");
        }

        outcome
    }

    /// Resolve, mint, build the context, and call the handler. Errors are
    /// flattened into a message for the telemetry log.
    async fn invoke(inner: &Arc<SchedulerInner>, job: &ScheduledJob) -> Result<Value, String> {
        let handler = inner
            .resolver
            .resolve(&job.handler)
            .map_err(|e| e.to_string())?;

        let credential = inner.minter.mint().await.map_err(|e| e.to_string())?;

        let ctx = ExecutionContext::for_job(
            Arc::clone(&inner.registry),
            credential,
            job.id.clone(),
            job.name.clone(),
            job.handler.clone(),
            job.parameters().cloned(),
        );

        handler.call(&ctx, None).await.map_err(|e| e.to_string())
    }
}
