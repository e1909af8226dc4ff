//! Queue processing engine.
//!
//! Drains a queue in priority order with a bounded batch size,
//! attempt-limited retry, and a per-queue execution mutex. The mutex is a
//! `processing` flag persisted in the registry and acquired through an
//! atomic conditional update ([`Registry::try_begin_processing`]), so two
//! triggers racing to drain the same queue resolve to exactly one worker.
//!
//! The flag is cleared on every pass exit, including the error path;
//! skipping that would deadlock the queue until a process restart.
//!
//! Note: `retry_delay_secs` on the queue is advisory. Retry items are
//! eligible on the very next pass; the cadence of the periodic drain job
//! is what throttles retries in practice.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use thiserror::Error;

use crate::audit::{AuditEntry, AuditSink};
use crate::context::ExecutionContext;
use crate::core::queue::{BatchReport, ItemStatus, Queue};
use crate::core::types::QueueId;
use crate::credential::{CredentialError, CredentialMinter};
use crate::handler::{Handler, HandlerError, HandlerResolver, ResolveError};
use crate::registry::{Registry, RegistryError};

/// Audit module name used for queue entries.
const AUDIT_MODULE: &str = "queue";

/// Errors that can occur while processing a queue.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The queue is not active.
    #[error("queue not active: {0}")]
    QueueInactive(String),

    /// Registry error.
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    /// The queue's handler could not be resolved.
    #[error("handler resolution failed: {0}")]
    Resolve(#[from] ResolveError),

    /// A credential could not be minted for the pass.
    #[error("credential error: {0}")]
    Credential(#[from] CredentialError),
}

/// Result of a `process_queue` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// A pass ran; the report summarizes it.
    Completed(BatchReport),
    /// Another pass holds the queue's mutex; nothing was done.
    AlreadyProcessing,
}

impl ProcessOutcome {
    /// The batch report, if a pass ran.
    pub fn report(&self) -> Option<&BatchReport> {
        match self {
            ProcessOutcome::Completed(report) => Some(report),
            ProcessOutcome::AlreadyProcessing => None,
        }
    }
}

/// Per-queue result collected by [`QueueProcessor::drain_all`].
#[derive(Debug)]
pub struct DrainResult {
    /// Queue name.
    pub queue: String,
    /// Outcome for this queue.
    pub outcome: Result<ProcessOutcome, ProcessError>,
}

/// The queue processing engine.
pub struct QueueProcessor {
    registry: Arc<dyn Registry>,
    resolver: Arc<HandlerResolver>,
    minter: Arc<dyn CredentialMinter>,
    audit: Arc<dyn AuditSink>,
}

impl QueueProcessor {
    /// Create a new processor over the given collaborators.
    pub fn new(
        registry: Arc<dyn Registry>,
        resolver: Arc<HandlerResolver>,
        minter: Arc<dyn CredentialMinter>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            registry,
            resolver,
            minter,
            audit,
        }
    }

    /// Run one processing pass over a queue.
    ///
    /// Takes at most `items_per_batch` eligible items; a queue with more
    /// backlog needs further calls (normally driven by the periodic drain
    /// job). Returns [`ProcessOutcome::AlreadyProcessing`] without touching
    /// anything when another pass holds the mutex.
    pub async fn process_queue(&self, id: &QueueId) -> Result<ProcessOutcome, ProcessError> {
        let queue = self.registry.get_queue(id).await?;
        if !queue.active {
            return Err(ProcessError::QueueInactive(queue.name));
        }

        if !self.registry.try_begin_processing(id).await? {
            tracing::debug!(queue_id = %id, "queue already processing, skipping pass");
            return Ok(ProcessOutcome::AlreadyProcessing);
        }

        let mut report = BatchReport::default();
        let outcome = self.run_batch(&queue, &mut report).await;

        // The mutex must be released whatever happened above.
        let finished = self
            .registry
            .finish_processing(id, report.processed, report.failed)
            .await;

        match outcome {
            Ok(()) => {
                finished?;
                tracing::info!(
                    queue_id = %id,
                    processed = report.processed,
                    failed = report.failed,
                    total = report.total,
                    "queue pass complete"
                );
                Ok(ProcessOutcome::Completed(report))
            }
            Err(e) => {
                if let Err(fe) = finished {
                    tracing::warn!(queue_id = %id, error = %fe, "failed to finalize queue after error");
                }
                tracing::warn!(queue_id = %id, error = %e, "queue pass failed");
                Err(e)
            }
        }
    }

    /// Drain every active, non-busy queue once.
    ///
    /// One queue's failure never aborts the others; each queue's result is
    /// collected independently.
    pub async fn drain_all(&self) -> Result<Vec<DrainResult>, ProcessError> {
        let queues = self.registry.list_queues().await?;
        let mut results = Vec::new();

        for queue in queues {
            if !queue.active || queue.processing {
                continue;
            }
            let outcome = self.process_queue(&queue.id).await;
            results.push(DrainResult {
                queue: queue.name,
                outcome,
            });
        }

        Ok(results)
    }

    /// Fetch a batch, resolve the handler once, and work the items
    /// sequentially. Counters accumulate in `report` so they survive an
    /// early error return.
    async fn run_batch(
        &self,
        queue: &Queue,
        report: &mut BatchReport,
    ) -> Result<(), ProcessError> {
        let items = self
            .registry
            .fetch_batch(&queue.id, queue.items_per_batch)
            .await?;

        if items.is_empty() {
            return Ok(());
        }

        // One handler binding and one credential for the whole batch.
        let handler = self.resolver.resolve(&queue.handler)?;
        let credential = self.minter.mint().await?;
        let identity = credential.identity_id.clone();
        let ctx = ExecutionContext::for_queue(
            Arc::clone(&self.registry),
            credential,
            queue.id.clone(),
            queue.name.clone(),
            queue.handler.clone(),
        );

        for mut item in items {
            report.total += 1;

            item.mark_processing();
            if let Err(e) = self.registry.update_item(item.clone()).await {
                tracing::warn!(item_id = %item.id, error = %e, "failed to persist item pickup");
            }

            match handler.call(&ctx, Some(item.payload.clone())).await {
                Ok(_) => {
                    item.mark_completed();
                    report.processed += 1;
                    self.audit
                        .record(
                            AuditEntry::normal(
                                AUDIT_MODULE,
                                format!("processed item {} from queue {}", item.id, queue.name),
                            )
                            .with_identity(identity.clone())
                            .with_context(json!({
                                "queue": queue.name,
                                "item": item.id.to_string(),
                                "attempts": item.attempts,
                            })),
                        )
                        .await;
                }
                Err(e) => {
                    item.mark_failed(e.to_string(), queue.max_attempts);
                    if item.status == ItemStatus::Failed {
                        report.failed += 1;
                    }
                    self.audit
                        .record(
                            AuditEntry::error(
                                AUDIT_MODULE,
                                format!(
                                    "item {} from queue {} failed (attempt {}/{})",
                                    item.id, queue.name, item.attempts, queue.max_attempts
                                ),
                            )
                            .with_identity(identity.clone())
                            .with_context(json!({
                                "queue": queue.name,
                                "item": item.id.to_string(),
                                "attempts": item.attempts,
                                "terminal": item.status == ItemStatus::Failed,
                            }))
                            .with_stack(e.to_string()),
                        )
                        .await;
                }
            }

            if let Err(e) = self.registry.update_item(item.clone()).await {
                tracing::warn!(item_id = %item.id, error = %e, "failed to persist item outcome");
            }
        }

        Ok(())
    }
}

/// Handler that drains all queues, so draining can itself be scheduled as
/// a periodic batch job.
pub struct DrainAllHandler {
    processor: Arc<QueueProcessor>,
}

impl DrainAllHandler {
    /// Wrap a processor.
    pub fn new(processor: Arc<QueueProcessor>) -> Self {
        Self { processor }
    }
}

#[async_trait]
impl Handler for DrainAllHandler {
    async fn call(
        &self,
        _ctx: &ExecutionContext,
        _payload: Option<Value>,
    ) -> Result<Value, HandlerError> {
        let results = self
            .processor
            .drain_all()
            .await
            .map_err(|e| HandlerError::ExecutionFailed(e.to_string()))?;

        let summary: Vec<Value> = results
            .iter()
            .map(|r| match &r.outcome {
                Ok(ProcessOutcome::Completed(report)) => json!({
                    "queue": r.queue,
                    "processed": report.processed,
                    "failed": report.failed,
                    "total": report.total,
                }),
                Ok(ProcessOutcome::AlreadyProcessing) => json!({
                    "queue": r.queue,
                    "skipped": "already processing",
                }),
                Err(e) => json!({
                    "queue": r.queue,
                    "error": e.to_string(),
                }),
            })
            .collect();

        Ok(Value::Array(summary))
    }
}
