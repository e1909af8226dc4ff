//! Audit log sink.
//!
//! Every handler invocation leaves an audit trail entry regardless of
//! outcome. The sink contract is infallible: a failure to write an audit
//! entry must never throw back into the engine, so implementations swallow
//! their own errors and at most log them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Severity of an audit entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    /// Routine activity.
    Normal,
    /// Noteworthy but non-fatal.
    Warning,
    /// A failure.
    Error,
}

/// A single audit trail entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Name of the emitting module (e.g. "scheduler", "queue").
    pub module: String,
    /// Human-readable message.
    pub message: String,
    /// Entry severity.
    pub severity: Severity,
    /// Identity on whose behalf the work ran, if known.
    pub identity_id: Option<String>,
    /// Optional structured context.
    pub context: Option<Value>,
    /// Optional stack trace or error chain.
    pub stack: Option<String>,
    /// When the entry was created.
    pub recorded_at: DateTime<Utc>,
}

impl AuditEntry {
    /// Create an entry with the given severity.
    pub fn new(module: impl Into<String>, message: impl Into<String>, severity: Severity) -> Self {
        Self {
            module: module.into(),
            message: message.into(),
            severity,
            identity_id: None,
            context: None,
            stack: None,
            recorded_at: Utc::now(),
        }
    }

    /// Create a Normal-severity entry.
    pub fn normal(module: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(module, message, Severity::Normal)
    }

    /// Create an Error-severity entry.
    pub fn error(module: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(module, message, Severity::Error)
    }

    /// Attach the acting identity.
    pub fn with_identity(mut self, identity_id: impl Into<String>) -> Self {
        self.identity_id = Some(identity_id.into());
        self
    }

    /// Attach structured context.
    pub fn with_context(mut self, context: Value) -> Self {
        self.context = Some(context);
        self
    }

    /// Attach a stack trace or error chain.
    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }
}

/// Contract for the audit log writer.
///
/// Implementations must never propagate failures to the caller.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Record an entry.
    async fn record(&self, entry: AuditEntry);
}

/// Audit sink that forwards entries to the `tracing` subscriber.
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, entry: AuditEntry) {
        match entry.severity {
            Severity::Normal => tracing::info!(
                module = %entry.module,
                identity = ?entry.identity_id,
                context = ?entry.context,
                "{}",
                entry.message
            ),
            Severity::Warning => tracing::warn!(
                module = %entry.module,
                identity = ?entry.identity_id,
                context = ?entry.context,
                "{}",
                entry.message
            ),
            Severity::Error => tracing::error!(
                module = %entry.module,
                identity = ?entry.identity_id,
                context = ?entry.context,
                stack = ?entry.stack,
                "{}",
                entry.message
            ),
        }
    }
}
