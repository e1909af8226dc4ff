//! Testing utilities for users of the engine.
//!
//! Provides handler doubles and a capturing audit sink:
//!
//! - [`RecordingHandler`]: succeeds and captures every invocation
//! - [`FailingHandler`]: always fails, or fails N times then succeeds
//! - [`MemoryAuditSink`]: captures audit entries for assertions

use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::audit::{AuditEntry, AuditSink};
use crate::context::ExecutionContext;
use crate::handler::{Handler, HandlerError};

/// A recorded handler invocation.
#[derive(Debug, Clone)]
pub struct Invocation {
    /// The target name from the execution context.
    pub target: String,
    /// The payload handed to the handler, if any.
    pub payload: Option<Value>,
    /// The context parameters, if any.
    pub parameters: Option<Value>,
}

/// Handler that succeeds and records every invocation.
pub struct RecordingHandler {
    invocations: Mutex<Vec<Invocation>>,
    result: Value,
}

impl RecordingHandler {
    /// Create a handler returning `Value::Null`.
    pub fn succeeding() -> Arc<Self> {
        Arc::new(Self {
            invocations: Mutex::new(Vec::new()),
            result: Value::Null,
        })
    }

    /// Create a handler returning a fixed value.
    pub fn returning(result: Value) -> Arc<Self> {
        Arc::new(Self {
            invocations: Mutex::new(Vec::new()),
            result,
        })
    }

    /// All invocations recorded so far.
    pub async fn invocations(&self) -> Vec<Invocation> {
        self.invocations.lock().await.clone()
    }

    /// Number of invocations recorded so far.
    pub async fn call_count(&self) -> usize {
        self.invocations.lock().await.len()
    }
}

#[async_trait]
impl Handler for RecordingHandler {
    async fn call(
        &self,
        ctx: &ExecutionContext,
        payload: Option<Value>,
    ) -> Result<Value, HandlerError> {
        self.invocations.lock().await.push(Invocation {
            target: ctx.target.name().to_string(),
            payload,
            parameters: ctx.parameters.clone(),
        });
        Ok(self.result.clone())
    }
}

/// Handler that fails a configurable number of times.
pub struct FailingHandler {
    /// Calls that fail before the handler starts succeeding; `None` fails forever.
    failures: Option<u32>,
    calls: AtomicU32,
    message: String,
}

impl FailingHandler {
    /// Fail on every call.
    pub fn always(message: impl Into<String>) -> Self {
        Self {
            failures: None,
            calls: AtomicU32::new(0),
            message: message.into(),
        }
    }

    /// Fail the first `n` calls, then succeed.
    pub fn fail_n_times(n: u32, message: impl Into<String>) -> Self {
        Self {
            failures: Some(n),
            calls: AtomicU32::new(0),
            message: message.into(),
        }
    }

    /// Total calls seen so far.
    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Handler for FailingHandler {
    async fn call(
        &self,
        _ctx: &ExecutionContext,
        _payload: Option<Value>,
    ) -> Result<Value, HandlerError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        match self.failures {
            Some(n) if call >= n => Ok(Value::Null),
            _ => Err(HandlerError::ExecutionFailed(self.message.clone())),
        }
    }
}

/// Audit sink that captures entries in memory.
pub struct MemoryAuditSink {
    entries: Mutex<Vec<AuditEntry>>,
}

impl MemoryAuditSink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }

    /// All entries recorded so far.
    pub async fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().await.clone()
    }
}

impl Default for MemoryAuditSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn record(&self, entry: AuditEntry) {
        self.entries.lock().await.push(entry);
    }
}
