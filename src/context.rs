//! Execution context passed to every handler invocation.
//!
//! The context bundles the storage handle, a freshly minted credential,
//! and metadata about the job or queue on whose behalf the handler runs.
//! Handlers reach back into the platform through it, including enqueueing
//! further work.

use std::sync::Arc;

use serde_json::Value;

use crate::core::types::{HandlerRef, JobId, QueueId};
use crate::credential::Credential;
use crate::registry::Registry;

/// What a handler is running on behalf of.
#[derive(Debug, Clone)]
pub enum TargetDescriptor {
    /// A scheduled job fire.
    Job {
        /// Job id.
        id: JobId,
        /// Job name.
        name: String,
        /// The handler reference that was resolved.
        handler: HandlerRef,
    },
    /// A queue processing pass.
    Queue {
        /// Queue id.
        id: QueueId,
        /// Queue name.
        name: String,
        /// The handler reference that was resolved.
        handler: HandlerRef,
    },
}

impl TargetDescriptor {
    /// Operator-facing name of the target.
    pub fn name(&self) -> &str {
        match self {
            TargetDescriptor::Job { name, .. } => name,
            TargetDescriptor::Queue { name, .. } => name,
        }
    }
}

/// The bundle handed to every handler invocation.
#[derive(Clone)]
pub struct ExecutionContext {
    /// Storage handle for authorized calls back into the platform.
    pub registry: Arc<dyn Registry>,
    /// Short-lived credential for the executing identity.
    pub credential: Credential,
    /// The job or queue this invocation serves.
    pub target: TargetDescriptor,
    /// Batch job parameters, if any.
    pub parameters: Option<Value>,
}

impl ExecutionContext {
    /// Build a context for a scheduled job fire.
    pub fn for_job(
        registry: Arc<dyn Registry>,
        credential: Credential,
        id: JobId,
        name: impl Into<String>,
        handler: HandlerRef,
        parameters: Option<Value>,
    ) -> Self {
        Self {
            registry,
            credential,
            target: TargetDescriptor::Job {
                id,
                name: name.into(),
                handler,
            },
            parameters,
        }
    }

    /// Build a context for a queue processing pass.
    pub fn for_queue(
        registry: Arc<dyn Registry>,
        credential: Credential,
        id: QueueId,
        name: impl Into<String>,
        handler: HandlerRef,
    ) -> Self {
        Self {
            registry,
            credential,
            target: TargetDescriptor::Queue {
                id,
                name: name.into(),
                handler,
            },
            parameters: None,
        }
    }
}
