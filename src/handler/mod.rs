//! Handler trait and name-addressed resolution.
//!
//! Handlers are the externally supplied callables the engine invokes. They
//! are addressed by a [`HandlerRef`] (module path + entry point) and
//! resolved through a [`HandlerResolver`], which caches bindings and
//! supports forced invalidation so edited handler code is observed on the
//! next invocation without a process restart.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use thiserror::Error;

use crate::context::ExecutionContext;
use crate::core::types::HandlerRef;

/// Errors raised by handler code.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Handler execution failed with a message.
    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    /// Generic error wrapper.
    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// Errors that can occur while resolving a handler reference.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// No module is registered under the reference's module path.
    #[error("unknown handler module: {0}")]
    UnknownModule(String),

    /// The module exists but has no such entry point.
    #[error("unknown entry point: {0}")]
    UnknownEntryPoint(String),

    /// Loading the handler failed.
    #[error("load failed for {handler}: {message}")]
    LoadFailed {
        /// The reference that failed to load.
        handler: HandlerRef,
        /// Backend error message.
        message: String,
    },

    /// Resolver lock was poisoned.
    #[error("resolver lock poisoned")]
    LockPoisoned,
}

/// The core trait for invokable handler code.
///
/// # Example
///
/// ```ignore
/// use cadence::{ExecutionContext, Handler, HandlerError};
/// use async_trait::async_trait;
/// use serde_json::Value;
///
/// struct DeliverMail;
///
/// #[async_trait]
/// impl Handler for DeliverMail {
///     async fn call(
///         &self,
///         ctx: &ExecutionContext,
///         payload: Option<Value>,
///     ) -> Result<Value, HandlerError> {
///         // deliver payload using ctx.credential ...
///         Ok(Value::Null)
///     }
/// }
/// ```
#[async_trait]
pub trait Handler: Send + Sync {
    /// Invoke the handler.
    ///
    /// `payload` is the queue item payload for queue invocations and `None`
    /// for scheduled job fires (job parameters travel in the context).
    async fn call(
        &self,
        ctx: &ExecutionContext,
        payload: Option<Value>,
    ) -> Result<Value, HandlerError>;
}

/// Contract for the component that turns a textual reference into a callable.
///
/// This is the seam to the platform's module loader; [`StaticLoader`] is the
/// in-process implementation backed by registered constructors.
pub trait HandlerLoader: Send + Sync {
    /// Load a fresh binding for the reference.
    fn load(&self, handler: &HandlerRef) -> Result<Arc<dyn Handler>, ResolveError>;
}

/// Constructor for a handler instance, invoked on every (re)load.
pub type HandlerCtor = Arc<dyn Fn() -> Arc<dyn Handler> + Send + Sync>;

/// In-process loader backed by a map of registered constructors.
pub struct StaticLoader {
    ctors: RwLock<HashMap<HandlerRef, HandlerCtor>>,
}

impl StaticLoader {
    /// Create an empty loader.
    pub fn new() -> Self {
        Self {
            ctors: RwLock::new(HashMap::new()),
        }
    }

    /// Register a constructor under a reference, replacing any prior one.
    ///
    /// Replacing a constructor models an edit to the underlying code; pair
    /// it with [`HandlerResolver::invalidate`] so the new code is picked up.
    pub fn register(&self, handler: HandlerRef, ctor: impl Fn() -> Arc<dyn Handler> + Send + Sync + 'static) {
        if let Ok(mut ctors) = self.ctors.write() {
            ctors.insert(handler, Arc::new(ctor));
        }
    }

    /// Register an already-built handler instance under a reference.
    pub fn register_instance(&self, handler: HandlerRef, instance: Arc<dyn Handler>) {
        self.register(handler, move || Arc::clone(&instance));
    }
}

impl Default for StaticLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl HandlerLoader for StaticLoader {
    fn load(&self, handler: &HandlerRef) -> Result<Arc<dyn Handler>, ResolveError> {
        let ctors = self.ctors.read().map_err(|_| ResolveError::LockPoisoned)?;

        if let Some(ctor) = ctors.get(handler) {
            return Ok(ctor());
        }

        // Distinguish a missing module from a missing entry point for
        // clearer configuration errors.
        if ctors.keys().any(|r| r.module == handler.module) {
            Err(ResolveError::UnknownEntryPoint(handler.to_string()))
        } else {
            Err(ResolveError::UnknownModule(handler.module.clone()))
        }
    }
}

/// Caching resolver over a [`HandlerLoader`].
///
/// Bindings are cached after the first load. [`invalidate`](Self::invalidate)
/// evicts a binding so the next resolution loads fresh code.
pub struct HandlerResolver {
    loader: Arc<dyn HandlerLoader>,
    cache: RwLock<HashMap<HandlerRef, Arc<dyn Handler>>>,
}

impl HandlerResolver {
    /// Create a resolver over the given loader.
    pub fn new(loader: Arc<dyn HandlerLoader>) -> Self {
        Self {
            loader,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Resolve a reference to a callable, loading and caching on a miss.
    pub fn resolve(&self, handler: &HandlerRef) -> Result<Arc<dyn Handler>, ResolveError> {
        {
            let cache = self.cache.read().map_err(|_| ResolveError::LockPoisoned)?;
            if let Some(bound) = cache.get(handler) {
                return Ok(Arc::clone(bound));
            }
        }

        let loaded = self.loader.load(handler)?;
        let mut cache = self.cache.write().map_err(|_| ResolveError::LockPoisoned)?;
        cache.insert(handler.clone(), Arc::clone(&loaded));
        Ok(loaded)
    }

    /// Evict one cached binding; the next resolve reloads it.
    pub fn invalidate(&self, handler: &HandlerRef) {
        if let Ok(mut cache) = self.cache.write() {
            cache.remove(handler);
        }
    }

    /// Evict all cached bindings.
    pub fn invalidate_all(&self) {
        if let Ok(mut cache) = self.cache.write() {
            cache.clear();
        }
    }
}
