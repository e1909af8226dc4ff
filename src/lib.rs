pub mod admin;
pub mod audit;
pub mod context;
pub mod core;
pub mod credential;
pub mod handler;
pub mod queue;
pub mod registry;
pub mod scheduler;
pub mod testing;

pub use admin::{Admin, AdminError, QueueStats};
pub use audit::{AuditEntry, AuditSink, Severity, TracingAuditSink};
pub use context::{ExecutionContext, TargetDescriptor};
pub use self::core::job::{ExecutionCounters, JobKind, JobOutcome, ScheduledJob};
pub use self::core::queue::{BatchReport, ItemStatus, Queue, QueueItem};
pub use self::core::schedule::{Schedule, ScheduleError};
pub use self::core::types::{HandlerRef, ItemId, JobId, QueueId};
pub use credential::{Credential, CredentialError, CredentialMinter, SystemMinter};
pub use handler::{Handler, HandlerError, HandlerLoader, HandlerResolver, ResolveError, StaticLoader};
pub use queue::{DrainAllHandler, DrainResult, ProcessError, ProcessOutcome, QueueProcessor};
pub use registry::{InMemoryRegistry, Registry, RegistryError};
pub use scheduler::{Scheduler, SchedulerError};
