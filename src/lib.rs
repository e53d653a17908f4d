//! # ipcvisor
//!
//! **ipcvisor** supervises calls from an application into a separate,
//! privileged backup-worker process.
//!
//! It provides a service lifecycle state machine, a retry/timeout executor, an
//! error handling and recovery subsystem, and the connection supervisor that
//! moves operation envelopes to the worker and results back.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!        caller
//!          │ execute(IpcOperation)
//!          ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  WorkerService                                                    │
//! │  - Lifecycle            (uninitialized → … → running → stopped)   │
//! │  - ErrorHandlingService (category → Retry/Fallback/Cleanup/Term.) │
//! │  - ErrorRecoveryService (priority-ordered recovery operations)    │
//! └──────┬────────────────────────────────────────────────────────────┘
//!        ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  ConnectionSupervisor                                             │
//! │  - SandboxPolicy  (operation checks, peer verification)           │
//! │  - admission      (max_concurrent_operations, Queue / FailFast)   │
//! │  - with_retry_if ─► with_timeout ─► Channel (single / pool)       │
//! └──────┬───────────────────────────────────────────────┬────────────┘
//!        │ frames: [len][version][kind][body]            │ publishes
//!        ▼                                               ▼
//!   backup worker                               Bus (broadcast events)
//!                                                        │
//!                                                  SubscriberSet
//!                                                 ┌──────┴──────┐
//!                                                 ▼             ▼
//!                                             LogWriter       custom
//! ```
//!
//! ### Dispatch
//! ```text
//! execute(op)
//!   ├─► lifecycle.validate_usable          ──✗──► LifecycleError::InvalidState
//!   └─► errors.run("dispatch", metadata)
//!          └─► supervisor.dispatch(op)
//!                 ├─ sandbox / admission   ──✗──► IpcError (not retried)
//!                 └─ loop attempt in 1..=1+max_retry_attempts
//!                       ├─ with_timeout(operation_timeout)
//!                       │     └─ connect? → handshake → send → recv → id check
//!                       ├─ Ok  ──► IpcResult
//!                       └─ Err ──► transient? sleep(retry_delay × attempt) : return
//!          on Err: handler[category] ──► Retry | Fallback | Cleanup | Terminate
//! ```
//!
//! ## Features
//! | Area               | Description                                              | Key types / traits                                |
//! |--------------------|----------------------------------------------------------|---------------------------------------------------|
//! | **Lifecycle**      | Guarded state transitions with hooks.                    | [`Lifecycle`], [`ServiceLifecycle`]               |
//! | **Executor**       | Linear-backoff retry and cancelling timeouts.            | [`with_retry`], [`with_timeout`], [`Executor`]    |
//! | **Recovery**       | Strategy per error category, prioritised recovery.       | [`ErrorHandlingService`], [`ErrorRecoveryService`]|
//! | **IPC**            | Configuration, envelopes, wire codec, supervisor.        | [`IpcConfiguration`], [`ConnectionSupervisor`]    |
//! | **Subscriber API** | Hook into lifecycle, recovery and dispatch events.       | [`Subscribe`], [`SubscriberSet`]                  |
//! | **Errors**         | Typed errors with categories, labels and suggestions.    | [`Error`], [`ErrorCategory`]                      |
//!
//! ## Optional features
//! - `logging` (default): exports [`LogWriter`], which renders events through `tracing`.
//!
//! ## Example
//! ```rust,no_run
//! use std::sync::Arc;
//! use ipcvisor::{
//!     Bus, IpcConfiguration, IpcOperation, OperationType, ServiceLifecycle, Subscribe,
//!     SubscriberSet, UnixConnector, WorkerService,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = IpcConfiguration::from_toml_str(
//!         r#"
//!         service_name = "backup-worker"
//!         security_level = "maximum"
//!         max_retry_attempts = 2
//!         "#,
//!     )?;
//!
//!     let bus = Bus::default();
//!     #[cfg(feature = "logging")]
//!     let subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(ipcvisor::LogWriter::new())];
//!     #[cfg(not(feature = "logging"))]
//!     let subs: Vec<Arc<dyn Subscribe>> = Vec::new();
//!     let token = CancellationToken::new();
//!     Arc::new(SubscriberSet::new(subs, bus.clone())).listen(token.clone());
//!
//!     let worker = WorkerService::builder(config, UnixConnector::new("/var/run/backup-worker.sock"))
//!         .with_bus(bus)
//!         .with_token(token)
//!         .build()?;
//!
//!     worker.initialize().await?;
//!     worker.start().await?;
//!
//!     let op = IpcOperation::builder(OperationType::Command)
//!         .args(["snapshot", "--volume", "data"])
//!         .build();
//!     let res = worker.execute(op).await?;
//!     println!("worker answered {} bytes", res.payload().len());
//!
//!     worker.stop().await?;
//!     Ok(())
//! }
//! ```

mod error;
mod events;
mod executor;
mod ipc;
mod lifecycle;
mod policies;
mod recovery;
mod service;
mod subscribers;

// ---- Public re-exports ----

pub use error::{
    ConfigError, DependencyError, Error, ErrorCategory, IpcError, IpcErrorCode, LifecycleError,
    OperationError, RecoveryError, ResourceError, Result, StateError,
};
pub use events::{Bus, DEFAULT_BUS_CAPACITY, Event, EventKind};
pub use executor::{Executor, ExecutorConfig, with_retry, with_retry_if, with_timeout};
pub use ipc::codec;
pub use ipc::{
    AdmissionPolicy, AuditSession, Channel, ConnectionMode, ConnectionSupervisor, Connector,
    IpcConfiguration, IpcOperation, IpcResult, OperationBuilder, OperationId, OperationType,
    PeerInfo, ResourceLimits, ResultStatus, SandboxPolicy, SecurityLevel, StreamChannel,
    SupervisorBuilder, handshake,
};
#[cfg(unix)]
pub use ipc::UnixConnector;
pub use lifecycle::{
    DEFAULT_LOCK_TIMEOUT, Lifecycle, ServiceLifecycle, ServiceState, Transition, TransitionGuard,
};
pub use policies::{JitterPolicy, ReconnectBackoff};
pub use recovery::{
    CleanupFn, ErrorContext, ErrorHandlingService, ErrorRecoveryService, Handler, Metadata,
    Priority, RecoveryDefaults, RecoveryOperation, RecoveryOutcome, RecoveryReport,
    RecoveryStrategy, SourceLocation,
};
pub use service::{WorkerService, WorkerServiceBuilder};
pub use subscribers::{Subscribe, SubscriberSet};

// Built-in subscriber that writes events through `tracing`.
// Disable with: `--no-default-features`
#[cfg(feature = "logging")]
pub use subscribers::LogWriter;
