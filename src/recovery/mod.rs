//! # Error handling and recovery.
//!
//! - [`ErrorHandlingService`] maps error categories to [`RecoveryStrategy`]s and
//!   runs work under them;
//! - [`ErrorRecoveryService`] runs registered [`RecoveryOperation`]s in priority
//!   order;
//! - [`ErrorContext`] records where and while doing what a failure happened.

mod context;
mod handler;
mod operation;
mod service;
mod strategy;

pub use context::{ErrorContext, Metadata, SourceLocation};
pub use handler::{ErrorHandlingService, Handler, RecoveryDefaults};
pub use operation::{Priority, RecoveryOperation};
pub use service::{ErrorRecoveryService, RecoveryOutcome, RecoveryReport};
pub use strategy::{CleanupFn, RecoveryStrategy};
