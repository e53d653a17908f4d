//! # Recovery strategies.
//!
//! A handler inspects an [`ErrorContext`](crate::ErrorContext) and returns one of:
//! - [`RecoveryStrategy::Retry`] re-invoke the work with linear backoff;
//! - [`RecoveryStrategy::Fallback`] replace the failed result with a value;
//! - [`RecoveryStrategy::Cleanup`] run an action, then surface the original error;
//! - [`RecoveryStrategy::Terminate`] surface the original error.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;

use crate::error::Result;

/// Stored cleanup action.
pub type CleanupFn = Arc<dyn Fn() -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// What to do about a failure.
#[derive(Clone)]
pub enum RecoveryStrategy {
    /// Re-invoke the work up to `max_attempts` more times; the sleep after the
    /// `n`-th retry is `delay × n`.
    Retry { max_attempts: u32, delay: Duration },
    /// Value returned instead of the error. Must hold the work's output type.
    Fallback(Arc<dyn Any + Send + Sync>),
    Cleanup(CleanupFn),
    Terminate,
}

impl RecoveryStrategy {
    pub fn retry(max_attempts: u32, delay: Duration) -> Self {
        RecoveryStrategy::Retry {
            max_attempts,
            delay,
        }
    }

    pub fn fallback<T: Any + Send + Sync>(value: T) -> Self {
        RecoveryStrategy::Fallback(Arc::new(value))
    }

    pub fn cleanup<F, Fut>(action: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        RecoveryStrategy::Cleanup(Arc::new(move || action().boxed()))
    }

    /// Short stable label for logs.
    pub fn label(&self) -> &'static str {
        match self {
            RecoveryStrategy::Retry { .. } => "retry",
            RecoveryStrategy::Fallback(_) => "fallback",
            RecoveryStrategy::Cleanup(_) => "cleanup",
            RecoveryStrategy::Terminate => "terminate",
        }
    }
}

impl fmt::Debug for RecoveryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecoveryStrategy::Retry {
                max_attempts,
                delay,
            } => f
                .debug_struct("Retry")
                .field("max_attempts", max_attempts)
                .field("delay", delay)
                .finish(),
            RecoveryStrategy::Fallback(_) => f.write_str("Fallback(..)"),
            RecoveryStrategy::Cleanup(_) => f.write_str("Cleanup(..)"),
            RecoveryStrategy::Terminate => f.write_str("Terminate"),
        }
    }
}
