//! # Error handling service.
//!
//! Maps each [`ErrorCategory`] to a handler that picks a [`RecoveryStrategy`],
//! and runs work under that policy.
//!
//! ```text
//! run(op, metadata, work)
//!   └─► work(token) ──Ok──► value
//!           │ Err
//!           ▼
//!     ErrorContext (caller location, metadata)
//!           ▼
//!     handle_error(ctx) ──► handler[ctx.category()] or Terminate
//!           ├─ Retry     ──► with_retry(max_attempts, delay, work)
//!           ├─ Fallback  ──► value (or FallbackTypeMismatch)
//!           ├─ Cleanup   ──► action(), then Err(Unrecovered(ctx))
//!           └─ Terminate ──► Err(Unrecovered(ctx))
//! ```
//!
//! ## Default handlers
//! - `Transient` → retry, bounded by [`RecoveryDefaults`];
//! - `LocalResource` → a missing resource runs the resource cleanup hook (when
//!   configured) and surfaces the error; anything else terminates.

use std::any::type_name;
use std::collections::HashMap;
use std::future::Future;
use std::panic::Location;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use futures::FutureExt;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, ErrorCategory, IpcError, RecoveryError, ResourceError, Result};
use crate::events::{Bus, Event, EventKind};
use crate::executor::with_retry;
use crate::recovery::context::{ErrorContext, Metadata, SourceLocation};
use crate::recovery::strategy::{CleanupFn, RecoveryStrategy};

/// Stored handler.
pub type Handler = Arc<dyn Fn(&ErrorContext) -> RecoveryStrategy + Send + Sync>;

/// Knobs for the built-in handlers.
#[derive(Clone)]
pub struct RecoveryDefaults {
    /// Extra invocations granted to transient failures.
    pub transient_retries: u32,
    /// Base delay between those invocations.
    pub transient_delay: Duration,
    /// Run when a local resource is missing, before the error surfaces.
    pub resource_cleanup: Option<CleanupFn>,
}

impl RecoveryDefaults {
    /// Sets the hook run before a missing-resource failure surfaces.
    pub fn with_resource_cleanup<F, Fut>(mut self, cleanup: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.resource_cleanup = Some(Arc::new(move || cleanup().boxed()));
        self
    }
}

impl Default for RecoveryDefaults {
    fn default() -> Self {
        Self {
            transient_retries: 3,
            transient_delay: Duration::from_secs(1),
            resource_cleanup: None,
        }
    }
}

/// Handler registry plus the `run` driver.
pub struct ErrorHandlingService {
    handlers: RwLock<HashMap<ErrorCategory, Handler>>,
    token: CancellationToken,
    bus: Option<Bus>,
}

impl Default for ErrorHandlingService {
    fn default() -> Self {
        Self::new(RecoveryDefaults::default())
    }
}

impl ErrorHandlingService {
    /// Creates a service with the default `Transient` and `LocalResource` handlers.
    pub fn new(defaults: RecoveryDefaults) -> Self {
        let svc = Self::empty();
        svc.install_defaults(defaults);
        svc
    }

    /// Creates a service with no handlers: every failure terminates.
    pub fn empty() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            token: CancellationToken::new(),
            bus: None,
        }
    }

    pub fn with_bus(mut self, bus: Bus) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Work started by [`run`](Self::run) receives children of `token`.
    pub fn with_token(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    /// Installs `handler` for `category`, replacing any previous one.
    pub fn register_handler<F>(&self, category: ErrorCategory, handler: F)
    where
        F: Fn(&ErrorContext) -> RecoveryStrategy + Send + Sync + 'static,
    {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(category, Arc::new(handler));
    }

    /// Removes the handler for `category`. Returns whether one was installed.
    pub fn remove_handler(&self, category: ErrorCategory) -> bool {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&category)
            .is_some()
    }

    pub fn has_handler(&self, category: ErrorCategory) -> bool {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&category)
    }

    /// Chooses a strategy for `ctx`. Without a handler the failure terminates.
    pub fn handle_error(&self, ctx: &ErrorContext) -> RecoveryStrategy {
        let category = ctx.error().category();
        let handler = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&category)
            .cloned();

        let strategy = match handler {
            Some(handler) => handler(ctx),
            None => {
                tracing::warn!(
                    operation = ctx.operation(),
                    category = category.as_label(),
                    error = %ctx.error(),
                    "no recovery handler registered"
                );
                RecoveryStrategy::Terminate
            }
        };

        self.publish(
            Event::new(EventKind::StrategySelected)
                .with_operation(ctx.operation())
                .with_category(category)
                .with_strategy(strategy.label())
                .with_reason(ctx.error().to_string()),
        );
        strategy
    }

    /// Runs `work`, applying the registered strategy if it fails.
    ///
    /// Exactly one outcome is produced:
    /// - the work's value (first call, a retry, or a fallback);
    /// - [`RecoveryError::FallbackTypeMismatch`] if a fallback does not hold a `T`;
    /// - [`Error::Unrecovered`] wrapping the failure and its context otherwise.
    #[track_caller]
    pub fn run<'a, T, F, Fut>(
        &'a self,
        operation: &'a str,
        metadata: Metadata,
        mut work: F,
    ) -> impl Future<Output = Result<T>> + 'a
    where
        T: Clone + Send + Sync + 'static,
        F: FnMut(CancellationToken) -> Fut + 'a,
        Fut: Future<Output = Result<T>> + 'a,
    {
        let location = SourceLocation::from(Location::caller());

        async move {
            let err = match work(self.token.child_token()).await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            let ctx = ErrorContext::new(err, operation, location, metadata);

            match self.handle_error(&ctx) {
                RecoveryStrategy::Retry {
                    max_attempts,
                    delay,
                } => {
                    if max_attempts == 0 {
                        return Err(Error::Unrecovered(Box::new(ctx)));
                    }
                    with_retry(max_attempts, delay, operation, &self.token, &mut work)
                        .await
                        .map_err(|last| {
                            let metadata = ctx.metadata().clone();
                            let retried = ErrorContext::new(last, operation, location, metadata);
                            Error::Unrecovered(Box::new(retried))
                        })
                }
                RecoveryStrategy::Fallback(value) => match value.downcast_ref::<T>() {
                    Some(value) => {
                        let ev = Event::new(EventKind::FallbackApplied).with_operation(operation);
                        self.publish(ev);
                        Ok(value.clone())
                    }
                    None => Err(RecoveryError::FallbackTypeMismatch {
                        operation: operation.to_string(),
                        expected: type_name::<T>(),
                    }
                    .into()),
                },
                RecoveryStrategy::Cleanup(action) => {
                    if let Err(cleanup_err) = action().await {
                        tracing::warn!(operation, error = %cleanup_err, "cleanup failed");
                        self.publish(
                            Event::new(EventKind::CleanupFailed)
                                .with_operation(operation)
                                .with_reason(cleanup_err.to_string()),
                        );
                    }
                    Err(Error::Unrecovered(Box::new(ctx)))
                }
                RecoveryStrategy::Terminate => Err(Error::Unrecovered(Box::new(ctx))),
            }
        }
    }

    fn install_defaults(&self, defaults: RecoveryDefaults) {
        let RecoveryDefaults {
            transient_retries,
            transient_delay,
            resource_cleanup,
        } = defaults;

        self.register_handler(ErrorCategory::Transient, move |_| {
            RecoveryStrategy::retry(transient_retries, transient_delay)
        });

        self.register_handler(ErrorCategory::LocalResource, move |ctx| {
            let missing = matches!(
                ctx.error().root(),
                Error::Resource(ResourceError::NotFound { .. })
                    | Error::Ipc(IpcError::ResourceNotFound(_))
            );
            match (&resource_cleanup, missing) {
                (Some(cleanup), true) => RecoveryStrategy::Cleanup(cleanup.clone()),
                _ => RecoveryStrategy::Terminate,
            }
        });
    }

    fn publish(&self, ev: Event) {
        if let Some(bus) = &self.bus {
            bus.publish(ev);
        }
    }
}
