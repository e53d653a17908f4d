//! # Lifecycle capability and the service trait built on it.
//!
//! A concrete service does not inherit lifecycle behavior; it **holds** a
//! [`Lifecycle`] and implements [`ServiceLifecycle`], which provides
//! `initialize`/`start`/`stop`/`reset` on top of the service's own hooks.
//!
//! ## Transition flow
//! ```text
//! start()
//!   ├─► Lifecycle::begin(Start)        (transition lock, bounded by lock_timeout)
//!   │     ├─ precondition fails ──► TransitionRejected, InvalidState error, state unchanged
//!   │     └─ ok ──► Initialized/Stopped → Starting
//!   ├─► on_start().await               (lock held, state lock released)
//!   └─► TransitionGuard::finish(res)
//!         ├─ Ok  ──► Starting → Running
//!         └─ Err ──► Starting → Error, StartFailed error
//! ```
//!
//! ## Rules
//! - Transitions are serialized per lifecycle; reads of the state never wait on hooks.
//! - Every state change is logged and published as [`EventKind::StateChanged`].
//! - `Error` is only left through an explicit `reset()`.
//! - A `start`/`stop` cancelled while its hook runs lands in `Error`.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, MutexGuard};
use tokio::time;

use crate::error::{Error, LifecycleError, StateError};
use crate::events::{Bus, Event, EventKind};
use crate::lifecycle::ServiceState;

/// Default bound on waiting for a concurrent transition to finish.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(30);

/// Lifecycle operations a service exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Initialize,
    Start,
    Stop,
    Reset,
}

impl Transition {
    pub fn as_str(self) -> &'static str {
        match self {
            Transition::Initialize => "initialize",
            Transition::Start => "start",
            Transition::Stop => "stop",
            Transition::Reset => "reset",
        }
    }

    /// Whether the transition may begin from `state`.
    pub fn permits(self, state: ServiceState) -> bool {
        match self {
            Transition::Initialize => state == ServiceState::Uninitialized,
            Transition::Start => state.can_start(),
            Transition::Stop => state.can_stop(),
            Transition::Reset => matches!(
                state,
                ServiceState::Initialized | ServiceState::Stopped | ServiceState::Error
            ),
        }
    }

    /// State held while the hook runs, if any.
    fn interim(self) -> Option<ServiceState> {
        match self {
            Transition::Start => Some(ServiceState::Starting),
            Transition::Stop => Some(ServiceState::Stopping),
            Transition::Initialize | Transition::Reset => None,
        }
    }

    fn target(self) -> ServiceState {
        match self {
            Transition::Initialize => ServiceState::Initialized,
            Transition::Start => ServiceState::Running,
            Transition::Stop => ServiceState::Stopped,
            Transition::Reset => ServiceState::Uninitialized,
        }
    }

    fn failure(self, service: &str, reason: String) -> LifecycleError {
        let service = service.to_string();
        match self {
            Transition::Initialize => LifecycleError::InitializationFailed { service, reason },
            Transition::Start => LifecycleError::StartFailed { service, reason },
            Transition::Stop => LifecycleError::StopFailed { service, reason },
            Transition::Reset => LifecycleError::ResetFailed { service, reason },
        }
    }
}

/// Lifecycle capability owned by a service.
///
/// Holds the current [`ServiceState`] and serializes transitions. Cheap reads
/// go through a short-lived `RwLock`; the transition lock is async because it
/// is held across the service's hooks.
#[derive(Debug)]
pub struct Lifecycle {
    service: Arc<str>,
    state: RwLock<ServiceState>,
    transition: Mutex<()>,
    lock_timeout: Duration,
    bus: Option<Bus>,
}

impl Lifecycle {
    /// Creates a lifecycle in [`ServiceState::Uninitialized`].
    pub fn new(service: impl Into<Arc<str>>) -> Self {
        Self {
            service: service.into(),
            state: RwLock::new(ServiceState::Uninitialized),
            transition: Mutex::new(()),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            bus: None,
        }
    }

    /// Publishes state changes on `bus`.
    pub fn with_bus(mut self, bus: Bus) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Bounds how long a transition waits for a concurrent one.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Name of the owning service.
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Current state snapshot.
    pub fn state(&self) -> ServiceState {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fails fast unless the service is running.
    pub fn validate_usable(&self, operation: &str) -> Result<(), LifecycleError> {
        let state = self.state();
        if state.is_usable() {
            return Ok(());
        }
        Err(LifecycleError::InvalidState {
            service: self.service.to_string(),
            operation: operation.to_string(),
            state,
        })
    }

    /// Moves a running service to [`ServiceState::Error`] after a fatal failure.
    ///
    /// Returns `false` if the service was not running.
    pub fn mark_error(&self, reason: &str) -> bool {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if *state != ServiceState::Running {
            return false;
        }
        let from = *state;
        *state = ServiceState::Error;
        drop(state);
        self.report(from, ServiceState::Error, Some(reason));
        true
    }

    /// Starts a transition: takes the transition lock and checks the precondition.
    ///
    /// On success the state already holds the interim value (`starting`/`stopping`)
    /// and the returned guard must be finished with the hook's result.
    pub async fn begin(&self, transition: Transition) -> Result<TransitionGuard<'_>, Error> {
        let lock = time::timeout(self.lock_timeout, self.transition.lock())
            .await
            .map_err(|_| StateError::LockTimeout {
                resource: format!("lifecycle of '{}'", self.service),
                timeout: self.lock_timeout,
            })?;

        let from = self.state();
        if !transition.permits(from) {
            tracing::warn!(
                service = %self.service,
                transition = transition.as_str(),
                state = %from,
                "illegal lifecycle transition rejected"
            );
            self.publish(
                Event::new(EventKind::TransitionRejected)
                    .with_service(&*self.service)
                    .with_operation(transition.as_str())
                    .with_from(from),
            );
            return Err(LifecycleError::InvalidState {
                service: self.service.to_string(),
                operation: transition.as_str().to_string(),
                state: from,
            }
            .into());
        }

        if let Some(interim) = transition.interim() {
            self.set(from, interim, None);
        }
        Ok(TransitionGuard {
            lifecycle: self,
            transition,
            from,
            finished: false,
            _lock: lock,
        })
    }

    fn set(&self, from: ServiceState, to: ServiceState, reason: Option<&str>) {
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = to;
        self.report(from, to, reason);
    }

    fn report(&self, from: ServiceState, to: ServiceState, reason: Option<&str>) {
        tracing::info!(service = %self.service, from = %from, to = %to, "service state changed");
        let mut ev = Event::new(EventKind::StateChanged)
            .with_service(&*self.service)
            .with_from(from)
            .with_to(to);
        if let Some(reason) = reason {
            ev = ev.with_reason(reason);
        }
        self.publish(ev);
    }

    fn publish(&self, ev: Event) {
        if let Some(bus) = &self.bus {
            bus.publish(ev);
        }
    }
}

/// In-flight transition; holds the transition lock until finished.
///
/// Dropping an unfinished `start`/`stop` (its future was cancelled mid-hook)
/// moves the service from the interim state to [`ServiceState::Error`].
#[must_use = "a transition must be finished with the hook result"]
pub struct TransitionGuard<'a> {
    lifecycle: &'a Lifecycle,
    transition: Transition,
    from: ServiceState,
    finished: bool,
    _lock: MutexGuard<'a, ()>,
}

impl TransitionGuard<'_> {
    /// Completes the transition with the hook's outcome.
    ///
    /// - `Ok` moves to the transition's target state;
    /// - `Err` moves to [`ServiceState::Error`] and returns the matching lifecycle failure.
    pub fn finish(mut self, outcome: Result<(), Error>) -> Result<(), Error> {
        self.finished = true;
        let lc = self.lifecycle;
        let expected = self.transition.interim().unwrap_or(self.from);
        let current = lc.state();
        if current != expected {
            return Err(StateError::TransitionFailed {
                from: current,
                to: self.transition.target(),
                reason: format!("state changed to '{current}' during {}", self.transition.as_str()),
            }
            .into());
        }

        match outcome {
            Ok(()) => {
                lc.set(current, self.transition.target(), None);
                Ok(())
            }
            Err(e) => {
                let reason = e.to_string();
                lc.set(current, ServiceState::Error, Some(&reason));
                Err(self.transition.failure(&lc.service, reason).into())
            }
        }
    }
}

impl Drop for TransitionGuard<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let Some(interim) = self.transition.interim() else {
            return;
        };
        let lc = self.lifecycle;
        let mut state = lc.state.write().unwrap_or_else(PoisonError::into_inner);
        if *state != interim {
            return;
        }
        *state = ServiceState::Error;
        drop(state);
        tracing::warn!(
            service = %lc.service,
            transition = self.transition.as_str(),
            "lifecycle transition cancelled before its hook finished"
        );
        lc.report(interim, ServiceState::Error, Some("transition cancelled"));
    }
}

/// # A service with a managed lifecycle.
///
/// Implementors provide [`lifecycle`](ServiceLifecycle::lifecycle) and override the
/// hooks they need; the transition methods are provided.
///
/// # Example
/// ```
/// use async_trait::async_trait;
/// use ipcvisor::{Lifecycle, ServiceLifecycle, ServiceState};
///
/// struct Cache { lifecycle: Lifecycle }
///
/// #[async_trait]
/// impl ServiceLifecycle for Cache {
///     fn lifecycle(&self) -> &Lifecycle { &self.lifecycle }
/// }
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), ipcvisor::Error> {
/// let cache = Cache { lifecycle: Lifecycle::new("cache") };
/// cache.initialize().await?;
/// cache.start().await?;
/// assert_eq!(cache.state(), ServiceState::Running);
/// # Ok(())
/// # }
/// ```
#[async_trait]
pub trait ServiceLifecycle: Send + Sync {
    /// The lifecycle capability held by this service.
    fn lifecycle(&self) -> &Lifecycle;

    async fn on_initialize(&self) -> Result<(), Error> {
        Ok(())
    }

    async fn on_start(&self) -> Result<(), Error> {
        Ok(())
    }

    async fn on_stop(&self) -> Result<(), Error> {
        Ok(())
    }

    async fn on_reset(&self) -> Result<(), Error> {
        Ok(())
    }

    fn state(&self) -> ServiceState {
        self.lifecycle().state()
    }

    async fn initialize(&self) -> Result<(), Error> {
        let guard = self.lifecycle().begin(Transition::Initialize).await?;
        let outcome = self.on_initialize().await;
        guard.finish(outcome)
    }

    async fn start(&self) -> Result<(), Error> {
        let guard = self.lifecycle().begin(Transition::Start).await?;
        let outcome = self.on_start().await;
        guard.finish(outcome)
    }

    async fn stop(&self) -> Result<(), Error> {
        let guard = self.lifecycle().begin(Transition::Stop).await?;
        let outcome = self.on_stop().await;
        guard.finish(outcome)
    }

    async fn reset(&self) -> Result<(), Error> {
        let guard = self.lifecycle().begin(Transition::Reset).await?;
        let outcome = self.on_reset().await;
        guard.finish(outcome)
    }
}
