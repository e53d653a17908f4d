//! # Runtime events emitted by lifecycles, recovery and the connection supervisor.
//!
//! [`EventKind`] classifies events in four groups:
//! - **Lifecycle**: state changes and rejected transitions
//! - **Recovery**: strategy decisions and recovery-operation batches
//! - **Connection**: connects, drops, reconnect scheduling, peer verification
//! - **Dispatch**: admission rejections and per-operation outcomes
//!
//! The [`Event`] struct carries optional metadata set depending on the kind.
//!
//! ## Ordering guarantees
//! Each event has a globally unique, monotonically increasing sequence number
//! (`seq`) that restores order when events are delivered out of order.
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use ipcvisor::{Event, EventKind};
//!
//! let ev = Event::new(EventKind::DispatchFailed)
//!     .with_service("backup-worker")
//!     .with_operation("7f0c…")
//!     .with_reason("connection failed: broken pipe")
//!     .with_attempt(2)
//!     .with_timeout(Duration::from_secs(30));
//!
//! assert_eq!(ev.kind, EventKind::DispatchFailed);
//! assert_eq!(ev.service.as_deref(), Some("backup-worker"));
//! assert_eq!(ev.timeout_ms, Some(30_000));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime};

use crate::error::ErrorCategory;
use crate::lifecycle::ServiceState;
use crate::recovery::Priority;

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Subscriber events ===
    /// Subscriber panicked during event processing.
    ///
    /// Sets: `service` (subscriber name), `reason` (panic message).
    SubscriberPanicked,

    /// Subscriber dropped an event (queue full or worker closed).
    ///
    /// Sets: `service` (subscriber name), `reason` ("full" / "closed").
    SubscriberOverflow,

    // === Lifecycle events ===
    /// A service moved between states.
    ///
    /// Sets: `service`, `from`, `to`, `reason` (only when entering `error`).
    StateChanged,

    /// A transition was attempted from a state that does not permit it.
    ///
    /// Sets: `service`, `operation` (transition name), `from` (current state).
    TransitionRejected,

    // === Recovery events ===
    /// A recovery strategy was chosen for a failure.
    ///
    /// Sets: `operation`, `category`, `strategy`, `reason` (the failure).
    StrategySelected,

    /// A fallback value replaced a failed result.
    ///
    /// Sets: `operation`.
    FallbackApplied,

    /// A cleanup action failed; the original error is still surfaced.
    ///
    /// Sets: `operation`, `reason` (cleanup error).
    CleanupFailed,

    /// A recovery batch started.
    ///
    /// Sets: `priority` (minimum priority of the batch).
    RecoveryStarted,

    /// A recovery operation completed.
    ///
    /// Sets: `operation` (recovery id), `priority`, `delay_ms` (duration).
    RecoveryOperationSucceeded,

    /// A non-critical recovery operation failed; the batch continues.
    ///
    /// Sets: `operation`, `priority`, `reason`.
    RecoveryOperationFailed,

    /// A critical recovery operation failed; the batch stops.
    ///
    /// Sets: `operation`, `priority`, `reason`.
    RecoveryAborted,

    /// A recovery batch finished without a critical failure.
    ///
    /// Sets: `attempt` (number of operations run).
    RecoveryFinished,

    // === Connection events ===
    /// A connection to the worker was established and verified.
    ///
    /// Sets: `service`.
    Connected,

    /// A connection was discarded after a failure.
    ///
    /// Sets: `service`, `reason`.
    ConnectionDropped,

    /// A reconnect attempt is delayed by the reconnect backoff.
    ///
    /// Sets: `service`, `attempt` (consecutive failures), `delay_ms`.
    ReconnectScheduled,

    /// Peer verification failed; the connection is not reused.
    ///
    /// Sets: `service`, `reason`.
    AccessDenied,

    // === Dispatch events ===
    /// An operation was refused before reaching the worker.
    ///
    /// Sets: `service`, `operation` (identifier), `reason`.
    DispatchRejected,

    /// An operation produced a result envelope.
    ///
    /// Sets: `service`, `operation`, `attempt` (attempts used).
    DispatchCompleted,

    /// An attempt of an operation failed.
    ///
    /// Sets: `service`, `operation`, `attempt`, `reason`, `timeout_ms` on timeouts.
    DispatchFailed,
}

/// Runtime event with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp (for logs)
/// - other optional fields are set depending on the [`EventKind`]
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,

    /// Service (or subscriber) the event belongs to.
    pub service: Option<Arc<str>>,
    /// Operation name, operation identifier or recovery id.
    pub operation: Option<Arc<str>>,
    /// Human-readable reason (errors, overflow details, etc.).
    pub reason: Option<Arc<str>>,
    /// Attempt count (starting from 1).
    pub attempt: Option<u32>,
    /// Delay or duration in milliseconds (compact).
    pub delay_ms: Option<u32>,
    /// Timeout in milliseconds (compact).
    pub timeout_ms: Option<u32>,
    /// Previous lifecycle state.
    pub from: Option<ServiceState>,
    /// New lifecycle state.
    pub to: Option<ServiceState>,
    /// Recovery priority.
    pub priority: Option<Priority>,
    /// Error category that drove a recovery decision.
    pub category: Option<ErrorCategory>,
    /// Recovery strategy label.
    pub strategy: Option<&'static str>,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            service: None,
            operation: None,
            reason: None,
            attempt: None,
            delay_ms: None,
            timeout_ms: None,
            from: None,
            to: None,
            priority: None,
            category: None,
            strategy: None,
        }
    }

    #[inline]
    pub fn with_service(mut self, service: impl Into<Arc<str>>) -> Self {
        self.service = Some(service.into());
        self
    }

    #[inline]
    pub fn with_operation(mut self, operation: impl Into<Arc<str>>) -> Self {
        self.operation = Some(operation.into());
        self
    }

    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    #[inline]
    pub fn with_attempt(mut self, n: u32) -> Self {
        self.attempt = Some(n);
        self
    }

    /// Attaches a delay or duration (stored as milliseconds).
    #[inline]
    pub fn with_delay(mut self, d: Duration) -> Self {
        self.delay_ms = Some(compact_ms(d));
        self
    }

    /// Attaches a timeout (stored as milliseconds).
    #[inline]
    pub fn with_timeout(mut self, d: Duration) -> Self {
        self.timeout_ms = Some(compact_ms(d));
        self
    }

    #[inline]
    pub fn with_from(mut self, state: ServiceState) -> Self {
        self.from = Some(state);
        self
    }

    #[inline]
    pub fn with_to(mut self, state: ServiceState) -> Self {
        self.to = Some(state);
        self
    }

    #[inline]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    #[inline]
    pub fn with_category(mut self, category: ErrorCategory) -> Self {
        self.category = Some(category);
        self
    }

    #[inline]
    pub fn with_strategy(mut self, strategy: &'static str) -> Self {
        self.strategy = Some(strategy);
        self
    }

    /// Creates a subscriber overflow event.
    #[inline]
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        Event::new(EventKind::SubscriberOverflow)
            .with_service(subscriber)
            .with_reason(reason)
    }

    /// Creates a subscriber panic event.
    #[inline]
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        Event::new(EventKind::SubscriberPanicked)
            .with_service(subscriber)
            .with_reason(info)
    }
}

fn compact_ms(d: Duration) -> u32 {
    d.as_millis().min(u128::from(u32::MAX)) as u32
}
