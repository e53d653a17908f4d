//! # LogWriter: renders runtime events through `tracing`.
//!
//! Enabled via the `logging` feature (on by default). Install any `tracing`
//! subscriber in the host application to see the output.
//!
//! ## Output (fields abbreviated)
//! ```text
//! INFO  state changed service=backup-worker from=starting to=running
//! WARN  dispatch attempt failed service=backup-worker operation=7f0c… attempt=1 reason="connection failed: broken pipe"
//! WARN  recovery strategy selected operation=snapshot category=transient strategy=retry
//! ERROR recovery aborted operation=rebuild-index priority=critical reason="..."
//! ```

use async_trait::async_trait;

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Subscriber that writes every event as a structured `tracing` record.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let service = e.service.as_deref().unwrap_or("-");
        let operation = e.operation.as_deref().unwrap_or("-");
        let reason = e.reason.as_deref().unwrap_or("");

        match e.kind {
            EventKind::StateChanged => {
                tracing::info!(service, from = ?e.from, to = ?e.to, reason, "state changed");
            }
            EventKind::TransitionRejected => {
                tracing::warn!(
                    service,
                    transition = operation,
                    state = ?e.from,
                    "transition rejected"
                );
            }
            EventKind::StrategySelected => {
                tracing::warn!(
                    operation,
                    category = e.category.map(|c| c.as_label()),
                    strategy = e.strategy,
                    reason,
                    "recovery strategy selected"
                );
            }
            EventKind::FallbackApplied => {
                tracing::info!(operation, "fallback value applied");
            }
            EventKind::CleanupFailed => {
                tracing::warn!(operation, reason, "cleanup action failed");
            }
            EventKind::RecoveryStarted => {
                tracing::info!(min_priority = ?e.priority, "recovery started");
            }
            EventKind::RecoveryOperationSucceeded => {
                tracing::info!(
                    operation,
                    priority = ?e.priority,
                    duration_ms = e.delay_ms,
                    "recovery operation succeeded"
                );
            }
            EventKind::RecoveryOperationFailed => {
                tracing::warn!(
                    operation,
                    priority = ?e.priority,
                    reason,
                    "recovery operation failed"
                );
            }
            EventKind::RecoveryAborted => {
                tracing::error!(operation, priority = ?e.priority, reason, "recovery aborted");
            }
            EventKind::RecoveryFinished => {
                tracing::info!(operations = e.attempt, "recovery finished");
            }
            EventKind::Connected => {
                tracing::info!(service, "connected to worker");
            }
            EventKind::ConnectionDropped => {
                tracing::warn!(service, reason, "connection dropped");
            }
            EventKind::ReconnectScheduled => {
                tracing::info!(
                    service,
                    failures = e.attempt,
                    delay_ms = e.delay_ms,
                    "reconnect scheduled"
                );
            }
            EventKind::AccessDenied => {
                tracing::error!(service, reason, "peer verification failed");
            }
            EventKind::DispatchRejected => {
                tracing::warn!(service, operation, reason, "dispatch rejected");
            }
            EventKind::DispatchCompleted => {
                tracing::debug!(service, operation, attempts = e.attempt, "dispatch completed");
            }
            EventKind::DispatchFailed => {
                tracing::warn!(
                    service,
                    operation,
                    attempt = e.attempt,
                    timeout_ms = e.timeout_ms,
                    reason,
                    "dispatch attempt failed"
                );
            }
            EventKind::SubscriberOverflow => {
                tracing::warn!(subscriber = service, reason, "subscriber dropped event");
            }
            EventKind::SubscriberPanicked => {
                tracing::error!(subscriber = service, reason, "subscriber panicked");
            }
        }
    }

    fn name(&self) -> &'static str {
        "log-writer"
    }
}
