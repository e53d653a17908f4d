//! # Error recovery service.
//!
//! Holds [`RecoveryOperation`]s sorted by descending priority (registration
//! order within a priority) and runs them in batches.
//!
//! ## Rules
//! - `run_recovery(min)` runs every operation with `priority >= min`.
//! - A failing non-critical operation is recorded; the batch continues.
//! - A failing `Critical` operation stops the batch and its own error is returned.
//! - The registry lock is released before any operation runs.

use std::sync::{PoisonError, RwLock};
use std::time::{Duration, Instant};

use crate::error::{Error, RecoveryError, Result};
use crate::events::{Bus, Event, EventKind};
use crate::recovery::operation::{Priority, RecoveryOperation};

/// Outcome of one recovery operation.
#[derive(Debug, Clone, PartialEq)]
pub struct RecoveryOutcome {
    pub id: String,
    pub priority: Priority,
    pub succeeded: bool,
    pub duration: Duration,
    pub error: Option<Error>,
}

/// Result of one `run_recovery` batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecoveryReport {
    pub min_priority: Priority,
    pub outcomes: Vec<RecoveryOutcome>,
    /// Set when a critical operation failed and the batch stopped.
    pub aborted: bool,
}

impl RecoveryReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.succeeded).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }
}

/// Priority-ordered registry of recovery operations.
#[derive(Default)]
pub struct ErrorRecoveryService {
    operations: RwLock<Vec<RecoveryOperation>>,
    last_report: RwLock<Option<RecoveryReport>>,
    bus: Option<Bus>,
}

impl ErrorRecoveryService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bus(mut self, bus: Bus) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Adds `op`; ids must be unique.
    pub fn register_operation(&self, op: RecoveryOperation) -> Result<(), RecoveryError> {
        let mut ops = self.operations.write().unwrap_or_else(PoisonError::into_inner);
        if ops.iter().any(|o| o.id() == op.id()) {
            return Err(RecoveryError::DuplicateOperation {
                id: op.id().to_string(),
            });
        }
        let at = ops.partition_point(|o| o.priority() >= op.priority());
        ops.insert(at, op);
        Ok(())
    }

    /// Removes the operation with `id`. Returns whether it existed.
    pub fn remove_operation(&self, id: &str) -> bool {
        let mut ops = self.operations.write().unwrap_or_else(PoisonError::into_inner);
        let before = ops.len();
        ops.retain(|o| o.id() != id);
        ops.len() != before
    }

    pub fn clear_operations(&self) {
        self.operations
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Registered ids in execution order.
    pub fn operation_ids(&self) -> Vec<String> {
        self.operations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|o| o.id().to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.operations.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Report of the most recent batch, including aborted ones.
    pub fn last_report(&self) -> Option<RecoveryReport> {
        self.last_report
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Runs every operation with `priority >= min_priority`, highest first.
    pub async fn run_recovery(&self, min_priority: Priority) -> Result<RecoveryReport> {
        let batch: Vec<RecoveryOperation> = self
            .operations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|o| o.priority() >= min_priority)
            .cloned()
            .collect();

        self.publish(Event::new(EventKind::RecoveryStarted).with_priority(min_priority));
        let mut report = RecoveryReport {
            min_priority,
            outcomes: Vec::with_capacity(batch.len()),
            aborted: false,
        };

        for op in batch {
            let started = Instant::now();
            let res = op.recover().await;
            let duration = started.elapsed();

            match res {
                Ok(()) => {
                    self.publish(
                        Event::new(EventKind::RecoveryOperationSucceeded)
                            .with_operation(op.id())
                            .with_priority(op.priority())
                            .with_delay(duration),
                    );
                    report.outcomes.push(RecoveryOutcome {
                        id: op.id().to_string(),
                        priority: op.priority(),
                        succeeded: true,
                        duration,
                        error: None,
                    });
                }
                Err(err) => {
                    let critical = op.priority() == Priority::Critical;
                    let kind = if critical {
                        EventKind::RecoveryAborted
                    } else {
                        EventKind::RecoveryOperationFailed
                    };
                    self.publish(
                        Event::new(kind)
                            .with_operation(op.id())
                            .with_priority(op.priority())
                            .with_reason(err.to_string()),
                    );
                    report.outcomes.push(RecoveryOutcome {
                        id: op.id().to_string(),
                        priority: op.priority(),
                        succeeded: false,
                        duration,
                        error: Some(err.clone()),
                    });

                    if critical {
                        report.aborted = true;
                        self.store(report);
                        return Err(err);
                    }
                }
            }
        }

        self.publish(
            Event::new(EventKind::RecoveryFinished)
                .with_attempt(u32::try_from(report.outcomes.len()).unwrap_or(u32::MAX)),
        );
        self.store(report.clone());
        Ok(report)
    }

    fn store(&self, report: RecoveryReport) {
        *self.last_report.write().unwrap_or_else(PoisonError::into_inner) = Some(report);
    }

    fn publish(&self, ev: Event) {
        if let Some(bus) = &self.bus {
            bus.publish(ev);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{DependencyError, IpcError};
    use std::sync::{Arc, Mutex};

    fn recording(
        log: &Arc<Mutex<Vec<&'static str>>>,
        id: &'static str,
        priority: Priority,
        fail: bool,
    ) -> RecoveryOperation {
        let log = log.clone();
        RecoveryOperation::new(id, format!("recover {id}"), priority, move || {
            let log = log.clone();
            async move {
                log.lock().unwrap().push(id);
                if fail {
                    Err(IpcError::InternalError(format!("{id} failed")).into())
                } else {
                    Ok::<(), Error>(())
                }
            }
        })
    }

    #[tokio::test]
    async fn runs_in_descending_priority_and_keeps_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let svc = ErrorRecoveryService::new();
        svc.register_operation(recording(&log, "prune-cache", Priority::Low, false)).unwrap();
        svc.register_operation(recording(&log, "reopen-repo", Priority::High, false)).unwrap();
        svc.register_operation(recording(&log, "flush-journal", Priority::Normal, false)).unwrap();
        svc.register_operation(recording(&log, "unlock-repo", Priority::High, false)).unwrap();

        let report = svc.run_recovery(Priority::Normal).await.unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["reopen-repo", "unlock-repo", "flush-journal"]);
        assert_eq!(report.succeeded(), 3);
        assert!(!report.aborted);
    }

    #[tokio::test]
    async fn critical_failure_aborts_the_batch() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let svc = ErrorRecoveryService::new();
        svc.register_operation(recording(&log, "restart-worker", Priority::Critical, true))
            .unwrap();
        svc.register_operation(recording(&log, "clear-temp", Priority::Low, false)).unwrap();

        let err = svc.run_recovery(Priority::Low).await.unwrap_err();

        assert_eq!(err, Error::Ipc(IpcError::InternalError("restart-worker failed".into())));
        assert_eq!(*log.lock().unwrap(), vec!["restart-worker"]);
        let report = svc.last_report().unwrap();
        assert!(report.aborted);
        assert_eq!(report.outcomes.len(), 1);
    }

    #[tokio::test]
    async fn non_critical_failures_are_recorded_and_skipped() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let svc = ErrorRecoveryService::new();
        svc.register_operation(recording(&log, "reindex", Priority::High, true)).unwrap();
        svc.register_operation(recording(&log, "clear-temp", Priority::Normal, false)).unwrap();

        let report = svc.run_recovery(Priority::Low).await.unwrap();

        assert_eq!(report.failed(), 1);
        assert_eq!(report.succeeded(), 1);
        assert!(report.outcomes[0].error.is_some());
        assert_eq!(*log.lock().unwrap(), vec!["reindex", "clear-temp"]);
    }

    #[tokio::test]
    async fn registry_management() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let svc = ErrorRecoveryService::new();
        svc.register_operation(recording(&log, "reindex", Priority::High, false)).unwrap();

        let dup = svc.register_operation(recording(&log, "reindex", Priority::Low, false));
        assert_eq!(dup, Err(RecoveryError::DuplicateOperation { id: "reindex".into() }));

        assert!(svc.remove_operation("reindex"));
        assert!(!svc.remove_operation("reindex"));
        assert!(svc.is_empty());

        svc.register_operation(recording(&log, "a", Priority::Low, false)).unwrap();
        svc.register_operation(recording(&log, "b", Priority::Low, false)).unwrap();
        svc.clear_operations();
        assert!(svc.run_recovery(Priority::Low).await.unwrap().outcomes.is_empty());
    }

    #[tokio::test]
    async fn batch_events_are_published() {
        let bus = Bus::new(16);
        let mut rx = bus.subscribe();
        let svc = ErrorRecoveryService::new().with_bus(bus);
        let ping = RecoveryOperation::new("ping", "ping worker", Priority::Critical, || async {
            Err::<(), Error>(DependencyError::Unavailable { name: "worker".into() }.into())
        });
        svc.register_operation(ping).unwrap();

        let _ = svc.run_recovery(Priority::Low).await;

        assert_eq!(rx.recv().await.unwrap().kind, EventKind::RecoveryStarted);
        let aborted = rx.recv().await.unwrap();
        assert_eq!(aborted.kind, EventKind::RecoveryAborted);
        assert_eq!(aborted.priority, Some(Priority::Critical));
    }
}
