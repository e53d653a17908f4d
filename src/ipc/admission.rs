//! # Admission policy for dispatch.
//!
//! At most `max_concurrent_operations` operations are in flight per supervisor.
//! When that bound is reached, the policy decides what happens to a new request.
//!
//! ## Invariants
//! - Waiting requests are admitted in arrival order.
//! - A rejected request never reaches the worker.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, IpcError, OperationError};

/// What to do with a request when every slot is taken.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionPolicy {
    /// Wait for a slot (FIFO).
    ///
    /// Use when every submission must run, e.g. scheduled backups.
    #[default]
    Queue,

    /// Reject immediately with [`IpcError::ResourceUnavailable`].
    ///
    /// Use when the caller has its own retry or would rather skip, e.g. status checks.
    FailFast,
}

/// Slot counter enforcing an [`AdmissionPolicy`].
#[derive(Debug, Clone)]
pub(crate) struct Admission {
    policy: AdmissionPolicy,
    limit: usize,
    slots: Arc<Semaphore>,
}

impl Admission {
    pub(crate) fn new(policy: AdmissionPolicy, limit: usize) -> Self {
        Self {
            policy,
            limit,
            slots: Arc::new(Semaphore::new(limit)),
        }
    }

    pub(crate) fn policy(&self) -> AdmissionPolicy {
        self.policy
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.limit - self.slots.available_permits()
    }

    /// Takes a slot; the returned permit frees it when dropped.
    pub(crate) async fn admit(
        &self,
        operation: &str,
        token: &CancellationToken,
    ) -> Result<OwnedSemaphorePermit, Error> {
        let closed = || IpcError::ServiceUnavailable("supervisor is closed".into());
        match self.policy {
            AdmissionPolicy::FailFast => match self.slots.clone().try_acquire_owned() {
                Ok(permit) => Ok(permit),
                Err(TryAcquireError::NoPermits) => Err(IpcError::ResourceUnavailable(format!(
                    "{} operations already in flight",
                    self.limit
                ))
                .into()),
                Err(TryAcquireError::Closed) => Err(closed().into()),
            },
            AdmissionPolicy::Queue => tokio::select! {
                permit = self.slots.clone().acquire_owned() => {
                    permit.map_err(|_| Error::from(closed()))
                }
                _ = token.cancelled() => Err(OperationError::Cancelled {
                    operation: operation.to_string(),
                }
                .into()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fail_fast_rejects_when_full() {
        let admission = Admission::new(AdmissionPolicy::FailFast, 1);
        let token = CancellationToken::new();

        let held = admission.admit("a", &token).await.unwrap();
        assert_eq!(admission.in_flight(), 1);
        assert!(matches!(
            admission.admit("b", &token).await,
            Err(Error::Ipc(IpcError::ResourceUnavailable(_)))
        ));

        drop(held);
        assert!(admission.admit("c", &token).await.is_ok());
    }

    #[tokio::test]
    async fn queue_waits_and_honors_cancellation() {
        let admission = Admission::new(AdmissionPolicy::Queue, 1);
        let token = CancellationToken::new();
        let _held = admission.admit("a", &token).await.unwrap();

        let waiter = {
            let admission = admission.clone();
            let token = token.clone();
            tokio::spawn(async move { admission.admit("b", &token).await.map(drop) })
        };
        tokio::task::yield_now().await;
        token.cancel();

        assert!(matches!(
            waiter.await.unwrap(),
            Err(Error::Operation(OperationError::Cancelled { .. }))
        ));
    }
}
