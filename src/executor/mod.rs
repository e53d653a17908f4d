//! # Resilient operation executor.
//!
//! Two stateless wrappers, composable in either order:
//! - [`with_retry`] / [`with_retry_if`] re-invoke an action with linear backoff;
//! - [`with_timeout`] bounds one invocation and cancels it when the timer wins.
//!
//! [`Executor`] bundles them with a [`Lifecycle`] gate: every call first checks
//! that the owning service is `running`.
//!
//! ```text
//! Executor::run(op, action)
//!   ├─► lifecycle.validate_usable(op) ──✗──► LifecycleError::InvalidState
//!   └─► with_retry(attempts, delay)
//!          └─► with_timeout(timeout)
//!                 └─► action(child_token)
//! ```

mod retry;
mod timeout;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

pub use retry::{with_retry, with_retry_if};
pub use timeout::with_timeout;

use crate::error::{Error, Result};
use crate::lifecycle::Lifecycle;

/// Retry/timeout settings applied by an [`Executor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorConfig {
    /// Total invocations per call (`1` disables retries).
    pub attempts: u32,
    /// Base delay; the sleep after attempt `n` is `delay × n`.
    pub delay: Duration,
    /// Bound on a single attempt; zero disables it.
    pub timeout: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_secs(1),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Lifecycle-gated handle over the retry/timeout wrappers.
#[derive(Clone)]
pub struct Executor {
    lifecycle: Option<Arc<Lifecycle>>,
    config: ExecutorConfig,
    token: CancellationToken,
}

impl Executor {
    /// Creates an ungated executor that runs under `token`.
    pub fn new(config: ExecutorConfig, token: CancellationToken) -> Self {
        Self {
            lifecycle: None,
            config,
            token,
        }
    }

    /// Refuses every call unless `lifecycle` is `running`.
    pub fn gated_by(mut self, lifecycle: Arc<Lifecycle>) -> Self {
        self.lifecycle = Some(lifecycle);
        self
    }

    pub fn config(&self) -> ExecutorConfig {
        self.config
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Runs `action` with the configured retry and per-attempt timeout.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut action: F) -> Result<T>
    where
        F: FnMut(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.gate(operation)?;
        let ExecutorConfig {
            attempts,
            delay,
            timeout,
        } = self.config;

        with_retry(attempts, delay, operation, &self.token, |attempt: CancellationToken| {
            let fut = action(attempt.clone());
            async move {
                let res = with_timeout(timeout, operation, &attempt, move |_| fut).await;
                if res.is_err() {
                    attempt.cancel();
                }
                res
            }
        })
        .await
    }

    /// Runs `action` once under the configured timeout.
    pub async fn run_once<T, F, Fut>(&self, operation: &str, action: F) -> Result<T>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.gate(operation)?;
        with_timeout(self.config.timeout, operation, &self.token, action).await
    }

    fn gate(&self, operation: &str) -> Result<()> {
        match &self.lifecycle {
            Some(lifecycle) => lifecycle.validate_usable(operation).map_err(Error::from),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{LifecycleError, OperationError};
    use crate::lifecycle::{ServiceLifecycle, ServiceState};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Gate(Arc<Lifecycle>);

    #[async_trait]
    impl ServiceLifecycle for Gate {
        fn lifecycle(&self) -> &Lifecycle {
            &self.0
        }
    }

    fn quick() -> ExecutorConfig {
        ExecutorConfig {
            attempts: 2,
            delay: Duration::from_millis(10),
            timeout: Duration::from_secs(1),
        }
    }

    #[tokio::test]
    async fn refuses_to_run_unless_running() {
        let lifecycle = Arc::new(Lifecycle::new("backup-worker"));
        let exec = Executor::new(quick(), CancellationToken::new()).gated_by(lifecycle.clone());
        let calls = AtomicU32::new(0);

        let err = exec
            .run("snapshot", |_| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            Error::Lifecycle(LifecycleError::InvalidState {
                state: ServiceState::Uninitialized,
                ..
            })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let svc = Gate(lifecycle);
        svc.initialize().await.unwrap();
        svc.start().await.unwrap();
        exec.run("snapshot", |_| async { Ok(()) }).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn each_attempt_is_bounded_by_the_timeout() {
        let exec = Executor::new(quick(), CancellationToken::new());
        let calls = AtomicU32::new(0);

        let err = exec
            .run("snapshot", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(())
                }
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(matches!(err, Error::Operation(OperationError::Timeout { .. })));
    }
}
