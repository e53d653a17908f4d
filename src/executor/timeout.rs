//! # Timeout with cancellation of the in-flight action.
//!
//! The action runs on a child token. When the timer wins, the child token is
//! cancelled and the action's future is dropped, so anything it holds (a
//! connection, a permit) is released before the error is returned.

use std::future::Future;
use std::time::Duration;

use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::error::OperationError;

/// Races `action` against `timeout`.
///
/// - Timer wins: [`OperationError::Timeout`] tagged with `operation` and `timeout`.
/// - Caller's token cancelled first: [`OperationError::Cancelled`].
/// - A zero `timeout` disables the timer.
pub async fn with_timeout<T, E, F, Fut>(
    timeout: Duration,
    operation: &str,
    token: &CancellationToken,
    action: F,
) -> Result<T, E>
where
    F: FnOnce(CancellationToken) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: From<OperationError>,
{
    let child = token.child_token();
    let fut = action(child.clone());

    if timeout.is_zero() {
        return tokio::select! {
            res = fut => res,
            _ = token.cancelled() => Err(OperationError::Cancelled {
                operation: operation.to_string(),
            }
            .into()),
        };
    }

    let res = tokio::select! {
        res = time::timeout(timeout, fut) => res,
        _ = token.cancelled() => {
            return Err(OperationError::Cancelled { operation: operation.to_string() }.into());
        }
    };

    match res {
        Ok(res) => res,
        Err(_elapsed) => {
            child.cancel();
            let timeout_ms = timeout.as_millis() as u64;
            tracing::warn!(operation, timeout_ms, "operation timed out");
            Err(OperationError::Timeout {
                operation: operation.to_string(),
                timeout,
            }
            .into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::executor::with_retry;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::time::Instant;

    struct DropFlag(Arc<AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_and_cancels_the_action() {
        let token = CancellationToken::new();
        let released = Arc::new(AtomicBool::new(false));
        let seen: Arc<Mutex<Option<CancellationToken>>> = Arc::default();
        let started = Instant::now();

        let res: Result<(), Error> = with_timeout(Duration::from_secs(2), "snapshot", &token, {
            let released = released.clone();
            let seen = seen.clone();
            move |child| async move {
                let _guard = DropFlag(released);
                *seen.lock().unwrap() = Some(child);
                time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            }
        })
        .await;

        assert_eq!(
            res.unwrap_err(),
            Error::Operation(OperationError::Timeout {
                operation: "snapshot".into(),
                timeout: Duration::from_secs(2),
            })
        );
        assert_eq!(started.elapsed(), Duration::from_secs(2));
        assert!(released.load(Ordering::SeqCst), "action future was not dropped");
        assert!(seen.lock().unwrap().as_ref().unwrap().is_cancelled());
        assert!(!token.is_cancelled(), "parent token must stay live");
    }

    #[tokio::test(start_paused = true)]
    async fn fast_action_passes_through() {
        let token = CancellationToken::new();
        let res: Result<u32, Error> =
            with_timeout(Duration::from_secs(1), "snapshot", &token, |_| async { Ok(7) }).await;
        assert_eq!(res.unwrap(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_around_timeout_recovers_from_a_hung_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let token = CancellationToken::new();

        let res: Result<&str, Error> =
            with_retry(2, Duration::from_millis(100), "snapshot", &token, |attempt_token| {
                let calls = calls.clone();
                async move {
                    let limit = Duration::from_secs(1);
                    with_timeout(limit, "snapshot", &attempt_token, |_| async move {
                        if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                            time::sleep(Duration::from_secs(3600)).await;
                        }
                        Ok("done")
                    })
                    .await
                }
            })
            .await;

        assert_eq!(res.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn parent_cancellation_wins_over_the_timer() {
        let token = CancellationToken::new();
        token.cancel();

        let res: Result<(), Error> =
            with_timeout(Duration::from_secs(5), "snapshot", &token, |_| async {
                time::sleep(Duration::from_secs(10)).await;
                Ok(())
            })
            .await;

        assert!(matches!(
            res,
            Err(Error::Operation(OperationError::Cancelled { .. }))
        ));
    }
}
