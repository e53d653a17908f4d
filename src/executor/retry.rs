//! # Retry with linear backoff.
//!
//! ```text
//! attempt 1 ──► Err ──► sleep(delay × 1) ──► attempt 2 ──► Err ──► sleep(delay × 2) ──► … ──► attempt N ──► Err ──► return it
//!      └─► Ok ──► return
//! ```
//!
//! - Each attempt receives a fresh child of the caller's token.
//! - No sleep follows the last attempt.
//! - Cancelling the caller's token interrupts the backoff sleep with
//!   [`OperationError::Cancelled`].

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::error::OperationError;

/// Invokes `action` up to `attempts` times and returns the first success.
///
/// When every attempt fails the error of the last attempt is returned.
/// `attempts == 0` never invokes `action` and yields
/// [`OperationError::RetriesExhausted`].
pub async fn with_retry<T, E, F, Fut>(
    attempts: u32,
    delay: Duration,
    operation: &str,
    token: &CancellationToken,
    action: F,
) -> Result<T, E>
where
    F: FnMut(CancellationToken) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: From<OperationError> + Display,
{
    with_retry_if(attempts, delay, operation, token, |_: &E| true, action).await
}

/// Like [`with_retry`], but stops at the first error for which `retryable`
/// returns `false` and returns that error unchanged.
pub async fn with_retry_if<T, E, F, Fut, P>(
    attempts: u32,
    delay: Duration,
    operation: &str,
    token: &CancellationToken,
    retryable: P,
    mut action: F,
) -> Result<T, E>
where
    F: FnMut(CancellationToken) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: From<OperationError> + Display,
    P: Fn(&E) -> bool,
{
    for attempt in 1..=attempts {
        if token.is_cancelled() {
            return Err(cancelled(operation));
        }

        let err = match action(token.child_token()).await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        tracing::warn!(operation, attempt, total = attempts, error = %err, "attempt failed");
        if attempt == attempts || !retryable(&err) {
            return Err(err);
        }

        let backoff = delay.saturating_mul(attempt);
        tokio::select! {
            _ = token.cancelled() => return Err(cancelled(operation)),
            _ = time::sleep(backoff) => {}
        }
    }

    Err(OperationError::RetriesExhausted {
        operation: operation.to_string(),
        attempts,
    }
    .into())
}

fn cancelled<E: From<OperationError>>(operation: &str) -> E {
    OperationError::Cancelled {
        operation: operation.to_string(),
    }
    .into()
}
