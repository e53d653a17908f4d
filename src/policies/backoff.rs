//! # Reconnect backoff for the worker channel.
//!
//! [`ReconnectBackoff`] decides how long the connection supervisor waits before
//! opening a new channel after consecutive connect failures. The counter lives in
//! the supervisor and resets to zero on the first successful connect.
//!
//! The delay after `n` consecutive failures (`n >= 1`) is
//! `first × factor^(n-1)`, clamped to `max`, then jittered. With no failure
//! recorded the delay is zero: a dropped-but-healthy worker is redialled at once.
//!
//! # Example
//! ```rust
//! use std::time::Duration;
//! use ipcvisor::{JitterPolicy, ReconnectBackoff};
//!
//! let backoff = ReconnectBackoff {
//!     first: Duration::from_millis(200),
//!     max: Duration::from_secs(5),
//!     factor: 2.0,
//!     jitter: JitterPolicy::None,
//! };
//!
//! assert_eq!(backoff.delay_after(0), Duration::ZERO);
//! assert_eq!(backoff.delay_after(1), Duration::from_millis(200));
//! assert_eq!(backoff.delay_after(3), Duration::from_millis(800));
//! assert_eq!(backoff.delay_after(20), Duration::from_secs(5));
//! ```

use std::time::Duration;

use crate::policies::jitter::JitterPolicy;

/// Exponential delay between reconnect attempts.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ReconnectBackoff {
    /// Delay after the first failed connect.
    pub first: Duration,
    /// Upper bound before jitter.
    pub max: Duration,
    /// Growth per additional consecutive failure.
    pub factor: f64,
    /// Randomization applied to the clamped delay.
    pub jitter: JitterPolicy,
}

impl Default for ReconnectBackoff {
    /// `first = 100ms`, `factor = 2.0`, `max = 10s`, equal jitter.
    fn default() -> Self {
        Self {
            first: Duration::from_millis(100),
            max: Duration::from_secs(10),
            factor: 2.0,
            jitter: JitterPolicy::Equal,
        }
    }
}

impl ReconnectBackoff {
    /// Delay to wait before the next connect, given the number of consecutive
    /// failed connects so far.
    ///
    /// The base is derived from `failures` alone; jittered output never feeds
    /// into the next computation.
    pub fn delay_after(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }

        let exp = (failures - 1).min(i32::MAX as u32) as i32;
        let secs = self.first.as_secs_f64() * self.factor.powi(exp);
        let base = if !secs.is_finite() || secs < 0.0 || secs > self.max.as_secs_f64() {
            self.max
        } else {
            Duration::from_secs_f64(secs)
        };

        self.jitter.apply(base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain(first_ms: u64, max_ms: u64, factor: f64) -> ReconnectBackoff {
        ReconnectBackoff {
            first: Duration::from_millis(first_ms),
            max: Duration::from_millis(max_ms),
            factor,
            jitter: JitterPolicy::None,
        }
    }

    #[test]
    fn no_failures_means_no_delay() {
        assert_eq!(plain(100, 1000, 2.0).delay_after(0), Duration::ZERO);
    }

    #[test]
    fn grows_exponentially_until_capped() {
        let b = plain(100, 1000, 2.0);
        assert_eq!(b.delay_after(1), Duration::from_millis(100));
        assert_eq!(b.delay_after(2), Duration::from_millis(200));
        assert_eq!(b.delay_after(4), Duration::from_millis(800));
        assert_eq!(b.delay_after(5), Duration::from_millis(1000));
    }

    #[test]
    fn first_above_max_is_clamped() {
        assert_eq!(plain(5000, 1000, 1.0).delay_after(1), Duration::from_millis(1000));
    }

    #[test]
    fn overflowing_exponent_clamps_to_max() {
        assert_eq!(plain(100, 10_000, 2.0).delay_after(u32::MAX), Duration::from_secs(10));
    }

    #[test]
    fn jittered_delay_never_exceeds_cap() {
        let b = ReconnectBackoff {
            jitter: JitterPolicy::Full,
            ..plain(100, 2000, 3.0)
        };
        for failures in 1..30 {
            assert!(b.delay_after(failures) <= Duration::from_millis(2000));
        }
    }
}
