//! # Service lifecycle states.
//!
//! ```text
//!                 initialize            start                 (hook ok)
//! Uninitialized ───────────► Initialized ─────► Starting ─────────────► Running
//!       ▲                        │  ▲                                    │
//!       │ reset                  │  │ start                       stop │
//!       │                        ▼  │                                    ▼
//!       └──────────────────── Stopped ◄────────────────────────────── Stopping
//!
//! Any failing hook moves the service to Error; only reset() leaves Error.
//! ```

use std::fmt;

/// Finite set of lifecycle states of a supervised service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceState {
    Uninitialized,
    Initialized,
    Starting,
    Running,
    Stopping,
    Stopped,
    Error,
}

impl ServiceState {
    /// Only a running service may serve usable-only operations.
    #[inline]
    pub fn is_usable(self) -> bool {
        matches!(self, ServiceState::Running)
    }

    #[inline]
    pub fn can_start(self) -> bool {
        matches!(self, ServiceState::Initialized | ServiceState::Stopped)
    }

    #[inline]
    pub fn can_stop(self) -> bool {
        matches!(self, ServiceState::Running)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ServiceState::Uninitialized => "uninitialized",
            ServiceState::Initialized => "initialized",
            ServiceState::Starting => "starting",
            ServiceState::Running => "running",
            ServiceState::Stopping => "stopping",
            ServiceState::Stopped => "stopped",
            ServiceState::Error => "error",
        }
    }
}

impl Default for ServiceState {
    fn default() -> Self {
        ServiceState::Uninitialized
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [ServiceState; 7] = [
        ServiceState::Uninitialized,
        ServiceState::Initialized,
        ServiceState::Starting,
        ServiceState::Running,
        ServiceState::Stopping,
        ServiceState::Stopped,
        ServiceState::Error,
    ];

    #[test]
    fn predicates_hold_only_in_their_states() {
        for s in ALL {
            assert_eq!(s.is_usable(), s == ServiceState::Running, "{s}");
            assert_eq!(s.can_stop(), s == ServiceState::Running, "{s}");
            assert_eq!(
                s.can_start(),
                matches!(s, ServiceState::Initialized | ServiceState::Stopped),
                "{s}"
            );
        }
    }
}
