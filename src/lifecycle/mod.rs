//! Service lifecycle: states, transitions and the capability services hold.
//!
//! ## Contents
//! - [`ServiceState`] the finite state set and its predicates
//! - [`Lifecycle`] the capability object: current state, transition lock, event publishing
//! - [`ServiceLifecycle`] provided `initialize`/`start`/`stop`/`reset` over service hooks

mod service;
mod state;

pub use service::{
    DEFAULT_LOCK_TIMEOUT, Lifecycle, ServiceLifecycle, Transition, TransitionGuard,
};
pub use state::ServiceState;
