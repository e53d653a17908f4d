//! Runtime events: types and broadcast bus.
//!
//! ## Contents
//! - [`EventKind`], [`Event`] event classification and payload metadata
//! - [`Bus`] thin wrapper over `tokio::sync::broadcast`
//!
//! ## Quick reference
//! - **Publishers**: `Lifecycle`, `ErrorHandlingService`, `ErrorRecoveryService`,
//!   `ConnectionSupervisor`, `SubscriberSet` workers (overflow/panic).
//! - **Consumers**: `SubscriberSet::listen` (fans out to subscribers), tests.

mod bus;
mod event;

pub use bus::{Bus, DEFAULT_BUS_CAPACITY};
pub use event::{Event, EventKind};
