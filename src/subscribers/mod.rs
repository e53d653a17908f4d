//! # Event subscribers.
//!
//! This module provides the [`Subscribe`] trait, the [`SubscriberSet`] fan-out and
//! the built-in [`LogWriter`].
//!
//! ## Architecture
//! ```text
//! Lifecycle / recovery / supervisor ── publish(Event) ──► Bus
//!                                                          │
//!                                            SubscriberSet::listen
//!                                                          │
//!                                   ┌──────────────┬───────┴──────┐
//!                                   ▼              ▼              ▼
//!                               LogWriter       Metrics         Custom
//! ```

#[cfg(feature = "logging")]
mod log;
mod set;
mod subscriber;

#[cfg(feature = "logging")]
pub use log::LogWriter;
pub use set::SubscriberSet;
pub use subscriber::Subscribe;
