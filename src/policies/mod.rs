//! Reconnect policies for the worker channel.
//!
//! ## Contents
//! - [`ReconnectBackoff`] how long to wait after consecutive failed connects
//! - [`JitterPolicy`] randomization applied to that delay
//!
//! ```text
//! ConnectionSupervisor (single mode, auto_reconnect)
//!      └─► connect failed → failures += 1 → sleep(backoff.delay_after(failures))
//!      └─► connect ok     → failures = 0
//! ```
//!
//! Retry delays for operations are not computed here: the executor uses the
//! linear `retry_delay × attempt` schedule.

mod backoff;
mod jitter;

pub use backoff::ReconnectBackoff;
pub use jitter::JitterPolicy;
