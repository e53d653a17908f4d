//! # Out-of-process worker plumbing.
//!
//! The client side of the privileged backup-worker channel:
//!
//! ```text
//! IpcOperation ──► ConnectionSupervisor::dispatch
//!                    ├─► SandboxPolicy::validate_operation
//!                    ├─► admission (Queue / FailFast)
//!                    └─► retry ─► timeout ─► Channel::send / recv ─► IpcResult
//!                                   │
//!                     Connector::connect + handshake + verify_peer
//! ```
//!
//! - [`IpcConfiguration`] settings, loadable from TOML and validated before use;
//! - [`IpcOperation`] / [`IpcResult`] the envelopes exchanged with the worker;
//! - [`codec`] the length-prefixed, versioned frame format;
//! - [`Channel`] / [`Connector`] transport seams ([`UnixConnector`] on unix);
//! - [`ConnectionSupervisor`] connection ownership, reconnects and dispatch.

mod admission;
mod channel;
pub mod codec;
mod config;
mod envelope;
mod sandbox;
mod supervisor;

pub use admission::AdmissionPolicy;
#[cfg(unix)]
pub use channel::UnixConnector;
pub use channel::{AuditSession, Channel, Connector, PeerInfo, StreamChannel, handshake};
pub use config::{ConnectionMode, IpcConfiguration, ResourceLimits, SecurityLevel};
pub use envelope::{
    IpcOperation, IpcResult, OperationBuilder, OperationId, OperationType, ResultStatus,
};
pub use sandbox::SandboxPolicy;
pub use supervisor::{ConnectionSupervisor, SupervisorBuilder};
