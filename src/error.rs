//! Error types used by the supervising runtime.
//!
//! Every concern has its own enum, and [`Error`] aggregates them:
//!
//! - [`LifecycleError`] illegal transitions and failed lifecycle hooks;
//! - [`DependencyError`] a collaborator that is unavailable, misconfigured or slow;
//! - [`StateError`] transition bookkeeping and lock acquisition;
//! - [`OperationError`] failures raised by the executor (timeout, exhausted retries);
//! - [`IpcError`] the fourteen cross-process error codes;
//! - [`ConfigError`] field-specific configuration validation failures;
//! - [`ResourceError`] missing or inaccessible local resources;
//! - [`RecoveryError`] misuse of the recovery subsystem itself.
//!
//! All of them provide `as_label` (stable snake_case label for logs/metrics) and
//! `recovery_suggestion` (actionable text for calling layers). [`Error::category`]
//! classifies an error into the closed [`ErrorCategory`] enumeration used to pick
//! a recovery handler.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::lifecycle::ServiceState;
use crate::recovery::ErrorContext;

/// Convenience alias used across the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Closed classification of runtime failures.
///
/// Recovery handlers are registered per category, so the mapping from an error
/// variant to its category is the only place that decides which handler runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ErrorCategory {
    /// Illegal or failed lifecycle transitions.
    Lifecycle,
    /// State bookkeeping failures (lock timeouts, inconsistent transitions).
    State,
    /// Conditions expected to clear on their own: dropped channels, timeouts, busy peers.
    Transient,
    /// Missing or inaccessible resources on the local machine.
    LocalResource,
    /// Peer verification or authorization failures.
    Security,
    /// Malformed or incompatible responses from the worker.
    Protocol,
    /// Caller supplied an operation the worker must not run.
    InvalidInput,
    /// Invalid configuration.
    Configuration,
    /// Work that failed for a reason the runtime cannot classify further.
    Operation,
    /// Bugs or misuse of the runtime itself.
    Internal,
}

impl ErrorCategory {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ErrorCategory::Lifecycle => "lifecycle",
            ErrorCategory::State => "state",
            ErrorCategory::Transient => "transient",
            ErrorCategory::LocalResource => "local_resource",
            ErrorCategory::Security => "security",
            ErrorCategory::Protocol => "protocol",
            ErrorCategory::InvalidInput => "invalid_input",
            ErrorCategory::Configuration => "configuration",
            ErrorCategory::Operation => "operation",
            ErrorCategory::Internal => "internal",
        }
    }
}

/// # Crate-wide error.
///
/// Wraps the per-concern enums. Errors that escape
/// [`ErrorHandlingService::run`](crate::ErrorHandlingService::run) without being
/// recovered are wrapped in [`Error::Unrecovered`], which keeps the original error
/// together with the [`ErrorContext`] captured at the failure site.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error(transparent)]
    Dependency(#[from] DependencyError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Operation(#[from] OperationError),

    #[error(transparent)]
    Ipc(#[from] IpcError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Resource(#[from] ResourceError),

    #[error(transparent)]
    Recovery(#[from] RecoveryError),

    /// A failure that no recovery strategy absorbed.
    #[error("{0}")]
    Unrecovered(Box<ErrorContext>),
}

impl Error {
    /// Returns the innermost error, looking through [`Error::Unrecovered`] wrappers.
    pub fn root(&self) -> &Error {
        match self {
            Error::Unrecovered(ctx) => ctx.error().root(),
            other => other,
        }
    }

    /// Returns the failure-site context if this error escaped a recovery run.
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::Unrecovered(ctx) => Some(ctx),
            _ => None,
        }
    }

    /// Classifies the error by its variant (never by message text).
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Lifecycle(_) => ErrorCategory::Lifecycle,
            Error::Dependency(e) => e.category(),
            Error::State(_) => ErrorCategory::State,
            Error::Operation(e) => e.category(),
            Error::Ipc(e) => e.category(),
            Error::Config(_) => ErrorCategory::Configuration,
            Error::Resource(_) => ErrorCategory::LocalResource,
            Error::Recovery(_) => ErrorCategory::Internal,
            Error::Unrecovered(ctx) => ctx.error().category(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            Error::Lifecycle(e) => e.as_label(),
            Error::Dependency(e) => e.as_label(),
            Error::State(e) => e.as_label(),
            Error::Operation(e) => e.as_label(),
            Error::Ipc(e) => e.as_label(),
            Error::Config(e) => e.as_label(),
            Error::Resource(e) => e.as_label(),
            Error::Recovery(e) => e.as_label(),
            Error::Unrecovered(ctx) => ctx.error().as_label(),
        }
    }

    /// Returns an actionable hint for the calling layer.
    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            Error::Lifecycle(e) => e.recovery_suggestion(),
            Error::Dependency(e) => e.recovery_suggestion(),
            Error::State(e) => e.recovery_suggestion(),
            Error::Operation(e) => e.recovery_suggestion(),
            Error::Ipc(e) => e.recovery_suggestion(),
            Error::Config(e) => e.recovery_suggestion(),
            Error::Resource(e) => e.recovery_suggestion(),
            Error::Recovery(e) => e.recovery_suggestion(),
            Error::Unrecovered(ctx) => ctx.error().recovery_suggestion(),
        }
    }

    /// Indicates whether retrying the same work may succeed.
    pub fn is_transient(&self) -> bool {
        self.category() == ErrorCategory::Transient
    }
}

/// # Lifecycle errors.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    /// The requested transition or operation is not legal in the current state.
    #[error("cannot {operation} service '{service}' in state '{state}'")]
    InvalidState {
        service: String,
        operation: String,
        state: ServiceState,
    },

    #[error("service '{service}' failed to initialize: {reason}")]
    InitializationFailed { service: String, reason: String },

    #[error("service '{service}' failed to start: {reason}")]
    StartFailed { service: String, reason: String },

    #[error("service '{service}' failed to stop: {reason}")]
    StopFailed { service: String, reason: String },

    #[error("service '{service}' failed to reset: {reason}")]
    ResetFailed { service: String, reason: String },
}

impl LifecycleError {
    pub fn as_label(&self) -> &'static str {
        match self {
            LifecycleError::InvalidState { .. } => "lifecycle_invalid_state",
            LifecycleError::InitializationFailed { .. } => "lifecycle_initialization_failed",
            LifecycleError::StartFailed { .. } => "lifecycle_start_failed",
            LifecycleError::StopFailed { .. } => "lifecycle_stop_failed",
            LifecycleError::ResetFailed { .. } => "lifecycle_reset_failed",
        }
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            LifecycleError::InvalidState { .. } => {
                "Check the service state before calling; \
                 start the service or reset it after an error."
            }
            LifecycleError::InitializationFailed { .. } => {
                "Fix the reported initialization problem, \
                 then reset and initialize the service again."
            }
            LifecycleError::StartFailed { .. } | LifecycleError::StopFailed { .. } => {
                "The service is now in the error state; reset it before retrying."
            }
            LifecycleError::ResetFailed { .. } => {
                "Resetting failed; inspect the reason and retry the reset."
            }
        }
    }
}

/// # Dependency errors.
///
/// Raised when a collaborator of a service (the worker, a connector) is missing,
/// misconfigured or does not answer in time.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DependencyError {
    #[error("dependency '{name}' is unavailable")]
    Unavailable { name: String },

    #[error("dependency '{name}' is misconfigured: {reason}")]
    Misconfigured { name: String, reason: String },

    #[error("dependency '{name}' did not respond within {timeout:?}")]
    Timeout { name: String, timeout: Duration },
}

impl DependencyError {
    fn category(&self) -> ErrorCategory {
        match self {
            DependencyError::Unavailable { .. } | DependencyError::Timeout { .. } => {
                ErrorCategory::Transient
            }
            DependencyError::Misconfigured { .. } => ErrorCategory::Configuration,
        }
    }

    pub fn as_label(&self) -> &'static str {
        match self {
            DependencyError::Unavailable { .. } => "dependency_unavailable",
            DependencyError::Misconfigured { .. } => "dependency_misconfigured",
            DependencyError::Timeout { .. } => "dependency_timeout",
        }
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            DependencyError::Unavailable { .. } => {
                "Make sure the worker process is running and reachable, then retry."
            }
            DependencyError::Misconfigured { .. } => {
                "Review the service configuration for the named dependency."
            }
            DependencyError::Timeout { .. } => {
                "The worker is slow to respond; retry later or raise the connection timeout."
            }
        }
    }
}

/// # State bookkeeping errors.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    /// The state changed underneath an in-flight transition.
    #[error("transition {from} -> {to} failed: {reason}")]
    TransitionFailed {
        from: ServiceState,
        to: ServiceState,
        reason: String,
    },

    /// A guarded resource could not be locked in time.
    #[error("timed out after {timeout:?} waiting for lock on {resource}")]
    LockTimeout { resource: String, timeout: Duration },
}

impl StateError {
    pub fn as_label(&self) -> &'static str {
        match self {
            StateError::TransitionFailed { .. } => "state_transition_failed",
            StateError::LockTimeout { .. } => "state_lock_timeout",
        }
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            StateError::TransitionFailed { .. } => {
                "Another transition interfered; reset the service and retry."
            }
            StateError::LockTimeout { .. } => {
                "A concurrent transition is taking too long; retry once it completes."
            }
        }
    }
}

/// # Errors produced by the executor.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OperationError {
    /// Work failed with a message only (used when adapting foreign errors).
    #[error("operation '{operation}' failed: {reason}")]
    Failed { operation: String, reason: String },

    /// Work exceeded its deadline and was cancelled.
    #[error("operation '{operation}' timed out after {timeout:?}")]
    Timeout { operation: String, timeout: Duration },

    /// Retry loop finished without capturing an error (zero attempts).
    #[error("operation '{operation}' exhausted {attempts} retry attempts")]
    RetriesExhausted { operation: String, attempts: u32 },

    /// Caller cancelled the operation.
    #[error("operation '{operation}' was cancelled")]
    Cancelled { operation: String },
}

impl OperationError {
    fn category(&self) -> ErrorCategory {
        match self {
            OperationError::Timeout { .. } => ErrorCategory::Transient,
            _ => ErrorCategory::Operation,
        }
    }

    pub fn as_label(&self) -> &'static str {
        match self {
            OperationError::Failed { .. } => "operation_failed",
            OperationError::Timeout { .. } => "operation_timeout",
            OperationError::RetriesExhausted { .. } => "operation_retries_exhausted",
            OperationError::Cancelled { .. } => "operation_cancelled",
        }
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            OperationError::Failed { .. } => "Inspect the failure reason and retry the operation.",
            OperationError::Timeout { .. } => {
                "Retry later or raise the operation timeout for long-running work."
            }
            OperationError::RetriesExhausted { .. } => {
                "Configure at least one attempt, or investigate the persistent failure."
            }
            OperationError::Cancelled { .. } => "Re-issue the operation if it is still needed.",
        }
    }
}

/// Stable integer codes for cross-process correlation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum IpcErrorCode {
    ServiceUnavailable = 1,
    ConnectionFailed = 2,
    ExecutionFailed = 3,
    InvalidResponse = 4,
    Timeout = 5,
    BookmarkInvalid = 6,
    AccessDenied = 7,
    ResourceNotFound = 8,
    VersionMismatch = 9,
    InternalError = 10,
    InvalidArguments = 11,
    MissingEnvironment = 12,
    UnsafeArguments = 13,
    ResourceUnavailable = 14,
}

impl IpcErrorCode {
    /// Returns the wire integer.
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// Parses a wire integer.
    pub fn from_u16(raw: u16) -> Option<Self> {
        Some(match raw {
            1 => IpcErrorCode::ServiceUnavailable,
            2 => IpcErrorCode::ConnectionFailed,
            3 => IpcErrorCode::ExecutionFailed,
            4 => IpcErrorCode::InvalidResponse,
            5 => IpcErrorCode::Timeout,
            6 => IpcErrorCode::BookmarkInvalid,
            7 => IpcErrorCode::AccessDenied,
            8 => IpcErrorCode::ResourceNotFound,
            9 => IpcErrorCode::VersionMismatch,
            10 => IpcErrorCode::InternalError,
            11 => IpcErrorCode::InvalidArguments,
            12 => IpcErrorCode::MissingEnvironment,
            13 => IpcErrorCode::UnsafeArguments,
            14 => IpcErrorCode::ResourceUnavailable,
            _ => return None,
        })
    }
}

/// # Cross-process errors.
///
/// Each variant maps one-to-one onto an [`IpcErrorCode`], so an error can travel
/// inside an [`IpcResult`](crate::IpcResult) and be rebuilt on the other side.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IpcError {
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("invalid bookmark: {0}")]
    BookmarkInvalid(String),

    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("resource not found: {0}")]
    ResourceNotFound(String),

    #[error("version mismatch: {0}")]
    VersionMismatch(String),

    #[error("internal error: {0}")]
    InternalError(String),

    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("missing environment: {0}")]
    MissingEnvironment(String),

    #[error("unsafe arguments: {0}")]
    UnsafeArguments(String),

    #[error("resource unavailable: {0}")]
    ResourceUnavailable(String),
}

impl IpcError {
    /// Rebuilds an error from its wire representation.
    pub fn from_code(code: IpcErrorCode, message: impl Into<String>) -> Self {
        let m = message.into();
        match code {
            IpcErrorCode::ServiceUnavailable => IpcError::ServiceUnavailable(m),
            IpcErrorCode::ConnectionFailed => IpcError::ConnectionFailed(m),
            IpcErrorCode::ExecutionFailed => IpcError::ExecutionFailed(m),
            IpcErrorCode::InvalidResponse => IpcError::InvalidResponse(m),
            IpcErrorCode::Timeout => IpcError::Timeout(m),
            IpcErrorCode::BookmarkInvalid => IpcError::BookmarkInvalid(m),
            IpcErrorCode::AccessDenied => IpcError::AccessDenied(m),
            IpcErrorCode::ResourceNotFound => IpcError::ResourceNotFound(m),
            IpcErrorCode::VersionMismatch => IpcError::VersionMismatch(m),
            IpcErrorCode::InternalError => IpcError::InternalError(m),
            IpcErrorCode::InvalidArguments => IpcError::InvalidArguments(m),
            IpcErrorCode::MissingEnvironment => IpcError::MissingEnvironment(m),
            IpcErrorCode::UnsafeArguments => IpcError::UnsafeArguments(m),
            IpcErrorCode::ResourceUnavailable => IpcError::ResourceUnavailable(m),
        }
    }

    /// Returns the stable wire code.
    pub fn code(&self) -> IpcErrorCode {
        match self {
            IpcError::ServiceUnavailable(_) => IpcErrorCode::ServiceUnavailable,
            IpcError::ConnectionFailed(_) => IpcErrorCode::ConnectionFailed,
            IpcError::ExecutionFailed(_) => IpcErrorCode::ExecutionFailed,
            IpcError::InvalidResponse(_) => IpcErrorCode::InvalidResponse,
            IpcError::Timeout(_) => IpcErrorCode::Timeout,
            IpcError::BookmarkInvalid(_) => IpcErrorCode::BookmarkInvalid,
            IpcError::AccessDenied(_) => IpcErrorCode::AccessDenied,
            IpcError::ResourceNotFound(_) => IpcErrorCode::ResourceNotFound,
            IpcError::VersionMismatch(_) => IpcErrorCode::VersionMismatch,
            IpcError::InternalError(_) => IpcErrorCode::InternalError,
            IpcError::InvalidArguments(_) => IpcErrorCode::InvalidArguments,
            IpcError::MissingEnvironment(_) => IpcErrorCode::MissingEnvironment,
            IpcError::UnsafeArguments(_) => IpcErrorCode::UnsafeArguments,
            IpcError::ResourceUnavailable(_) => IpcErrorCode::ResourceUnavailable,
        }
    }

    /// Returns the message without the code prefix.
    pub fn message(&self) -> &str {
        match self {
            IpcError::ServiceUnavailable(m)
            | IpcError::ConnectionFailed(m)
            | IpcError::ExecutionFailed(m)
            | IpcError::InvalidResponse(m)
            | IpcError::Timeout(m)
            | IpcError::BookmarkInvalid(m)
            | IpcError::AccessDenied(m)
            | IpcError::ResourceNotFound(m)
            | IpcError::VersionMismatch(m)
            | IpcError::InternalError(m)
            | IpcError::InvalidArguments(m)
            | IpcError::MissingEnvironment(m)
            | IpcError::UnsafeArguments(m)
            | IpcError::ResourceUnavailable(m) => m,
        }
    }

    /// Indicates whether the channel failure may clear on a fresh attempt.
    pub fn is_transient(&self) -> bool {
        self.category() == ErrorCategory::Transient
    }

    fn category(&self) -> ErrorCategory {
        match self {
            IpcError::ServiceUnavailable(_)
            | IpcError::ConnectionFailed(_)
            | IpcError::Timeout(_)
            | IpcError::ResourceUnavailable(_) => ErrorCategory::Transient,
            IpcError::AccessDenied(_) | IpcError::BookmarkInvalid(_) => ErrorCategory::Security,
            IpcError::ResourceNotFound(_) => ErrorCategory::LocalResource,
            IpcError::InvalidResponse(_) | IpcError::VersionMismatch(_) => ErrorCategory::Protocol,
            IpcError::InvalidArguments(_)
            | IpcError::MissingEnvironment(_)
            | IpcError::UnsafeArguments(_) => ErrorCategory::InvalidInput,
            IpcError::ExecutionFailed(_) => ErrorCategory::Operation,
            IpcError::InternalError(_) => ErrorCategory::Internal,
        }
    }

    pub fn as_label(&self) -> &'static str {
        match self {
            IpcError::ServiceUnavailable(_) => "ipc_service_unavailable",
            IpcError::ConnectionFailed(_) => "ipc_connection_failed",
            IpcError::ExecutionFailed(_) => "ipc_execution_failed",
            IpcError::InvalidResponse(_) => "ipc_invalid_response",
            IpcError::Timeout(_) => "ipc_timeout",
            IpcError::BookmarkInvalid(_) => "ipc_bookmark_invalid",
            IpcError::AccessDenied(_) => "ipc_access_denied",
            IpcError::ResourceNotFound(_) => "ipc_resource_not_found",
            IpcError::VersionMismatch(_) => "ipc_version_mismatch",
            IpcError::InternalError(_) => "ipc_internal_error",
            IpcError::InvalidArguments(_) => "ipc_invalid_arguments",
            IpcError::MissingEnvironment(_) => "ipc_missing_environment",
            IpcError::UnsafeArguments(_) => "ipc_unsafe_arguments",
            IpcError::ResourceUnavailable(_) => "ipc_resource_unavailable",
        }
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            IpcError::ServiceUnavailable(_) => "Start the worker service and try again.",
            IpcError::ConnectionFailed(_) => {
                "Check that the worker is running and the socket path is correct."
            }
            IpcError::ExecutionFailed(_) => "Inspect the worker output for the failing command.",
            IpcError::InvalidResponse(_) => {
                "The worker sent an unexpected reply; restart it and retry."
            }
            IpcError::Timeout(_) => "Retry later or raise the operation timeout.",
            IpcError::BookmarkInvalid(_) => "Re-select the location to refresh its access grant.",
            IpcError::AccessDenied(_) => {
                "Verify the worker's identity and the configured security level."
            }
            IpcError::ResourceNotFound(_) => "Check that the referenced path exists.",
            IpcError::VersionMismatch(_) => "Install matching versions of the client and worker.",
            IpcError::InternalError(_) => "Report the problem; the worker hit an internal error.",
            IpcError::InvalidArguments(_) => "Correct the operation arguments and resubmit.",
            IpcError::MissingEnvironment(_) => {
                "Provide the required environment variables with the operation."
            }
            IpcError::UnsafeArguments(_) => {
                "Remove control characters from arguments and environment values."
            }
            IpcError::ResourceUnavailable(_) => {
                "The worker is at capacity; retry after in-flight operations finish."
            }
        }
    }
}

/// # Configuration validation errors.
///
/// Each variant names the single field that failed validation.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Service name cannot be empty")]
    EmptyServiceName,

    #[error("Service name '{0}' contains whitespace or control characters")]
    InvalidServiceName(String),

    #[error("Connection timeout must be greater than zero")]
    InvalidConnectionTimeout,

    #[error("CPU percentage must be between 0 and 100")]
    InvalidCpuPercentage(f64),

    #[error("Memory limit must be greater than zero")]
    InvalidMemoryLimit,

    #[error("File descriptor limit must be greater than zero")]
    InvalidFileDescriptorLimit,

    #[error("Disk limit must be greater than zero")]
    InvalidDiskLimit,

    #[error("Max concurrent operations must be greater than zero")]
    InvalidConcurrency,

    #[error("Operation timeout must be greater than zero")]
    InvalidOperationTimeout,

    /// The configuration source could not be parsed.
    #[error("invalid configuration: {0}")]
    Parse(String),
}

impl ConfigError {
    /// Returns the configuration field this error refers to.
    pub fn field(&self) -> &'static str {
        match self {
            ConfigError::EmptyServiceName | ConfigError::InvalidServiceName(_) => "service_name",
            ConfigError::InvalidConnectionTimeout => "connection_timeout",
            ConfigError::InvalidCpuPercentage(_) => "resource_limits.max_cpu_percentage",
            ConfigError::InvalidMemoryLimit => "resource_limits.max_memory_bytes",
            ConfigError::InvalidFileDescriptorLimit => "resource_limits.max_file_descriptors",
            ConfigError::InvalidDiskLimit => "resource_limits.max_disk_bytes",
            ConfigError::InvalidConcurrency => "max_concurrent_operations",
            ConfigError::InvalidOperationTimeout => "operation_timeout",
            ConfigError::Parse(_) => "<source>",
        }
    }

    pub fn as_label(&self) -> &'static str {
        match self {
            ConfigError::Parse(_) => "config_parse",
            _ => "config_invalid_field",
        }
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            ConfigError::Parse(_) => "Fix the syntax of the configuration source.",
            _ => "Correct the named configuration field and construct the service again.",
        }
    }
}

/// # Local resource errors.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResourceError {
    #[error("resource not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("permission denied: {}", path.display())]
    PermissionDenied { path: PathBuf },

    #[error("resource unavailable: {}: {reason}", path.display())]
    Unavailable { path: PathBuf, reason: String },
}

impl ResourceError {
    /// Classifies an I/O failure on `path`.
    pub fn from_io(path: impl Into<PathBuf>, err: &io::Error) -> Self {
        let path = path.into();
        match err.kind() {
            io::ErrorKind::NotFound => ResourceError::NotFound { path },
            io::ErrorKind::PermissionDenied => ResourceError::PermissionDenied { path },
            _ => ResourceError::Unavailable {
                path,
                reason: err.to_string(),
            },
        }
    }

    pub fn as_label(&self) -> &'static str {
        match self {
            ResourceError::NotFound { .. } => "resource_not_found",
            ResourceError::PermissionDenied { .. } => "resource_permission_denied",
            ResourceError::Unavailable { .. } => "resource_unavailable",
        }
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            ResourceError::NotFound { .. } => "Check that the path exists and was not moved.",
            ResourceError::PermissionDenied { .. } => {
                "Grant the process access to the path (e.g. full disk access) and retry."
            }
            ResourceError::Unavailable { .. } => "Free the resource or retry later.",
        }
    }
}

/// # Errors raised by the recovery subsystem itself.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecoveryError {
    /// A fallback value did not have the type the operation returns.
    #[error("fallback for '{operation}' does not produce a value of type {expected}")]
    FallbackTypeMismatch {
        operation: String,
        expected: &'static str,
    },

    /// A recovery operation with this id is already registered.
    #[error("recovery operation '{id}' is already registered")]
    DuplicateOperation { id: String },
}

impl RecoveryError {
    pub fn as_label(&self) -> &'static str {
        match self {
            RecoveryError::FallbackTypeMismatch { .. } => "recovery_fallback_type_mismatch",
            RecoveryError::DuplicateOperation { .. } => "recovery_duplicate_operation",
        }
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            RecoveryError::FallbackTypeMismatch { .. } => {
                "Register a fallback whose value matches the operation's result type."
            }
            RecoveryError::DuplicateOperation { .. } => {
                "Remove the existing operation first or choose a unique id."
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ipc_codes_round_trip_through_integers() {
        for raw in 1..=14u16 {
            let code = IpcErrorCode::from_u16(raw).expect("known code");
            assert_eq!(code.as_u16(), raw);
            assert_eq!(IpcError::from_code(code, "x").code(), code);
        }
        assert!(IpcErrorCode::from_u16(0).is_none());
        assert!(IpcErrorCode::from_u16(15).is_none());
    }

    #[test]
    fn category_follows_variant_not_message() {
        let transient: Error = IpcError::ConnectionFailed("permission denied".into()).into();
        assert_eq!(transient.category(), ErrorCategory::Transient);

        let denied: Error = ResourceError::PermissionDenied {
            path: "/tmp/x".into(),
        }
        .into();
        assert_eq!(denied.category(), ErrorCategory::LocalResource);
    }

    #[test]
    fn io_errors_map_to_resource_kinds() {
        let nf = io::Error::new(io::ErrorKind::NotFound, "gone");
        assert!(matches!(
            ResourceError::from_io("/a", &nf),
            ResourceError::NotFound { .. }
        ));
        let pd = io::Error::new(io::ErrorKind::PermissionDenied, "no");
        assert!(matches!(
            ResourceError::from_io("/a", &pd),
            ResourceError::PermissionDenied { .. }
        ));
    }

    #[test]
    fn every_error_has_a_suggestion() {
        let errors: Vec<Error> = vec![
            OperationError::Timeout {
                operation: "op".into(),
                timeout: Duration::from_secs(1),
            }
            .into(),
            ConfigError::EmptyServiceName.into(),
            IpcError::AccessDenied("peer".into()).into(),
            RecoveryError::DuplicateOperation { id: "a".into() }.into(),
        ];
        for e in errors {
            assert!(!e.recovery_suggestion().is_empty());
            assert!(!e.to_string().is_empty());
        }
    }
}
