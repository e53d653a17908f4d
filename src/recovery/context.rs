//! # Failure-site context.
//!
//! An [`ErrorContext`] is built once per failure inside
//! [`ErrorHandlingService::run`](crate::ErrorHandlingService::run) and handed to
//! the registered handler. If no strategy absorbs the failure it travels on
//! inside [`Error::Unrecovered`].

use std::collections::BTreeMap;
use std::fmt;
use std::panic::Location;
use std::time::SystemTime;

use crate::error::Error;

/// Free-form key/value pairs attached to a failure (paths, repository ids…).
pub type Metadata = BTreeMap<String, String>;

/// Source position of the call that started the failed work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceLocation {
    pub file: &'static str,
    pub line: u32,
    pub column: u32,
}

impl SourceLocation {
    /// Position of the caller of the enclosing `#[track_caller]` function.
    #[track_caller]
    pub fn caller() -> Self {
        Location::caller().into()
    }
}

impl From<&'static Location<'static>> for SourceLocation {
    fn from(loc: &'static Location<'static>) -> Self {
        Self {
            file: loc.file(),
            line: loc.line(),
            column: loc.column(),
        }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// Immutable record of one failure.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorContext {
    error: Error,
    operation: String,
    location: SourceLocation,
    timestamp: SystemTime,
    metadata: Metadata,
}

impl ErrorContext {
    pub fn new(
        error: Error,
        operation: impl Into<String>,
        location: SourceLocation,
        metadata: Metadata,
    ) -> Self {
        Self {
            error,
            operation: operation.into(),
            location,
            timestamp: SystemTime::now(),
            metadata,
        }
    }

    /// Builds a context located at the caller.
    #[track_caller]
    pub fn capture(error: Error, operation: impl Into<String>, metadata: Metadata) -> Self {
        Self::new(error, operation, SourceLocation::caller(), metadata)
    }

    pub fn error(&self) -> &Error {
        &self.error
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn location(&self) -> SourceLocation {
        self.location
    }

    pub fn timestamp(&self) -> SystemTime {
        self.timestamp
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Consumes the context, returning the wrapped error.
    pub fn into_error(self) -> Error {
        self.error
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (operation '{}' at {})", self.error, self.operation, self.location)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorCategory, IpcError};

    #[test]
    fn capture_records_the_calling_line() {
        let line = line!() + 1;
        let ctx = ErrorContext::capture(
            IpcError::Timeout("worker".into()).into(),
            "snapshot",
            Metadata::new(),
        );

        assert_eq!(ctx.location().line, line);
        assert!(ctx.location().file.ends_with("context.rs"));
        assert_eq!(ctx.operation(), "snapshot");
    }

    #[test]
    fn unrecovered_error_keeps_root_and_category() {
        let mut meta = Metadata::new();
        meta.insert("repository".into(), "/backups/main".into());
        let ctx = ErrorContext::capture(
            IpcError::ConnectionFailed("reset".into()).into(),
            "snapshot",
            meta,
        );
        let err = Error::Unrecovered(Box::new(ctx));

        assert_eq!(err.category(), ErrorCategory::Transient);
        assert!(matches!(err.root(), Error::Ipc(IpcError::ConnectionFailed(_))));
        assert_eq!(
            err.context().map(|c| c.metadata()["repository"].as_str()),
            Some("/backups/main")
        );
        assert!(err.to_string().starts_with("connection failed: reset (operation 'snapshot' at "));
    }
}
