//! # Operation and result envelopes.
//!
//! An [`IpcOperation`] is the unit the supervisor sends to the worker; the
//! worker answers with exactly one [`IpcResult`] carrying the same identifier.
//! Both are immutable once built.
//!
//! # Example
//! ```
//! use ipcvisor::{IpcOperation, IpcResult, OperationType, ResultStatus};
//!
//! let op = IpcOperation::builder(OperationType::Command)
//!     .arg("snapshot")
//!     .arg("--tag=nightly")
//!     .env("BACKUP_REPO", "/srv/backups")
//!     .build();
//!
//! let res = IpcResult::success(op.id(), b"snapshot 42 saved".to_vec());
//! assert_eq!(res.id(), op.id());
//! assert_eq!(res.status(), ResultStatus::Success);
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::time::SystemTime;

use uuid::Uuid;

use crate::error::IpcError;

/// Identifier correlating an operation with its result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperationId(Uuid);

impl OperationId {
    /// Fresh random (v4) identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    pub fn to_bytes(self) -> [u8; 16] {
        *self.0.as_bytes()
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

/// Kind of work requested from the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationType {
    Command,
    FileRead,
    FileWrite,
    Security,
    Resource,
}

impl OperationType {
    pub fn as_str(self) -> &'static str {
        match self {
            OperationType::Command => "command",
            OperationType::FileRead => "file_read",
            OperationType::FileWrite => "file_write",
            OperationType::Security => "security",
            OperationType::Resource => "resource",
        }
    }

    pub fn as_u16(self) -> u16 {
        match self {
            OperationType::Command => 1,
            OperationType::FileRead => 2,
            OperationType::FileWrite => 3,
            OperationType::Security => 4,
            OperationType::Resource => 5,
        }
    }

    pub fn from_u16(raw: u16) -> Option<Self> {
        match raw {
            1 => Some(OperationType::Command),
            2 => Some(OperationType::FileRead),
            3 => Some(OperationType::FileWrite),
            4 => Some(OperationType::Security),
            5 => Some(OperationType::Resource),
            _ => None,
        }
    }

    /// File operations must name a path.
    pub fn is_file_operation(self) -> bool {
        matches!(self, OperationType::FileRead | OperationType::FileWrite)
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request sent to the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpcOperation {
    id: OperationId,
    op_type: OperationType,
    path: String,
    arguments: Vec<String>,
    environment: BTreeMap<String, String>,
    timestamp: SystemTime,
}

impl IpcOperation {
    pub fn builder(op_type: OperationType) -> OperationBuilder {
        OperationBuilder {
            id: None,
            op_type,
            path: String::new(),
            arguments: Vec::new(),
            environment: BTreeMap::new(),
            timestamp: None,
        }
    }

    pub fn id(&self) -> OperationId {
        self.id
    }

    pub fn op_type(&self) -> OperationType {
        self.op_type
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn arguments(&self) -> &[String] {
        &self.arguments
    }

    pub fn environment(&self) -> &BTreeMap<String, String> {
        &self.environment
    }

    pub fn timestamp(&self) -> SystemTime {
        self.timestamp
    }

    /// Checks the operation before it leaves the process.
    ///
    /// - file operations need a non-empty path ([`IpcError::InvalidArguments`]);
    /// - path, arguments and environment must not contain NUL ([`IpcError::UnsafeArguments`]);
    /// - command operations must carry every key in `required_env`
    ///   ([`IpcError::MissingEnvironment`]).
    pub fn validate(&self, required_env: &[String]) -> Result<(), IpcError> {
        if self.op_type.is_file_operation() && self.path.is_empty() {
            return Err(IpcError::InvalidArguments(format!(
                "{} operation requires a path",
                self.op_type
            )));
        }

        if self.path.contains('\0') {
            return Err(IpcError::UnsafeArguments("path contains a NUL byte".into()));
        }
        if let Some(i) = self.arguments.iter().position(|a| a.contains('\0')) {
            return Err(IpcError::UnsafeArguments(format!("argument {i} contains a NUL byte")));
        }
        if let Some((key, _)) = self
            .environment
            .iter()
            .find(|(k, v)| k.is_empty() || k.contains(['\0', '=']) || v.contains('\0'))
        {
            return Err(IpcError::UnsafeArguments(format!(
                "environment entry '{}' is malformed",
                key.escape_debug()
            )));
        }

        if self.op_type == OperationType::Command {
            let missing: Vec<&str> = required_env
                .iter()
                .filter(|k| !self.environment.contains_key(k.as_str()))
                .map(String::as_str)
                .collect();
            if !missing.is_empty() {
                return Err(IpcError::MissingEnvironment(missing.join(", ")));
            }
        }
        Ok(())
    }
}

/// Builder for [`IpcOperation`].
#[derive(Debug, Clone)]
pub struct OperationBuilder {
    id: Option<OperationId>,
    op_type: OperationType,
    path: String,
    arguments: Vec<String>,
    environment: BTreeMap<String, String>,
    timestamp: Option<SystemTime>,
}

impl OperationBuilder {
    /// Uses `id` instead of a generated one.
    pub fn id(mut self, id: OperationId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.arguments.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.arguments.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.environment
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn timestamp(mut self, at: SystemTime) -> Self {
        self.timestamp = Some(at);
        self
    }

    pub fn build(self) -> IpcOperation {
        IpcOperation {
            id: self.id.unwrap_or_default(),
            op_type: self.op_type,
            path: self.path,
            arguments: self.arguments,
            environment: self.environment,
            timestamp: self.timestamp.unwrap_or_else(SystemTime::now),
        }
    }
}

/// Outcome reported by the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResultStatus {
    Success,
    Failure,
    Cancelled,
}

impl ResultStatus {
    pub fn as_u16(self) -> u16 {
        match self {
            ResultStatus::Success => 1,
            ResultStatus::Failure => 2,
            ResultStatus::Cancelled => 3,
        }
    }

    pub fn from_u16(raw: u16) -> Option<Self> {
        match raw {
            1 => Some(ResultStatus::Success),
            2 => Some(ResultStatus::Failure),
            3 => Some(ResultStatus::Cancelled),
            _ => None,
        }
    }
}

/// Response to one [`IpcOperation`].
#[derive(Debug, Clone, PartialEq)]
pub struct IpcResult {
    id: OperationId,
    payload: Vec<u8>,
    error: Option<IpcError>,
    status: ResultStatus,
    timestamp: SystemTime,
}

impl IpcResult {
    pub fn success(id: OperationId, payload: Vec<u8>) -> Self {
        Self::from_parts(id, ResultStatus::Success, payload, None, SystemTime::now())
    }

    pub fn failure(id: OperationId, error: IpcError) -> Self {
        Self::from_parts(id, ResultStatus::Failure, Vec::new(), Some(error), SystemTime::now())
    }

    pub fn cancelled(id: OperationId) -> Self {
        Self::from_parts(id, ResultStatus::Cancelled, Vec::new(), None, SystemTime::now())
    }

    pub(crate) fn from_parts(
        id: OperationId,
        status: ResultStatus,
        payload: Vec<u8>,
        error: Option<IpcError>,
        timestamp: SystemTime,
    ) -> Self {
        Self {
            id,
            payload,
            error,
            status,
            timestamp,
        }
    }

    pub fn id(&self) -> OperationId {
        self.id
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn error(&self) -> Option<&IpcError> {
        self.error.as_ref()
    }

    pub fn status(&self) -> ResultStatus {
        self.status
    }

    pub fn timestamp(&self) -> SystemTime {
        self.timestamp
    }

    pub fn is_success(&self) -> bool {
        self.status == ResultStatus::Success
    }

    /// Payload of a successful result, or the reported failure.
    pub fn into_payload(self) -> Result<Vec<u8>, IpcError> {
        match self.status {
            ResultStatus::Success => Ok(self.payload),
            ResultStatus::Failure => Err(self
                .error
                .unwrap_or_else(|| IpcError::ExecutionFailed("worker reported a failure".into()))),
            ResultStatus::Cancelled => Err(IpcError::ExecutionFailed(format!(
                "operation {} was cancelled by the worker",
                self.id
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_are_generated_unless_supplied() {
        let a = IpcOperation::builder(OperationType::Resource).build();
        let b = IpcOperation::builder(OperationType::Resource).build();
        assert_ne!(a.id(), b.id());
        assert_eq!(a.id().as_uuid().get_version_num(), 4);

        let id = OperationId::new();
        let c = IpcOperation::builder(OperationType::Resource).id(id).build();
        assert_eq!(c.id(), id);
    }

    #[test]
    fn file_operations_need_a_path() {
        let op = IpcOperation::builder(OperationType::FileRead).build();
        assert!(matches!(op.validate(&[]), Err(IpcError::InvalidArguments(_))));

        let op = IpcOperation::builder(OperationType::FileRead)
            .path("/srv/backups/config")
            .build();
        assert_eq!(op.validate(&[]), Ok(()));
    }

    #[test]
    fn nul_bytes_are_unsafe() {
        let op = IpcOperation::builder(OperationType::Command)
            .args(["restore", "bad\0arg"])
            .build();
        assert_eq!(
            op.validate(&[]),
            Err(IpcError::UnsafeArguments("argument 1 contains a NUL byte".into()))
        );

        let op = IpcOperation::builder(OperationType::Command)
            .env("BACKUP_REPO", "/srv\0")
            .build();
        assert!(matches!(op.validate(&[]), Err(IpcError::UnsafeArguments(_))));
    }

    #[test]
    fn commands_must_carry_required_environment() {
        let required = vec!["BACKUP_REPO".to_string(), "BACKUP_PASSWORD_FILE".to_string()];
        let op = IpcOperation::builder(OperationType::Command)
            .env("BACKUP_REPO", "/srv/backups")
            .build();
        assert_eq!(
            op.validate(&required),
            Err(IpcError::MissingEnvironment("BACKUP_PASSWORD_FILE".into()))
        );

        // only command operations are checked
        let op = IpcOperation::builder(OperationType::Resource).build();
        assert_eq!(op.validate(&required), Ok(()));
    }

    #[test]
    fn result_payload_reflects_status() {
        let id = OperationId::new();
        assert_eq!(IpcResult::success(id, vec![1, 2]).into_payload(), Ok(vec![1, 2]));
        assert_eq!(
            IpcResult::failure(id, IpcError::BookmarkInvalid("stale".into())).into_payload(),
            Err(IpcError::BookmarkInvalid("stale".into()))
        );
        assert!(IpcResult::cancelled(id).into_payload().is_err());
    }
}
