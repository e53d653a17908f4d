//! # Connection supervisor configuration.
//!
//! [`IpcConfiguration`] describes how the supervisor talks to the worker:
//! connection mode, security posture, timeouts, retry bounds and the resource
//! limits handed to the worker at handshake time.
//!
//! Durations are (de)serialized as integer milliseconds.
//!
//! # Example
//! ```
//! use std::time::Duration;
//! use ipcvisor::{ConnectionMode, IpcConfiguration, SecurityLevel};
//!
//! let cfg = IpcConfiguration::from_toml_str(r#"
//!     service_name = "backup-worker"
//!     security_level = "maximum"
//!     connection_mode = "pool"
//!     max_concurrent_operations = 8
//!     operation_timeout = 120000
//!
//!     [resource_limits]
//!     max_cpu_percentage = 50.0
//! "#).unwrap();
//!
//! assert_eq!(cfg.security_level, SecurityLevel::Maximum);
//! assert_eq!(cfg.connection_mode, ConnectionMode::Pool);
//! assert_eq!(cfg.operation_timeout, Duration::from_secs(120));
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::lifecycle::DEFAULT_LOCK_TIMEOUT;

/// Strictness of peer verification. Ordered `Standard < Enhanced < Maximum`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityLevel {
    /// Handshake only.
    Standard,
    /// Audit-session check when `validate_audit_session` is set.
    #[default]
    Enhanced,
    /// Audit-session check plus peer service-name check.
    Maximum,
}

impl SecurityLevel {
    pub fn as_u16(self) -> u16 {
        match self {
            SecurityLevel::Standard => 0,
            SecurityLevel::Enhanced => 1,
            SecurityLevel::Maximum => 2,
        }
    }

    pub fn from_u16(raw: u16) -> Option<Self> {
        match raw {
            0 => Some(SecurityLevel::Standard),
            1 => Some(SecurityLevel::Enhanced),
            2 => Some(SecurityLevel::Maximum),
            _ => None,
        }
    }
}

/// How many channels the supervisor keeps open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionMode {
    /// One persistent channel; operations run in submission order.
    #[default]
    Single,
    /// Up to `max_concurrent_operations` channels.
    Pool,
}

/// Limits the worker is asked to honor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResourceLimits {
    pub max_memory_bytes: u64,
    /// Share of one CPU, in `[0, 100]`.
    pub max_cpu_percentage: f64,
    /// Also caps the pool size.
    pub max_file_descriptors: u32,
    pub max_disk_bytes: u64,
}

impl Default for ResourceLimits {
    /// 512 MiB memory, 80% CPU, 256 descriptors, 10 GiB disk.
    fn default() -> Self {
        Self {
            max_memory_bytes: 512 * 1024 * 1024,
            max_cpu_percentage: 80.0,
            max_file_descriptors: 256,
            max_disk_bytes: 10 * 1024 * 1024 * 1024,
        }
    }
}

/// Configuration of one connection supervisor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IpcConfiguration {
    /// Name of the worker service; also the expected peer name at `Maximum`.
    pub service_name: String,
    pub security_level: SecurityLevel,
    pub connection_mode: ConnectionMode,
    /// Check the peer's audit session (from `Enhanced` up).
    pub validate_audit_session: bool,
    /// Bound on connect plus handshake.
    #[serde(with = "millis")]
    pub connection_timeout: Duration,
    /// Redial a dropped channel in single mode.
    pub auto_reconnect: bool,
    /// Retries after the first attempt for transient failures.
    pub max_retry_attempts: u32,
    /// Base delay between retries; the sleep after attempt `n` is `retry_delay × n`.
    #[serde(with = "millis")]
    pub retry_delay: Duration,
    pub max_concurrent_operations: usize,
    /// Bound on one attempt of one operation.
    #[serde(with = "millis")]
    pub operation_timeout: Duration,
    /// Environment keys every command operation must carry.
    pub required_environment: Vec<String>,
    /// Bound on waiting for a lifecycle transition lock.
    #[serde(with = "millis")]
    pub lock_timeout: Duration,
    pub resource_limits: ResourceLimits,
}

impl Default for IpcConfiguration {
    /// - `service_name = "backup-worker"`, `Enhanced` security with audit-session checks
    /// - single mode, auto-reconnect
    /// - `connection_timeout = 30s`, `operation_timeout = 5min`
    /// - 3 retries, `retry_delay = 1s`
    /// - 4 concurrent operations
    fn default() -> Self {
        Self {
            service_name: "backup-worker".to_string(),
            security_level: SecurityLevel::default(),
            connection_mode: ConnectionMode::default(),
            validate_audit_session: true,
            connection_timeout: Duration::from_secs(30),
            auto_reconnect: true,
            max_retry_attempts: 3,
            retry_delay: Duration::from_secs(1),
            max_concurrent_operations: 4,
            operation_timeout: Duration::from_secs(300),
            required_environment: Vec::new(),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            resource_limits: ResourceLimits::default(),
        }
    }
}

impl IpcConfiguration {
    /// Default configuration for `service_name`.
    pub fn for_service(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            ..Self::default()
        }
    }

    /// Parses and validates a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let cfg: Self = toml::from_str(source).map_err(|e| ConfigError::Parse(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Checks the fields in a fixed order and reports the first violation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service_name.is_empty() {
            return Err(ConfigError::EmptyServiceName);
        }
        if self
            .service_name
            .chars()
            .any(|c| c.is_whitespace() || c.is_control())
        {
            return Err(ConfigError::InvalidServiceName(self.service_name.clone()));
        }
        if self.connection_timeout.is_zero() {
            return Err(ConfigError::InvalidConnectionTimeout);
        }

        let limits = &self.resource_limits;
        if !(0.0..=100.0).contains(&limits.max_cpu_percentage) {
            return Err(ConfigError::InvalidCpuPercentage(limits.max_cpu_percentage));
        }
        if limits.max_memory_bytes == 0 {
            return Err(ConfigError::InvalidMemoryLimit);
        }
        if limits.max_file_descriptors == 0 {
            return Err(ConfigError::InvalidFileDescriptorLimit);
        }
        if limits.max_disk_bytes == 0 {
            return Err(ConfigError::InvalidDiskLimit);
        }

        if self.max_concurrent_operations == 0 {
            return Err(ConfigError::InvalidConcurrency);
        }
        if self.operation_timeout.is_zero() {
            return Err(ConfigError::InvalidOperationTimeout);
        }
        Ok(())
    }

    /// Total attempts per operation (first try plus retries).
    pub fn total_attempts(&self) -> u32 {
        self.max_retry_attempts.saturating_add(1)
    }

    /// Number of channels the supervisor may hold at once.
    pub fn channel_capacity(&self) -> usize {
        match self.connection_mode {
            ConnectionMode::Single => 1,
            ConnectionMode::Pool => self
                .max_concurrent_operations
                .min(self.resource_limits.max_file_descriptors as usize)
                .max(1),
        }
    }

    /// Whether the audit session of a new peer must be checked.
    pub fn checks_audit_session(&self) -> bool {
        self.validate_audit_session && self.security_level >= SecurityLevel::Enhanced
    }

    /// Whether the peer must identify as `service_name`.
    pub fn checks_peer_identity(&self) -> bool {
        self.security_level >= SecurityLevel::Maximum
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_configuration_is_valid() {
        assert_eq!(IpcConfiguration::default().validate(), Ok(()));
    }

    #[test]
    fn empty_service_name_is_rejected() {
        let cfg = IpcConfiguration::for_service("");
        let err = cfg.validate().unwrap_err();
        assert_eq!(err.to_string(), "Service name cannot be empty");
        assert_eq!(err.field(), "service_name");
    }

    #[test]
    fn cpu_percentage_out_of_range_is_rejected() {
        let mut cfg = IpcConfiguration::default();
        cfg.resource_limits.max_cpu_percentage = 150.0;
        assert_eq!(
            cfg.validate().unwrap_err().to_string(),
            "CPU percentage must be between 0 and 100"
        );

        cfg.resource_limits.max_cpu_percentage = f64::NAN;
        assert!(matches!(cfg.validate(), Err(ConfigError::InvalidCpuPercentage(_))));
    }

    #[test]
    fn first_violation_wins_and_validation_is_idempotent() {
        let mut cfg = IpcConfiguration::for_service("");
        cfg.connection_timeout = Duration::ZERO;
        cfg.resource_limits.max_memory_bytes = 0;

        for _ in 0..3 {
            assert_eq!(cfg.validate(), Err(ConfigError::EmptyServiceName));
        }

        cfg.service_name = "backup-worker".into();
        assert_eq!(cfg.validate(), Err(ConfigError::InvalidConnectionTimeout));
        cfg.connection_timeout = Duration::from_secs(1);
        assert_eq!(cfg.validate(), Err(ConfigError::InvalidMemoryLimit));

        let valid = IpcConfiguration::default();
        assert_eq!(valid.validate(), Ok(()));
        assert_eq!(valid.validate(), Ok(()));
    }

    #[test]
    fn remaining_fields_are_checked() {
        let mut cfg = IpcConfiguration::for_service("backup worker");
        assert!(matches!(cfg.validate(), Err(ConfigError::InvalidServiceName(_))));

        cfg.service_name = "backup-worker".into();
        cfg.max_concurrent_operations = 0;
        assert_eq!(cfg.validate(), Err(ConfigError::InvalidConcurrency));

        cfg.max_concurrent_operations = 1;
        cfg.operation_timeout = Duration::ZERO;
        assert_eq!(cfg.validate(), Err(ConfigError::InvalidOperationTimeout));
    }

    #[test]
    fn pool_capacity_is_capped_by_descriptors() {
        let mut cfg = IpcConfiguration::default();
        assert_eq!(cfg.channel_capacity(), 1);

        cfg.connection_mode = ConnectionMode::Pool;
        cfg.max_concurrent_operations = 16;
        cfg.resource_limits.max_file_descriptors = 6;
        assert_eq!(cfg.channel_capacity(), 6);
    }

    #[test]
    fn security_checks_follow_the_level() {
        let mut cfg = IpcConfiguration::default();
        cfg.security_level = SecurityLevel::Standard;
        assert!(!cfg.checks_audit_session());

        cfg.security_level = SecurityLevel::Enhanced;
        assert!(cfg.checks_audit_session());
        assert!(!cfg.checks_peer_identity());

        cfg.security_level = SecurityLevel::Maximum;
        cfg.validate_audit_session = false;
        assert!(!cfg.checks_audit_session());
        assert!(cfg.checks_peer_identity());
    }

    #[test]
    fn toml_loading_validates() {
        let err = IpcConfiguration::from_toml_str("service_name = \"\"").unwrap_err();
        assert_eq!(err, ConfigError::EmptyServiceName);

        let err = IpcConfiguration::from_toml_str("unknown_key = 1").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));

        let cfg = IpcConfiguration::from_toml_str(
            "retry_delay = 250\nrequired_environment = [\"BACKUP_REPO\"]",
        )
        .unwrap();
        assert_eq!(cfg.retry_delay, Duration::from_millis(250));
        assert_eq!(cfg.required_environment, vec!["BACKUP_REPO".to_string()]);
    }

    #[test]
    fn serializes_durations_as_millis() {
        let text = toml::to_string(&IpcConfiguration::default()).unwrap();
        assert!(text.contains("operation_timeout = 300000"));
        assert_eq!(IpcConfiguration::from_toml_str(&text).unwrap(), IpcConfiguration::default());
    }
}
