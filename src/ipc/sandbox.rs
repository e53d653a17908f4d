//! # Sandbox policy.
//!
//! Capability object a service holds to decide which peers and which
//! operations are acceptable. Peer checks scale with the configured
//! [`SecurityLevel`](crate::SecurityLevel):
//!
//! | level      | audit session (if `validate_audit_session`) | peer service name |
//! |------------|---------------------------------------------|-------------------|
//! | `Standard` | -                                           | -                 |
//! | `Enhanced` | required                                    | -                 |
//! | `Maximum`  | required                                    | must match        |

use crate::error::IpcError;
use crate::ipc::channel::PeerInfo;
use crate::ipc::config::IpcConfiguration;
use crate::ipc::envelope::IpcOperation;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SandboxPolicy {
    trusted_uids: Vec<u32>,
}

impl SandboxPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts audit sessions to the given user ids. Empty means any user.
    pub fn trust_uid(mut self, uid: u32) -> Self {
        self.trusted_uids.push(uid);
        self
    }

    pub fn trusted_uids(&self) -> &[u32] {
        &self.trusted_uids
    }

    /// Verifies a freshly connected peer; failures are [`IpcError::AccessDenied`].
    pub fn verify_peer(&self, cfg: &IpcConfiguration, peer: &PeerInfo) -> Result<(), IpcError> {
        if cfg.checks_audit_session() {
            let session = peer.audit_session.ok_or_else(|| {
                IpcError::AccessDenied("transport reported no audit session for the worker".into())
            })?;
            if let Some(pid) = session.pid {
                if pid != peer.pid {
                    return Err(IpcError::AccessDenied(format!(
                        "worker declared pid {} but the audit session belongs to pid {pid}",
                        peer.pid
                    )));
                }
            }
            if !self.trusted_uids.is_empty() && !self.trusted_uids.contains(&session.uid) {
                return Err(IpcError::AccessDenied(format!(
                    "worker runs as untrusted uid {}",
                    session.uid
                )));
            }
        }

        if cfg.checks_peer_identity() && peer.service_name != cfg.service_name {
            return Err(IpcError::AccessDenied(format!(
                "peer identifies as '{}', expected '{}'",
                peer.service_name, cfg.service_name
            )));
        }
        Ok(())
    }

    /// Checks an operation before dispatch.
    pub fn validate_operation(
        &self,
        cfg: &IpcConfiguration,
        op: &IpcOperation,
    ) -> Result<(), IpcError> {
        op.validate(&cfg.required_environment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::channel::AuditSession;
    use crate::ipc::config::SecurityLevel;

    fn peer(name: &str, session: Option<AuditSession>) -> PeerInfo {
        PeerInfo {
            service_name: name.into(),
            pid: 900,
            audit_session: session,
        }
    }

    fn cfg(level: SecurityLevel) -> IpcConfiguration {
        IpcConfiguration {
            security_level: level,
            ..IpcConfiguration::for_service("backup-worker")
        }
    }

    #[test]
    fn standard_accepts_any_peer() {
        let policy = SandboxPolicy::new();
        assert_eq!(policy.verify_peer(&cfg(SecurityLevel::Standard), &peer("other", None)), Ok(()));
    }

    #[test]
    fn enhanced_requires_a_matching_audit_session() {
        let policy = SandboxPolicy::new().trust_uid(501);
        let cfg = cfg(SecurityLevel::Enhanced);

        assert!(policy.verify_peer(&cfg, &peer("other", None)).is_err());
        assert!(policy
            .verify_peer(&cfg, &peer("other", Some(AuditSession { uid: 501, pid: Some(1) })))
            .is_err());
        assert!(policy
            .verify_peer(&cfg, &peer("other", Some(AuditSession { uid: 0, pid: None })))
            .is_err());
        assert_eq!(
            policy.verify_peer(
                &cfg,
                &peer("other", Some(AuditSession { uid: 501, pid: Some(900) }))
            ),
            Ok(())
        );
    }

    #[test]
    fn maximum_also_checks_the_service_name() {
        let policy = SandboxPolicy::new();
        let cfg = cfg(SecurityLevel::Maximum);
        let session = Some(AuditSession { uid: 501, pid: None });

        assert!(matches!(
            policy.verify_peer(&cfg, &peer("impostor", session)),
            Err(IpcError::AccessDenied(_))
        ));
        assert_eq!(policy.verify_peer(&cfg, &peer("backup-worker", session)), Ok(()));
    }
}
