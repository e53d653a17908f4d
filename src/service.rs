//! # Worker service.
//!
//! [`WorkerService`] composes the pieces a client of the backup worker needs:
//!
//! ```text
//! WorkerService
//!   ├─ Lifecycle              (state machine, transition lock, events)
//!   ├─ ConnectionSupervisor   (sandbox, admission, connect/handshake, dispatch)
//!   ├─ ErrorHandlingService   (strategy per error category around dispatch)
//!   └─ ErrorRecoveryService   (prioritised recovery operations)
//! ```
//!
//! `start` opens the first channel, `stop` and `reset` drop every channel.
//! [`execute`](WorkerService::execute) refuses work unless the service is
//! `running`, then dispatches under the error handler: a transient failure that
//! outlived the supervisor's own retries gets one more full dispatch round by
//! default.
//!
//! Unrecovered security or protocol failures, and an aborted recovery batch,
//! move a running service to `error`; only `reset()` leaves it.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::{ConfigError, Error, ErrorCategory, Result};
use crate::events::Bus;
use crate::ipc::{
    AdmissionPolicy, ConnectionSupervisor, Connector, IpcConfiguration, IpcOperation, IpcResult,
    SandboxPolicy,
};
use crate::lifecycle::{Lifecycle, ServiceLifecycle};
use crate::policies::ReconnectBackoff;
use crate::recovery::{
    ErrorHandlingService, ErrorRecoveryService, Metadata, Priority, RecoveryDefaults,
    RecoveryReport,
};

/// Builder for [`WorkerService`].
pub struct WorkerServiceBuilder<C> {
    config: IpcConfiguration,
    connector: C,
    sandbox: SandboxPolicy,
    admission: AdmissionPolicy,
    reconnect: ReconnectBackoff,
    defaults: Option<RecoveryDefaults>,
    bus: Option<Bus>,
    token: CancellationToken,
}

impl<C: Connector> WorkerServiceBuilder<C> {
    pub fn with_sandbox(mut self, sandbox: SandboxPolicy) -> Self {
        self.sandbox = sandbox;
        self
    }

    pub fn with_admission(mut self, policy: AdmissionPolicy) -> Self {
        self.admission = policy;
        self
    }

    pub fn with_reconnect_backoff(mut self, backoff: ReconnectBackoff) -> Self {
        self.reconnect = backoff;
        self
    }

    /// Replaces the built-in handler settings.
    ///
    /// Without this, transient failures get one extra dispatch round after
    /// `retry_delay`.
    pub fn with_recovery_defaults(mut self, defaults: RecoveryDefaults) -> Self {
        self.defaults = Some(defaults);
        self
    }

    /// Every component publishes on `bus`.
    pub fn with_bus(mut self, bus: Bus) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Cancelling `token` aborts queued, in-flight and retried work.
    pub fn with_token(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    /// Validates the configuration and wires the service together.
    pub fn build(self) -> Result<WorkerService, ConfigError> {
        self.config.validate()?;

        let mut lifecycle = Lifecycle::new(self.config.service_name.as_str())
            .with_lock_timeout(self.config.lock_timeout);
        let defaults = self.defaults.unwrap_or_else(|| RecoveryDefaults {
            transient_retries: 1,
            transient_delay: self.config.retry_delay,
            ..RecoveryDefaults::default()
        });
        let mut errors = ErrorHandlingService::new(defaults).with_token(self.token.clone());
        let mut recovery = ErrorRecoveryService::new();
        if let Some(bus) = &self.bus {
            lifecycle = lifecycle.with_bus(bus.clone());
            errors = errors.with_bus(bus.clone());
            recovery = recovery.with_bus(bus.clone());
        }
        let lifecycle = Arc::new(lifecycle);

        let mut supervisor =
            ConnectionSupervisor::builder(self.config, self.connector, lifecycle.clone())
                .with_sandbox(self.sandbox)
                .with_admission(self.admission)
                .with_reconnect_backoff(self.reconnect)
                .with_token(self.token.clone());
        if let Some(bus) = self.bus {
            supervisor = supervisor.with_bus(bus);
        }

        Ok(WorkerService {
            lifecycle,
            supervisor: supervisor.build()?,
            errors,
            recovery,
            token: self.token,
        })
    }
}

/// Client-side service for one backup worker.
pub struct WorkerService {
    lifecycle: Arc<Lifecycle>,
    supervisor: ConnectionSupervisor,
    errors: ErrorHandlingService,
    recovery: ErrorRecoveryService,
    token: CancellationToken,
}

impl WorkerService {
    /// Starts building a service that reaches its worker through `connector`.
    pub fn builder<C: Connector>(
        config: IpcConfiguration,
        connector: C,
    ) -> WorkerServiceBuilder<C> {
        WorkerServiceBuilder {
            config,
            connector,
            sandbox: SandboxPolicy::default(),
            admission: AdmissionPolicy::default(),
            reconnect: ReconnectBackoff::default(),
            defaults: None,
            bus: None,
            token: CancellationToken::new(),
        }
    }

    /// Runs `op` on the worker.
    ///
    /// Lifecycle refusals surface unchanged; every other failure passes through
    /// the [`ErrorHandlingService`] first.
    pub async fn execute(&self, op: IpcOperation) -> Result<IpcResult> {
        self.lifecycle.validate_usable("execute")?;

        let mut metadata = Metadata::new();
        metadata.insert("operation_id".into(), op.id().to_string());
        metadata.insert("operation_type".into(), op.op_type().as_str().into());

        let (supervisor, op) = (&self.supervisor, &op);
        let res = self
            .errors
            .run("dispatch", metadata, move |_| supervisor.dispatch(op.clone()))
            .await;
        if let Err(err) = &res {
            if matches!(err.category(), ErrorCategory::Security | ErrorCategory::Protocol) {
                self.lifecycle.mark_error(&err.to_string());
            }
        }
        res
    }

    /// Runs the registered recovery operations at or above `min_priority`.
    ///
    /// A failing `critical` operation moves a running service to `error`.
    pub async fn run_recovery(&self, min_priority: Priority) -> Result<RecoveryReport> {
        let res = self.recovery.run_recovery(min_priority).await;
        if let Err(err) = &res {
            self.lifecycle.mark_error(&format!("critical recovery failed: {err}"));
        }
        res
    }

    pub fn supervisor(&self) -> &ConnectionSupervisor {
        &self.supervisor
    }

    pub fn error_handling(&self) -> &ErrorHandlingService {
        &self.errors
    }

    pub fn recovery(&self) -> &ErrorRecoveryService {
        &self.recovery
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

#[async_trait]
impl ServiceLifecycle for WorkerService {
    fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    async fn on_start(&self) -> Result<(), Error> {
        self.supervisor.warm_up().await
    }

    async fn on_stop(&self) -> Result<(), Error> {
        self.supervisor.close().await;
        Ok(())
    }

    async fn on_reset(&self) -> Result<(), Error> {
        self.supervisor.close().await;
        Ok(())
    }
}
