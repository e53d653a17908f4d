//! # Connection supervisor.
//!
//! Gates, bounds and retries every operation sent to the worker.
//!
//! ## Dispatch flow
//! ```text
//! dispatch(op)
//!   ├─► lifecycle.validate_usable        (service must be running)
//!   ├─► sandbox.validate_operation       (path / NUL / required env)
//!   ├─► admission.admit                  (Queue waits, FailFast rejects)
//!   ├─► [single] submission-order lock
//!   ├─► lifecycle.validate_usable        (again: the service may have stopped meanwhile)
//!   └─► with_retry_if(1 + max_retry_attempts, retry_delay, transient)
//!          └─► with_timeout(operation_timeout)
//!                 └─► exchange
//!                       ├─ take channel (idle one, or open: backoff → connect → handshake → verify_peer)
//!                       ├─ send Operation, recv Result, check identifier
//!                       └─ Ok → keep channel │ Err/timeout → channel discarded
//! ```
//!
//! ## Rules
//! - **Single mode**: one channel, operations processed strictly in submission order.
//! - **Pool mode**: at most `channel_capacity()` channels; results correlate by identifier only.
//! - A channel involved in a failed or timed-out attempt is never reused.
//! - Consecutive connect failures grow the reconnect delay; a successful connect resets it.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use tokio::sync::{Mutex, Semaphore};
use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::error::{ConfigError, Error, IpcError, LifecycleError, OperationError, Result};
use crate::events::{Bus, Event, EventKind};
use crate::executor::{with_retry_if, with_timeout};
use crate::ipc::admission::{Admission, AdmissionPolicy};
use crate::ipc::channel::{Channel, Connector, handshake};
use crate::ipc::codec::{ClientHello, Message};
use crate::ipc::config::{ConnectionMode, IpcConfiguration};
use crate::ipc::envelope::{IpcOperation, IpcResult};
use crate::ipc::sandbox::SandboxPolicy;
use crate::lifecycle::{Lifecycle, ServiceState};
use crate::policies::ReconnectBackoff;

/// Builder for [`ConnectionSupervisor`].
pub struct SupervisorBuilder {
    config: IpcConfiguration,
    connector: Arc<dyn Connector>,
    lifecycle: Arc<Lifecycle>,
    sandbox: SandboxPolicy,
    admission: AdmissionPolicy,
    reconnect: ReconnectBackoff,
    bus: Option<Bus>,
    token: Option<CancellationToken>,
}

impl SupervisorBuilder {
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

    pub fn with_bus(mut self, bus: Bus) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Cancelling `token` aborts queued and in-flight dispatches.
    pub fn with_token(mut self, token: CancellationToken) -> Self {
        self.token = Some(token);
        self
    }

    /// Validates the configuration and builds the supervisor.
    pub fn build(self) -> Result<ConnectionSupervisor, ConfigError> {
        self.config.validate()?;
        let capacity = self.config.channel_capacity();
        let admission = Admission::new(self.admission, self.config.max_concurrent_operations);

        Ok(ConnectionSupervisor {
            config: Arc::new(self.config),
            connector: self.connector,
            lifecycle: self.lifecycle,
            sandbox: self.sandbox,
            admission,
            order: Mutex::new(()),
            single: Mutex::new(None),
            idle: StdMutex::new(Vec::with_capacity(capacity)),
            pool_slots: Arc::new(Semaphore::new(capacity)),
            reconnect: self.reconnect,
            connect_failures: AtomicU32::new(0),
            ever_connected: AtomicBool::new(false),
            token: self.token.unwrap_or_default(),
            bus: self.bus,
        })
    }
}

/// Owns the channels to one worker and dispatches operations over them.
pub struct ConnectionSupervisor {
    config: Arc<IpcConfiguration>,
    connector: Arc<dyn Connector>,
    lifecycle: Arc<Lifecycle>,
    sandbox: SandboxPolicy,
    admission: Admission,
    /// Held for a whole dispatch in single mode.
    order: Mutex<()>,
    single: Mutex<Option<Box<dyn Channel>>>,
    idle: StdMutex<Vec<Box<dyn Channel>>>,
    pool_slots: Arc<Semaphore>,
    reconnect: ReconnectBackoff,
    connect_failures: AtomicU32,
    ever_connected: AtomicBool,
    token: CancellationToken,
    bus: Option<Bus>,
}

impl ConnectionSupervisor {
    /// Starts building a supervisor gated on `lifecycle`.
    pub fn builder(
        config: IpcConfiguration,
        connector: impl Connector,
        lifecycle: Arc<Lifecycle>,
    ) -> SupervisorBuilder {
        SupervisorBuilder {
            config,
            connector: Arc::new(connector),
            lifecycle,
            sandbox: SandboxPolicy::default(),
            admission: AdmissionPolicy::default(),
            reconnect: ReconnectBackoff::default(),
            bus: None,
            token: None,
        }
    }

    pub fn config(&self) -> &IpcConfiguration {
        &self.config
    }

    pub fn sandbox(&self) -> &SandboxPolicy {
        &self.sandbox
    }

    pub fn admission_policy(&self) -> AdmissionPolicy {
        self.admission.policy()
    }

    /// Operations currently admitted.
    pub fn in_flight(&self) -> usize {
        self.admission.in_flight()
    }

    /// Pooled channels waiting for work.
    pub fn idle_channels(&self) -> usize {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Sends `op` to the worker and returns its result envelope.
    ///
    /// Transient failures (channel errors, attempt timeouts) are retried up to
    /// `max_retry_attempts` times; every other failure is returned at once.
    pub async fn dispatch(&self, op: IpcOperation) -> Result<IpcResult> {
        self.lifecycle.validate_usable("dispatch")?;
        let id = op.id().to_string();

        if let Err(err) = self.sandbox.validate_operation(&self.config, &op) {
            self.reject(&id, &err);
            return Err(err.into());
        }

        let _slot = match self.admission.admit(&id, &self.token).await {
            Ok(permit) => permit,
            Err(err) => {
                self.reject(&id, &err);
                return Err(err);
            }
        };

        let _order = match self.config.connection_mode {
            ConnectionMode::Single => Some(tokio::select! {
                guard = self.order.lock() => guard,
                _ = self.token.cancelled() => {
                    return Err(OperationError::Cancelled { operation: id.clone() }.into());
                }
            }),
            ConnectionMode::Pool => None,
        };

        // The service may have stopped while this call waited its turn.
        if let Err(err) = self.lifecycle.validate_usable("dispatch") {
            self.reject(&id, &err);
            return Err(err.into());
        }

        let attempts = AtomicU32::new(0);
        let (op, id, attempts) = (&op, id.as_str(), &attempts);
        let timeout = self.config.operation_timeout;

        let res = with_retry_if(
            self.config.total_attempts(),
            self.config.retry_delay,
            id,
            &self.token,
            Error::is_transient,
            move |token: CancellationToken| async move {
                let n = attempts.fetch_add(1, Ordering::Relaxed) + 1;
                let res = with_timeout(timeout, id, &token, |token| self.exchange(op, token)).await;
                if let Err(err) = &res {
                    let mut ev = self
                        .event(EventKind::DispatchFailed, id)
                        .with_attempt(n)
                        .with_reason(err.to_string());
                    if matches!(err, Error::Operation(OperationError::Timeout { .. })) {
                        ev = ev.with_timeout(timeout);
                    }
                    self.publish(ev);
                }
                res
            },
        )
        .await;

        if res.is_ok() {
            self.publish(
                self.event(EventKind::DispatchCompleted, id)
                    .with_attempt(attempts.load(Ordering::Relaxed)),
            );
        }
        res
    }

    /// Opens a channel ahead of the first dispatch.
    pub async fn warm_up(&self) -> Result<()> {
        match self.config.connection_mode {
            ConnectionMode::Single => {
                let mut slot = self.single.lock().await;
                if slot.is_none() {
                    let channel = self.open(&self.token).await?;
                    if self.ensure_connectable().is_ok() {
                        *slot = Some(channel);
                    }
                }
            }
            ConnectionMode::Pool => {
                if self.idle_channels() == 0 {
                    let _slot = self.pool_slot().await?;
                    let channel = self.open(&self.token).await?;
                    if self.ensure_connectable().is_ok() {
                        self.idle.lock().unwrap_or_else(PoisonError::into_inner).push(channel);
                    }
                }
            }
        }
        Ok(())
    }

    /// Drops every open channel and forgets connection history.
    pub async fn close(&self) {
        self.single.lock().await.take();
        self.idle.lock().unwrap_or_else(PoisonError::into_inner).clear();
        self.ever_connected.store(false, Ordering::Relaxed);
        self.connect_failures.store(0, Ordering::Relaxed);
    }

    async fn exchange(&self, op: &IpcOperation, token: CancellationToken) -> Result<IpcResult> {
        match self.config.connection_mode {
            ConnectionMode::Single => {
                let mut slot = self.single.lock().await;
                let mut channel = match slot.take() {
                    Some(channel) => channel,
                    None => self.open(&token).await?,
                };
                let res = round_trip(channel.as_mut(), op).await;
                if res.is_ok() && self.ensure_connectable().is_ok() {
                    *slot = Some(channel);
                }
                self.settle(res)
            }
            ConnectionMode::Pool => {
                let _slot = self.pool_slot().await?;
                let idle = self.idle.lock().unwrap_or_else(PoisonError::into_inner).pop();
                let mut channel = match idle {
                    Some(channel) => channel,
                    None => self.open(&token).await?,
                };
                let res = round_trip(channel.as_mut(), op).await;
                if res.is_ok() && self.ensure_connectable().is_ok() {
                    self.idle.lock().unwrap_or_else(PoisonError::into_inner).push(channel);
                }
                self.settle(res)
            }
        }
    }

    fn settle(&self, res: std::result::Result<IpcResult, IpcError>) -> Result<IpcResult> {
        res.map_err(|err| {
            self.publish(
                Event::new(EventKind::ConnectionDropped)
                    .with_service(self.config.service_name.as_str())
                    .with_reason(err.to_string()),
            );
            err.into()
        })
    }

    async fn pool_slot(&self) -> Result<tokio::sync::SemaphorePermit<'_>> {
        self.pool_slots
            .acquire()
            .await
            .map_err(|_| Error::from(IpcError::ServiceUnavailable("supervisor is closed".into())))
    }

    /// Connects, performs the handshake and verifies the peer.
    async fn open(&self, token: &CancellationToken) -> Result<Box<dyn Channel>> {
        self.ensure_connectable()?;
        if self.config.connection_mode == ConnectionMode::Single
            && !self.config.auto_reconnect
            && self.ever_connected.load(Ordering::Relaxed)
        {
            return Err(IpcError::ServiceUnavailable(
                "connection to the worker was lost and auto_reconnect is disabled".into(),
            )
            .into());
        }

        let failures = self.connect_failures.load(Ordering::Relaxed);
        let delay = self.reconnect.delay_after(failures);
        if !delay.is_zero() {
            self.publish(
                Event::new(EventKind::ReconnectScheduled)
                    .with_service(self.config.service_name.as_str())
                    .with_attempt(failures)
                    .with_delay(delay),
            );
            tokio::select! {
                _ = time::sleep(delay) => {}
                _ = token.cancelled() => {
                    return Err(OperationError::Cancelled { operation: "connect".into() }.into());
                }
            }
        }

        let hello = ClientHello {
            service_name: self.config.service_name.clone(),
            security_level: self.config.security_level,
            limits: self.config.resource_limits,
        };
        let connected = with_timeout(self.config.connection_timeout, "connect", token, |_| async {
            let mut channel = self.connector.connect().await?;
            let peer = handshake(channel.as_mut(), &hello).await?;
            Ok::<_, Error>((channel, peer))
        })
        .await;

        let (channel, peer) = match connected {
            Ok(pair) => pair,
            Err(err) => {
                self.connect_failures.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    endpoint = %self.connector.endpoint(),
                    error = %err,
                    "connect to worker failed"
                );
                return Err(err);
            }
        };

        if let Err(err) = self.sandbox.verify_peer(&self.config, &peer) {
            self.publish(
                Event::new(EventKind::AccessDenied)
                    .with_service(self.config.service_name.as_str())
                    .with_reason(err.to_string()),
            );
            return Err(err.into());
        }

        self.connect_failures.store(0, Ordering::Relaxed);
        self.ever_connected.store(true, Ordering::Relaxed);
        self.publish(
            Event::new(EventKind::Connected).with_service(self.config.service_name.as_str()),
        );
        Ok(channel)
    }

    /// Channels are opened and kept only while the owner is starting or running.
    fn ensure_connectable(&self) -> std::result::Result<(), LifecycleError> {
        let state = self.lifecycle.state();
        if matches!(state, ServiceState::Starting | ServiceState::Running) {
            return Ok(());
        }
        Err(LifecycleError::InvalidState {
            service: self.lifecycle.service().to_string(),
            operation: "connect".into(),
            state,
        })
    }

    fn reject(&self, id: &str, err: &impl std::fmt::Display) {
        self.publish(self.event(EventKind::DispatchRejected, id).with_reason(err.to_string()));
    }

    fn event(&self, kind: EventKind, id: &str) -> Event {
        Event::new(kind)
            .with_service(self.config.service_name.as_str())
            .with_operation(id)
    }

    fn publish(&self, ev: Event) {
        if let Some(bus) = &self.bus {
            bus.publish(ev);
        }
    }
}

/// Sends one operation and waits for its result on the same channel.
async fn round_trip(
    channel: &mut dyn Channel,
    op: &IpcOperation,
) -> std::result::Result<IpcResult, IpcError> {
    channel.send(&Message::Operation(op.clone())).await?;
    match channel.recv().await? {
        Message::Result(res) if res.id() == op.id() => Ok(res),
        Message::Result(res) => Err(IpcError::InvalidResponse(format!(
            "result {} does not answer operation {}",
            res.id(),
            op.id()
        ))),
        other => Err(IpcError::InvalidResponse(format!(
            "expected a result frame, got {:?}",
            other.kind()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::channel::{AuditSession, StreamChannel};
    use crate::ipc::codec::{WorkerHello, read_message, write_message};
    use crate::ipc::config::SecurityLevel;
    use crate::ipc::envelope::{OperationId, OperationType};
    use crate::lifecycle::ServiceLifecycle;
    use async_trait::async_trait;
    use std::time::Duration;

    #[derive(Clone, Copy)]
    enum Reply {
        Echo,
        EchoAfter(Duration),
        Hang,
        HangUp,
        WrongId,
    }

    type Script = Arc<dyn Fn(u32) -> Reply + Send + Sync>;

    #[derive(Clone)]
    struct FakeWorker {
        name: &'static str,
        connects: Arc<AtomicU32>,
        calls: Arc<AtomicU32>,
        arrivals: Arc<StdMutex<Vec<String>>>,
        script: Script,
    }

    impl FakeWorker {
        fn new(script: impl Fn(u32) -> Reply + Send + Sync + 'static) -> Self {
            Self {
                name: "backup-worker",
                connects: Arc::default(),
                calls: Arc::default(),
                arrivals: Arc::default(),
                script: Arc::new(script),
            }
        }

        fn connects(&self) -> u32 {
            self.connects.load(Ordering::SeqCst)
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Connector for FakeWorker {
        async fn connect(&self) -> std::result::Result<Box<dyn Channel>, IpcError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            let (client, mut worker) = tokio::io::duplex(64 * 1024);
            let this = self.clone();

            tokio::spawn(async move {
                let Ok(Message::ClientHello(_)) = read_message(&mut worker).await else {
                    return;
                };
                let hello = WorkerHello {
                    service_name: this.name.into(),
                    pid: 77,
                };
                if write_message(&mut worker, &Message::WorkerHello(hello)).await.is_err() {
                    return;
                }
                while let Ok(Message::Operation(op)) = read_message(&mut worker).await {
                    this.arrivals.lock().unwrap().push(op.arguments().join(" "));
                    let n = this.calls.fetch_add(1, Ordering::SeqCst) + 1;
                    let id = match (this.script)(n) {
                        Reply::Echo => op.id(),
                        Reply::EchoAfter(delay) => {
                            time::sleep(delay).await;
                            op.id()
                        }
                        Reply::Hang => std::future::pending().await,
                        Reply::HangUp => return,
                        Reply::WrongId => OperationId::new(),
                    };
                    let res = IpcResult::success(id, op.arguments().join(" ").into_bytes());
                    if write_message(&mut worker, &Message::Result(res)).await.is_err() {
                        return;
                    }
                }
            });

            let session = AuditSession {
                uid: 501,
                pid: Some(77),
            };
            Ok(Box::new(StreamChannel::new(client).with_audit_session(session)))
        }
    }

    struct Owner(Arc<Lifecycle>);

    #[async_trait]
    impl ServiceLifecycle for Owner {
        fn lifecycle(&self) -> &Lifecycle {
            &self.0
        }
    }

    fn config() -> IpcConfiguration {
        IpcConfiguration {
            max_retry_attempts: 2,
            retry_delay: Duration::from_millis(10),
            operation_timeout: Duration::from_secs(1),
            connection_timeout: Duration::from_secs(1),
            ..IpcConfiguration::for_service("backup-worker")
        }
    }

    fn no_backoff() -> ReconnectBackoff {
        ReconnectBackoff {
            first: Duration::ZERO,
            ..ReconnectBackoff::default()
        }
    }

    async fn running_lifecycle() -> Arc<Lifecycle> {
        let lifecycle = Arc::new(Lifecycle::new("backup-worker"));
        let owner = Owner(lifecycle.clone());
        owner.initialize().await.unwrap();
        owner.start().await.unwrap();
        lifecycle
    }

    async fn running(cfg: IpcConfiguration, worker: &FakeWorker) -> ConnectionSupervisor {
        ConnectionSupervisor::builder(cfg, worker.clone(), running_lifecycle().await)
            .with_reconnect_backoff(no_backoff())
            .build()
            .unwrap()
    }

    fn snapshot(arg: &str) -> IpcOperation {
        IpcOperation::builder(OperationType::Command).args(["snapshot", arg]).build()
    }

    #[tokio::test]
    async fn refuses_dispatch_unless_running() {
        let worker = FakeWorker::new(|_| Reply::Echo);
        let idle = Arc::new(Lifecycle::new("backup-worker"));
        let sup = ConnectionSupervisor::builder(config(), worker.clone(), idle)
            .build()
            .unwrap();

        let err = sup.dispatch(snapshot("a")).await.unwrap_err();
        assert!(matches!(err, Error::Lifecycle(LifecycleError::InvalidState { .. })));
        assert_eq!(worker.connects(), 0);
    }

    #[tokio::test]
    async fn build_validates_configuration() {
        let worker = FakeWorker::new(|_| Reply::Echo);
        let res = ConnectionSupervisor::builder(
            IpcConfiguration::for_service(""),
            worker,
            Arc::new(Lifecycle::new("x")),
        )
        .build();
        assert!(matches!(res, Err(ConfigError::EmptyServiceName)));
    }

    #[tokio::test]
    async fn single_mode_reuses_one_channel() {
        let worker = FakeWorker::new(|_| Reply::Echo);
        let sup = running(config(), &worker).await;

        for tag in ["a", "b", "c"] {
            let op = snapshot(tag);
            let res = sup.dispatch(op.clone()).await.unwrap();
            assert_eq!(res.id(), op.id());
            assert_eq!(res.payload(), format!("snapshot {tag}").as_bytes());
        }
        assert_eq!(worker.connects(), 1);
    }

    #[tokio::test]
    async fn dropped_channel_is_replaced_and_the_attempt_retried() {
        let worker = FakeWorker::new(|n| if n == 1 { Reply::HangUp } else { Reply::Echo });
        let sup = running(config(), &worker).await;

        let res = sup.dispatch(snapshot("a")).await.unwrap();
        assert!(res.is_success());
        assert_eq!(worker.calls(), 2);
        assert_eq!(worker.connects(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_attempt_times_out_and_is_retried_on_a_fresh_channel() {
        let worker = FakeWorker::new(|n| if n == 1 { Reply::Hang } else { Reply::Echo });
        let sup = running(config(), &worker).await;

        let res = sup.dispatch(snapshot("a")).await.unwrap();
        assert!(res.is_success());
        assert_eq!(worker.connects(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_timeouts_exhaust_the_attempts() {
        let worker = FakeWorker::new(|_| Reply::Hang);
        let sup = running(config(), &worker).await;

        let err = sup.dispatch(snapshot("a")).await.unwrap_err();
        assert!(matches!(err, Error::Operation(OperationError::Timeout { .. })));
        assert_eq!(worker.calls(), 3);
    }

    #[tokio::test]
    async fn mismatched_result_is_an_invalid_response() {
        let worker = FakeWorker::new(|_| Reply::WrongId);
        let sup = running(config(), &worker).await;

        let err = sup.dispatch(snapshot("a")).await.unwrap_err();
        assert!(matches!(err, Error::Ipc(IpcError::InvalidResponse(_))));
        assert_eq!(worker.calls(), 1, "protocol errors are not retried");
    }

    #[tokio::test]
    async fn maximum_security_rejects_an_impostor() {
        let mut worker = FakeWorker::new(|_| Reply::Echo);
        worker.name = "impostor";
        let cfg = IpcConfiguration {
            security_level: SecurityLevel::Maximum,
            ..config()
        };
        let bus = Bus::new(32);
        let mut rx = bus.subscribe();
        let sup = ConnectionSupervisor::builder(cfg, worker.clone(), running_lifecycle().await)
            .with_bus(bus)
            .build()
            .unwrap();

        let err = sup.dispatch(snapshot("a")).await.unwrap_err();
        assert!(matches!(err, Error::Ipc(IpcError::AccessDenied(_))));
        assert_eq!(worker.connects(), 1);
        assert_eq!(worker.calls(), 0);

        let mut kinds = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            kinds.push(ev.kind);
        }
        assert!(kinds.contains(&EventKind::AccessDenied));
        assert!(kinds.contains(&EventKind::DispatchFailed));
    }

    #[tokio::test]
    async fn invalid_operation_never_reaches_the_worker() {
        let worker = FakeWorker::new(|_| Reply::Echo);
        let cfg = IpcConfiguration {
            required_environment: vec!["BACKUP_REPO".into()],
            ..config()
        };
        let sup = running(cfg, &worker).await;

        let err = sup.dispatch(snapshot("a")).await.unwrap_err();
        assert!(matches!(err, Error::Ipc(IpcError::MissingEnvironment(_))));
        assert_eq!(worker.connects(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn fail_fast_admission_rejects_excess_requests() {
        let worker = FakeWorker::new(|_| Reply::EchoAfter(Duration::from_millis(500)));
        let cfg = IpcConfiguration {
            max_concurrent_operations: 1,
            ..config()
        };
        let sup = Arc::new(
            ConnectionSupervisor::builder(cfg, worker.clone(), running_lifecycle().await)
                .with_admission(AdmissionPolicy::FailFast)
                .build()
                .unwrap(),
        );

        let first = {
            let sup = sup.clone();
            tokio::spawn(async move { sup.dispatch(snapshot("a")).await })
        };
        while sup.in_flight() == 0 {
            tokio::task::yield_now().await;
        }

        let err = sup.dispatch(snapshot("b")).await.unwrap_err();
        assert!(matches!(err, Error::Ipc(IpcError::ResourceUnavailable(_))));
        assert!(first.await.unwrap().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn pool_is_capped_by_descriptor_limit() {
        let worker = FakeWorker::new(|_| Reply::EchoAfter(Duration::from_millis(200)));
        let mut cfg = config();
        cfg.connection_mode = ConnectionMode::Pool;
        cfg.max_concurrent_operations = 4;
        cfg.resource_limits.max_file_descriptors = 2;
        let sup = Arc::new(running(cfg, &worker).await);

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let sup = sup.clone();
                tokio::spawn(async move { sup.dispatch(snapshot(&i.to_string())).await })
            })
            .collect();
        for h in handles {
            assert!(h.await.unwrap().is_ok());
        }

        assert_eq!(worker.connects(), 2);
        assert_eq!(sup.idle_channels(), 2);
    }

    #[tokio::test]
    async fn lost_channel_without_auto_reconnect_is_unavailable() {
        let worker = FakeWorker::new(|n| if n == 1 { Reply::HangUp } else { Reply::Echo });
        let cfg = IpcConfiguration {
            auto_reconnect: false,
            ..config()
        };
        let sup = running(cfg, &worker).await;
        sup.warm_up().await.unwrap();

        let err = sup.dispatch(snapshot("a")).await.unwrap_err();
        assert!(matches!(err, Error::Ipc(IpcError::ServiceUnavailable(_))));
        assert_eq!(worker.connects(), 1);

        sup.close().await;
        assert!(sup.dispatch(snapshot("b")).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_backoff_grows_with_consecutive_failures() {
        struct Refusing(Arc<AtomicU32>);

        #[async_trait]
        impl Connector for Refusing {
            async fn connect(&self) -> std::result::Result<Box<dyn Channel>, IpcError> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Err(IpcError::ServiceUnavailable("socket missing".into()))
            }
        }

        let connects = Arc::new(AtomicU32::new(0));
        let cfg = IpcConfiguration {
            operation_timeout: Duration::from_secs(10),
            ..config()
        };
        let lifecycle = running_lifecycle().await;
        let sup = ConnectionSupervisor::builder(cfg, Refusing(connects.clone()), lifecycle)
            .with_reconnect_backoff(ReconnectBackoff {
                first: Duration::from_secs(1),
                max: Duration::from_secs(60),
                factor: 2.0,
                jitter: crate::policies::JitterPolicy::None,
            })
            .build()
            .unwrap();

        let started = time::Instant::now();
        let err = sup.dispatch(snapshot("a")).await.unwrap_err();

        assert!(matches!(err, Error::Ipc(IpcError::ServiceUnavailable(_))));
        assert_eq!(connects.load(Ordering::SeqCst), 3);
        // reconnect waits 1s + 2s, retry sleeps 10ms + 20ms
        assert_eq!(started.elapsed(), Duration::from_millis(3030));
    }

    #[tokio::test(start_paused = true)]
    async fn single_mode_serves_operations_in_submission_order() {
        let worker = FakeWorker::new(|_| Reply::EchoAfter(Duration::from_millis(50)));
        let sup = Arc::new(running(config(), &worker).await);

        let mut handles = Vec::new();
        for i in 0..6 {
            let sup = sup.clone();
            handles.push(tokio::spawn(async move { sup.dispatch(snapshot(&i.to_string())).await }));
            time::sleep(Duration::from_millis(1)).await;
        }
        for h in handles {
            assert!(h.await.unwrap().is_ok());
        }

        let expected: Vec<String> = (0..6).map(|i| format!("snapshot {i}")).collect();
        assert_eq!(*worker.arrivals.lock().unwrap(), expected);
        assert_eq!(worker.connects(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn queued_dispatch_is_refused_once_the_owner_stops() {
        let worker = FakeWorker::new(|_| Reply::EchoAfter(Duration::from_millis(500)));
        let lifecycle = running_lifecycle().await;
        let sup = Arc::new(
            ConnectionSupervisor::builder(config(), worker.clone(), lifecycle.clone())
                .with_reconnect_backoff(no_backoff())
                .build()
                .unwrap(),
        );

        let first = {
            let sup = sup.clone();
            tokio::spawn(async move { sup.dispatch(snapshot("a")).await })
        };
        time::sleep(Duration::from_millis(10)).await;
        let queued = {
            let sup = sup.clone();
            tokio::spawn(async move { sup.dispatch(snapshot("b")).await })
        };
        time::sleep(Duration::from_millis(10)).await;

        Owner(lifecycle.clone()).stop().await.unwrap();
        sup.close().await;

        assert!(first.await.unwrap().is_ok());
        let err = queued.await.unwrap().unwrap_err();
        assert!(matches!(
            err,
            Error::Lifecycle(LifecycleError::InvalidState {
                state: ServiceState::Stopped,
                ..
            })
        ));
        assert_eq!(worker.connects(), 1);
        assert_eq!(worker.calls(), 1);
        assert!(sup.single.lock().await.is_none());
    }

    #[tokio::test]
    async fn no_channel_is_opened_for_a_stopped_owner() {
        let worker = FakeWorker::new(|_| Reply::Echo);
        let lifecycle = running_lifecycle().await;
        let sup = ConnectionSupervisor::builder(config(), worker.clone(), lifecycle.clone())
            .build()
            .unwrap();
        Owner(lifecycle).stop().await.unwrap();

        let err = sup.warm_up().await.unwrap_err();
        assert!(matches!(err, Error::Lifecycle(LifecycleError::InvalidState { .. })));
        assert_eq!(worker.connects(), 0);
    }
}
