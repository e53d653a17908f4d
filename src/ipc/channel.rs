//! # Channels to the worker.
//!
//! A [`Connector`] opens raw [`Channel`]s; [`handshake`] turns a raw channel
//! into a verified peer by exchanging hellos.
//!
//! ```text
//! Connector::connect() ──► Box<dyn Channel>
//!                              │ handshake(ClientHello)
//!                              ▼
//!                          WorkerHello ──► PeerInfo { service_name, pid, audit_session }
//! ```

use std::fmt;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::IpcError;
use crate::ipc::codec::{self, ClientHello, Message};

/// Credentials of the peer process as reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuditSession {
    pub uid: u32,
    pub pid: Option<u32>,
}

/// Identity of a connected worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    /// Service name declared in the worker's hello.
    pub service_name: String,
    /// Process id declared in the worker's hello.
    pub pid: u32,
    /// Transport-level credentials, when the transport can report them.
    pub audit_session: Option<AuditSession>,
}

/// Bidirectional, framed message channel.
#[async_trait]
pub trait Channel: Send {
    async fn send(&mut self, message: &Message) -> Result<(), IpcError>;

    async fn recv(&mut self) -> Result<Message, IpcError>;

    /// Credentials of the process on the other end, if known.
    fn audit_session(&self) -> Option<AuditSession> {
        None
    }
}

/// Factory for channels to one worker.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self) -> Result<Box<dyn Channel>, IpcError>;

    /// Endpoint description for logs.
    fn endpoint(&self) -> String {
        std::any::type_name::<Self>().to_string()
    }
}

/// Sends `hello` and waits for the worker's hello.
pub async fn handshake(
    channel: &mut dyn Channel,
    hello: &ClientHello,
) -> Result<PeerInfo, IpcError> {
    channel.send(&Message::ClientHello(hello.clone())).await?;
    match channel.recv().await? {
        Message::WorkerHello(worker) => Ok(PeerInfo {
            service_name: worker.service_name,
            pid: worker.pid,
            audit_session: channel.audit_session(),
        }),
        other => Err(IpcError::InvalidResponse(format!(
            "expected worker hello, got {:?} frame",
            other.kind()
        ))),
    }
}

/// [`Channel`] over any async byte stream.
pub struct StreamChannel<S> {
    stream: S,
    audit_session: Option<AuditSession>,
}

impl<S> StreamChannel<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            audit_session: None,
        }
    }

    /// Attaches credentials obtained out of band.
    pub fn with_audit_session(mut self, session: AuditSession) -> Self {
        self.audit_session = Some(session);
        self
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}

impl<S> fmt::Debug for StreamChannel<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamChannel")
            .field("audit_session", &self.audit_session)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<S> Channel for StreamChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, message: &Message) -> Result<(), IpcError> {
        codec::write_message(&mut self.stream, message).await
    }

    async fn recv(&mut self) -> Result<Message, IpcError> {
        codec::read_message(&mut self.stream).await
    }

    fn audit_session(&self) -> Option<AuditSession> {
        self.audit_session
    }
}

#[cfg(unix)]
pub use unix::UnixConnector;

#[cfg(unix)]
mod unix {
    use std::path::{Path, PathBuf};

    use async_trait::async_trait;
    use tokio::net::UnixStream;

    use super::{AuditSession, Channel, Connector, StreamChannel};
    use crate::error::IpcError;

    /// Connects to a worker listening on a Unix domain socket.
    ///
    /// The peer's credentials become the channel's audit session.
    #[derive(Debug, Clone)]
    pub struct UnixConnector {
        path: PathBuf,
    }

    impl UnixConnector {
        pub fn new(path: impl Into<PathBuf>) -> Self {
            Self { path: path.into() }
        }

        pub fn path(&self) -> &Path {
            &self.path
        }
    }

    #[async_trait]
    impl Connector for UnixConnector {
        async fn connect(&self) -> Result<Box<dyn Channel>, IpcError> {
            let stream = UnixStream::connect(&self.path).await.map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound | std::io::ErrorKind::ConnectionRefused => {
                    IpcError::ServiceUnavailable(format!("{}: {e}", self.path.display()))
                }
                std::io::ErrorKind::PermissionDenied => {
                    IpcError::AccessDenied(format!("{}: {e}", self.path.display()))
                }
                _ => IpcError::ConnectionFailed(format!("{}: {e}", self.path.display())),
            })?;

            let session = stream.peer_cred().ok().map(|cred| AuditSession {
                uid: cred.uid(),
                pid: cred.pid().and_then(|p| u32::try_from(p).ok()),
            });
            let channel = StreamChannel::new(stream);
            Ok(Box::new(match session {
                Some(session) => channel.with_audit_session(session),
                None => channel,
            }))
        }

        fn endpoint(&self) -> String {
            self.path.display().to_string()
        }
    }
}
