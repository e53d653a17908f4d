//! # Wire schema between supervisor and worker.
//!
//! ```text
//! [len:u32 BE][version:u16 BE][kind:u16 BE][body ...]
//!  └─ counts version + kind + body, at most MAX_FRAME_LEN
//! ```
//!
//! Body fields are written in a fixed order per kind:
//! - strings and byte blobs: `[len:u32 BE][bytes]` (strings are UTF-8);
//! - timestamps: `u64 BE` nanoseconds since the Unix epoch;
//! - identifiers: 16 raw UUID bytes;
//! - lists and maps: `[count:u32 BE]` followed by the entries.
//!
//! | kind | body |
//! |------|------|
//! | 1 client hello | service name, security level `u16`, memory `u64`, cpu `f64` bits `u64`, fds `u32`, disk `u64` |
//! | 2 worker hello | service name, pid `u32` |
//! | 3 operation    | id, type `u16`, path, arguments, environment, timestamp |
//! | 4 result       | id, status `u16`, payload, error code `u16` (0 = none), error message, timestamp |
//!
//! A frame whose version differs from [`SCHEMA_VERSION`] is rejected with
//! [`IpcError::VersionMismatch`]; any other malformation is
//! [`IpcError::InvalidResponse`].

use std::collections::BTreeMap;
use std::io;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{IpcError, IpcErrorCode};
use crate::ipc::config::{ResourceLimits, SecurityLevel};
use crate::ipc::envelope::{IpcOperation, IpcResult, OperationId, OperationType, ResultStatus};

/// Version written into (and required from) every frame.
pub const SCHEMA_VERSION: u16 = 1;

/// Upper bound on the `len` field.
pub const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024;

const HEADER_LEN: u32 = 4;

/// Discriminant of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    ClientHello,
    WorkerHello,
    Operation,
    Result,
}

impl FrameKind {
    pub fn as_u16(self) -> u16 {
        match self {
            FrameKind::ClientHello => 1,
            FrameKind::WorkerHello => 2,
            FrameKind::Operation => 3,
            FrameKind::Result => 4,
        }
    }

    pub fn from_u16(raw: u16) -> Option<Self> {
        match raw {
            1 => Some(FrameKind::ClientHello),
            2 => Some(FrameKind::WorkerHello),
            3 => Some(FrameKind::Operation),
            4 => Some(FrameKind::Result),
            _ => None,
        }
    }
}

/// First frame on a channel, sent by the supervisor.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientHello {
    pub service_name: String,
    pub security_level: SecurityLevel,
    /// Limits the worker is asked to apply to itself.
    pub limits: ResourceLimits,
}

/// The worker's answer to a [`ClientHello`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerHello {
    pub service_name: String,
    pub pid: u32,
}

/// Any frame body.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    ClientHello(ClientHello),
    WorkerHello(WorkerHello),
    Operation(IpcOperation),
    Result(IpcResult),
}

impl Message {
    pub fn kind(&self) -> FrameKind {
        match self {
            Message::ClientHello(_) => FrameKind::ClientHello,
            Message::WorkerHello(_) => FrameKind::WorkerHello,
            Message::Operation(_) => FrameKind::Operation,
            Message::Result(_) => FrameKind::Result,
        }
    }
}

/// Encodes `message` as one complete frame, length prefix included.
pub fn encode_frame(message: &Message) -> Result<Vec<u8>, IpcError> {
    let mut body = BodyWriter::default();
    match message {
        Message::ClientHello(hello) => {
            body.put_str(&hello.service_name)?;
            body.put_u16(hello.security_level.as_u16());
            body.put_u64(hello.limits.max_memory_bytes);
            body.put_u64(hello.limits.max_cpu_percentage.to_bits());
            body.put_u32(hello.limits.max_file_descriptors);
            body.put_u64(hello.limits.max_disk_bytes);
        }
        Message::WorkerHello(hello) => {
            body.put_str(&hello.service_name)?;
            body.put_u32(hello.pid);
        }
        Message::Operation(op) => {
            body.put_id(op.id());
            body.put_u16(op.op_type().as_u16());
            body.put_str(op.path())?;
            body.put_count(op.arguments().len())?;
            for arg in op.arguments() {
                body.put_str(arg)?;
            }
            body.put_count(op.environment().len())?;
            for (key, value) in op.environment() {
                body.put_str(key)?;
                body.put_str(value)?;
            }
            body.put_time(op.timestamp());
        }
        Message::Result(res) => {
            body.put_id(res.id());
            body.put_u16(res.status().as_u16());
            body.put_bytes(res.payload())?;
            match res.error() {
                Some(err) => {
                    body.put_u16(err.code().as_u16());
                    body.put_str(err.message())?;
                }
                None => {
                    body.put_u16(0);
                    body.put_str("")?;
                }
            }
            body.put_time(res.timestamp());
        }
    }

    let len = u32::try_from(body.0.len())
        .ok()
        .and_then(|n| n.checked_add(HEADER_LEN))
        .filter(|n| *n <= MAX_FRAME_LEN)
        .ok_or_else(|| {
            IpcError::InvalidArguments(format!(
                "{:?} frame exceeds {MAX_FRAME_LEN} bytes",
                message.kind()
            ))
        })?;

    let mut frame = Vec::with_capacity(4 + len as usize);
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(&SCHEMA_VERSION.to_be_bytes());
    frame.extend_from_slice(&message.kind().as_u16().to_be_bytes());
    frame.extend_from_slice(&body.0);
    Ok(frame)
}

/// Decodes one complete frame (length prefix included). Trailing bytes are an error.
pub fn decode_frame(frame: &[u8]) -> Result<Message, IpcError> {
    let (len, rest) = frame
        .split_first_chunk::<4>()
        .ok_or_else(|| malformed("frame shorter than its length prefix"))?;
    let len = u32::from_be_bytes(*len);
    check_len(len)?;
    if rest.len() != len as usize {
        return Err(malformed(format!(
            "length prefix says {len} bytes, frame carries {}",
            rest.len()
        )));
    }
    decode_unprefixed(rest)
}

/// Writes `message` as one frame and flushes.
pub async fn write_message<W>(writer: &mut W, message: &Message) -> Result<(), IpcError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let frame = encode_frame(message)?;
    writer.write_all(&frame).await.map_err(io_error)?;
    writer.flush().await.map_err(io_error)
}

/// Reads exactly one frame.
pub async fn read_message<R>(reader: &mut R) -> Result<Message, IpcError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let len = reader.read_u32().await.map_err(io_error)?;
    check_len(len)?;
    let mut buf = vec![0_u8; len as usize];
    reader.read_exact(&mut buf).await.map_err(io_error)?;
    decode_unprefixed(&buf)
}

fn check_len(len: u32) -> Result<(), IpcError> {
    if len < HEADER_LEN {
        return Err(malformed(format!("frame length {len} below header size")));
    }
    if len > MAX_FRAME_LEN {
        return Err(malformed(format!("frame length {len} exceeds {MAX_FRAME_LEN}")));
    }
    Ok(())
}

fn decode_unprefixed(buf: &[u8]) -> Result<Message, IpcError> {
    let mut r = BodyReader { buf, pos: 0 };
    let version = r.u16()?;
    if version != SCHEMA_VERSION {
        return Err(IpcError::VersionMismatch(format!(
            "peer speaks schema {version}, expected {SCHEMA_VERSION}"
        )));
    }
    let raw_kind = r.u16()?;
    let kind = FrameKind::from_u16(raw_kind)
        .ok_or_else(|| malformed(format!("unknown frame kind {raw_kind}")))?;

    let message = match kind {
        FrameKind::ClientHello => {
            let service_name = r.string()?;
            let raw_level = r.u16()?;
            let security_level = SecurityLevel::from_u16(raw_level)
                .ok_or_else(|| malformed(format!("unknown security level {raw_level}")))?;
            let limits = ResourceLimits {
                max_memory_bytes: r.u64()?,
                max_cpu_percentage: f64::from_bits(r.u64()?),
                max_file_descriptors: r.u32()?,
                max_disk_bytes: r.u64()?,
            };
            Message::ClientHello(ClientHello {
                service_name,
                security_level,
                limits,
            })
        }
        FrameKind::WorkerHello => Message::WorkerHello(WorkerHello {
            service_name: r.string()?,
            pid: r.u32()?,
        }),
        FrameKind::Operation => {
            let id = r.id()?;
            let raw_type = r.u16()?;
            let op_type = OperationType::from_u16(raw_type)
                .ok_or_else(|| malformed(format!("unknown operation type {raw_type}")))?;
            let path = r.string()?;
            let mut arguments = Vec::new();
            for _ in 0..r.u32()? {
                arguments.push(r.string()?);
            }
            let mut environment = BTreeMap::new();
            for _ in 0..r.u32()? {
                let key = r.string()?;
                environment.insert(key, r.string()?);
            }
            let timestamp = r.time()?;
            Message::Operation(
                IpcOperation::builder(op_type)
                    .id(id)
                    .path(path)
                    .args(arguments)
                    .timestamp(timestamp)
                    .envs(environment)
                    .build(),
            )
        }
        FrameKind::Result => {
            let id = r.id()?;
            let raw_status = r.u16()?;
            let status = ResultStatus::from_u16(raw_status)
                .ok_or_else(|| malformed(format!("unknown result status {raw_status}")))?;
            let payload = r.bytes()?.to_vec();
            let raw_code = r.u16()?;
            let message = r.string()?;
            let error = match raw_code {
                0 => None,
                raw => {
                    let code = IpcErrorCode::from_u16(raw)
                        .ok_or_else(|| malformed(format!("unknown error code {raw}")))?;
                    Some(IpcError::from_code(code, message))
                }
            };
            let timestamp = r.time()?;
            Message::Result(IpcResult::from_parts(id, status, payload, error, timestamp))
        }
    };

    if r.pos != buf.len() {
        return Err(malformed(format!(
            "{} trailing bytes after {kind:?} body",
            buf.len() - r.pos
        )));
    }
    Ok(message)
}

fn malformed(reason: impl Into<String>) -> IpcError {
    IpcError::InvalidResponse(reason.into())
}

fn io_error(err: io::Error) -> IpcError {
    match err.kind() {
        io::ErrorKind::UnexpectedEof => {
            IpcError::ConnectionFailed("peer closed the channel".into())
        }
        _ => IpcError::ConnectionFailed(err.to_string()),
    }
}

#[derive(Default)]
struct BodyWriter(Vec<u8>);

impl BodyWriter {
    fn put_u16(&mut self, v: u16) {
        self.0.extend_from_slice(&v.to_be_bytes());
    }

    fn put_u32(&mut self, v: u32) {
        self.0.extend_from_slice(&v.to_be_bytes());
    }

    fn put_u64(&mut self, v: u64) {
        self.0.extend_from_slice(&v.to_be_bytes());
    }

    fn put_count(&mut self, n: usize) -> Result<(), IpcError> {
        let n = u32::try_from(n)
            .map_err(|_| IpcError::InvalidArguments("too many entries".into()))?;
        self.put_u32(n);
        Ok(())
    }

    fn put_bytes(&mut self, b: &[u8]) -> Result<(), IpcError> {
        self.put_count(b.len())?;
        self.0.extend_from_slice(b);
        Ok(())
    }

    fn put_str(&mut self, s: &str) -> Result<(), IpcError> {
        self.put_bytes(s.as_bytes())
    }

    fn put_id(&mut self, id: OperationId) {
        self.0.extend_from_slice(&id.to_bytes());
    }

    fn put_time(&mut self, at: SystemTime) {
        let nanos = at
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
            .unwrap_or(0);
        self.put_u64(nanos);
    }
}

struct BodyReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> BodyReader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], IpcError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| malformed("body truncated"))?;
        let out = &self.buf[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], IpcError> {
        let mut out = [0_u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u16(&mut self) -> Result<u16, IpcError> {
        self.array().map(u16::from_be_bytes)
    }

    fn u32(&mut self) -> Result<u32, IpcError> {
        self.array().map(u32::from_be_bytes)
    }

    fn u64(&mut self) -> Result<u64, IpcError> {
        self.array().map(u64::from_be_bytes)
    }

    fn bytes(&mut self) -> Result<&'a [u8], IpcError> {
        let len = self.u32()? as usize;
        self.take(len)
    }

    fn string(&mut self) -> Result<String, IpcError> {
        let raw = self.bytes()?;
        String::from_utf8(raw.to_vec()).map_err(|_| malformed("string field is not UTF-8"))
    }

    fn id(&mut self) -> Result<OperationId, IpcError> {
        self.array().map(OperationId::from_bytes)
    }

    fn time(&mut self) -> Result<SystemTime, IpcError> {
        Ok(UNIX_EPOCH + Duration::from_nanos(self.u64()?))
    }
}
