//! Client session engine.
//!
//! A [`Session`] owns at most one connection to a worker. Every operation
//! takes the session lock, so calls from concurrent tasks are serialized in
//! lock order; the wire carries one request at a time.
//!
//! Lifecycle:
//! 1. First call connects and sends `INIT`; a non-zero result fails the call
//! 2. Synchronous calls flush pending fire-and-forget frames, send, and wait
//!    for the matching response
//! 3. Fire-and-forget calls are framed with `NO_REPLY` and parked in the
//!    [`CoalesceBuffer`]
//! 4. Any socket failure or malformed response drops the connection; the
//!    next call reconnects from scratch
//!
//! # Example
//!
//! ```ignore
//! use hipwire::client::{ClientConfig, Session};
//! use hipwire::protocol::OpCode;
//!
//! let session = Session::new(ClientConfig::builder().host("gpu-host").build());
//! let mut resp = [0u8; 8];
//! session.request(OpCode::GetDeviceCount, &[], &mut resp).await?;
//! ```

use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::coalesce::CoalesceBuffer;
use super::config::ClientConfig;
use crate::error::{HipwireError, Result};
use crate::protocol::{check, flags, Frame, FrameReader, HipError, HipResult, OpCode, OutboundFrame};
use crate::transport::{describe_io_error, write_frames, Connector, TcpConnector};

/// Mutable state behind the session lock.
struct SessionState<S> {
    stream: Option<S>,
    next_request_id: u32,
    pending: CoalesceBuffer,
    /// First failure of a coalesced write, reported by the next sync call.
    deferred: Option<HipError>,
}

impl<S> SessionState<S> {
    fn next_request_id(&mut self) -> u32 {
        let id = self.next_request_id;
        self.next_request_id = self.next_request_id.wrapping_add(1).max(1);
        id
    }

    fn teardown(&mut self) {
        self.stream = None;
        self.pending.clear();
    }

    fn defer(&mut self, err: HipError) {
        self.deferred.get_or_insert(err);
    }
}

/// One logical connection to a worker.
pub struct Session<C: Connector = TcpConnector> {
    connector: C,
    config: ClientConfig,
    state: Mutex<SessionState<C::Stream>>,
}

impl Session<TcpConnector> {
    /// TCP session with the given configuration. Nothing connects until
    /// the first call.
    pub fn new(config: ClientConfig) -> Self {
        Self::with_connector(TcpConnector, config)
    }

    /// TCP session configured from the environment.
    pub fn from_env() -> Self {
        Self::new(ClientConfig::global().clone())
    }
}

impl<C: Connector> Session<C> {
    /// Session over a custom connector.
    pub fn with_connector(connector: C, config: ClientConfig) -> Self {
        debug!(
            host = %config.host,
            port = config.port,
            coalesce_capacity = config.coalesce_capacity,
            "session configured"
        );
        let pending = CoalesceBuffer::new(config.coalesce_capacity);
        Self {
            connector,
            config,
            state: Mutex::new(SessionState {
                stream: None,
                next_request_id: 1,
                pending,
                deferred: None,
            }),
        }
    }

    /// Active configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Whether a connection is currently established.
    pub async fn is_connected(&self) -> bool {
        self.state.lock().await.stream.is_some()
    }

    /// Bytes of fire-and-forget frames waiting to be flushed.
    pub async fn pending_bytes(&self) -> usize {
        self.state.lock().await.pending.pending_bytes()
    }

    /// Connect and handshake unless already connected.
    pub async fn ensure_connected(&self) -> HipResult<()> {
        let mut state = self.state.lock().await;
        self.connect_locked(&mut state).await?;
        Ok(())
    }

    /// Synchronous call.
    ///
    /// Copies up to `resp.len()` bytes of the response payload (result code
    /// included) into `resp` and returns the embedded result code.
    pub async fn request(&self, op: OpCode, req: &[u8], resp: &mut [u8]) -> HipResult<()> {
        let code = self.transact(op, req, &[], resp, None).await?;
        check(code)
    }

    /// Synchronous call whose request carries inline bulk data.
    pub async fn request_with_inline_data(
        &self,
        op: OpCode,
        req: &[u8],
        data: &[u8],
        resp: &mut [u8],
    ) -> HipResult<()> {
        let code = self.transact(op, req, data, resp, None).await?;
        check(code)
    }

    /// Synchronous call whose response carries inline bulk data.
    ///
    /// The first `resp.len()` payload bytes land in `resp`, the following
    /// bytes in `data`. Anything beyond is discarded.
    pub async fn request_expecting_inline_data(
        &self,
        op: OpCode,
        req: &[u8],
        resp: &mut [u8],
        data: &mut [u8],
    ) -> HipResult<()> {
        let code = self.transact(op, req, &[], resp, Some(data)).await?;
        check(code)
    }

    /// Synchronous call returning the raw result code, for result-code
    /// vocabularies other than the runtime's (telemetry).
    pub(crate) async fn request_code(&self, op: OpCode, req: &[u8], resp: &mut [u8]) -> Result<i32> {
        self.transact(op, req, &[], resp, None).await
    }

    /// Queue a fire-and-forget request.
    pub async fn enqueue_no_reply(&self, op: OpCode, req: &[u8]) -> HipResult<()> {
        self.enqueue(op, req, &[]).await
    }

    /// Queue a fire-and-forget request with inline bulk data.
    pub async fn enqueue_no_reply_with_inline_data(
        &self,
        op: OpCode,
        req: &[u8],
        data: &[u8],
    ) -> HipResult<()> {
        self.enqueue(op, req, data).await
    }

    /// Send every queued fire-and-forget frame now.
    pub async fn flush(&self) -> HipResult<()> {
        let mut state = self.state.lock().await;
        if let Err(e) = self.flush_locked(&mut state).await {
            warn!(error = %e, "flush failed, dropping connection");
            state.teardown();
            return Err(e.into());
        }
        Ok(())
    }

    /// Best-effort `SHUTDOWN` notification, then close.
    ///
    /// Queued frames are flushed first. Failures are ignored: the
    /// connection is gone either way.
    pub async fn disconnect(&self) {
        let mut state = self.state.lock().await;
        if state.stream.is_none() {
            return;
        }
        let _ = self.flush_locked(&mut state).await;

        let id = state.next_request_id();
        let frame = OutboundFrame::new(OpCode::Shutdown.code(), id, flags::NO_REPLY, Bytes::new(), Bytes::new());
        if let Some(stream) = state.stream.as_mut() {
            let timeout = Some(self.config.io_timeout);
            let _ = write_frames(stream, std::slice::from_ref(&frame), timeout).await;
            let _ = stream.shutdown().await;
        }
        state.teardown();
        info!(host = %self.config.host, port = self.config.port, "disconnected from worker");
    }

    async fn enqueue(&self, op: OpCode, req: &[u8], data: &[u8]) -> HipResult<()> {
        let mut state = self.state.lock().await;
        self.connect_locked(&mut state).await?;

        let id = state.next_request_id();
        let frame = OutboundFrame::new(
            op.code(),
            id,
            flags::NO_REPLY,
            Bytes::copy_from_slice(req),
            Bytes::copy_from_slice(data),
        );
        debug!(op = op.name(), request_id = id, bytes = frame.size(), "queued");

        if state.pending.would_overflow(frame.size()) && !self.flush_deferring(&mut state).await {
            return Ok(());
        }
        state.pending.push(frame);
        if state.pending.is_full() {
            self.flush_deferring(&mut state).await;
        }
        Ok(())
    }

    /// Flush from a fire-and-forget call: a failure is recorded as the
    /// deferred error instead of being returned. Returns whether the
    /// connection survived.
    async fn flush_deferring(&self, state: &mut SessionState<C::Stream>) -> bool {
        match self.flush_locked(state).await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "coalesced write failed, dropping connection");
                state.teardown();
                state.defer(e.into());
                false
            }
        }
    }

    async fn flush_locked(&self, state: &mut SessionState<C::Stream>) -> Result<()> {
        let Some(stream) = state.stream.as_mut() else {
            state.pending.clear();
            return Ok(());
        };
        let sent = state.pending.flush_to(stream, Some(self.config.io_timeout)).await?;
        if sent > 0 {
            debug!(frames = sent, "flushed");
        }
        Ok(())
    }

    async fn connect_locked(&self, state: &mut SessionState<C::Stream>) -> Result<()> {
        if state.stream.is_some() {
            return Ok(());
        }
        let cfg = &self.config;
        let mut stream = match self.connector.connect(&cfg.host, cfg.port, cfg.connect_timeout).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(host = %cfg.host, port = cfg.port, error = %describe(&e), "connect failed");
                return Err(e);
            }
        };

        let id = state.next_request_id();
        let init = OutboundFrame::new(OpCode::Init.code(), id, 0, Bytes::new(), Bytes::new());
        write_frames(&mut stream, std::slice::from_ref(&init), Some(cfg.io_timeout)).await?;
        let reply = read_response(&mut stream, id, cfg.connect_timeout).await?;
        let code = reply
            .result_code()
            .ok_or_else(|| HipwireError::Protocol("INIT response without result code".into()))?;
        if let Err(e) = check(code) {
            warn!(code, "worker rejected INIT");
            return Err(HipwireError::Status(e));
        }

        info!(host = %cfg.host, port = cfg.port, "connected to worker");
        state.stream = Some(stream);
        Ok(())
    }

    async fn transact(
        &self,
        op: OpCode,
        req: &[u8],
        inline: &[u8],
        resp: &mut [u8],
        data: Option<&mut [u8]>,
    ) -> Result<i32> {
        let mut state = self.state.lock().await;
        if let Some(err) = state.deferred.take() {
            return Err(HipwireError::Status(err));
        }
        self.connect_locked(&mut state).await?;

        let result = self.transact_locked(&mut state, op, req, inline, resp, data).await;
        if let Err(e) = &result {
            if e.is_fatal() {
                warn!(op = op.name(), error = %e, "request failed, dropping connection");
                state.teardown();
            }
        }
        result
    }

    async fn transact_locked(
        &self,
        state: &mut SessionState<C::Stream>,
        op: OpCode,
        req: &[u8],
        inline: &[u8],
        resp: &mut [u8],
        data: Option<&mut [u8]>,
    ) -> Result<i32> {
        self.flush_locked(state).await?;

        let id = state.next_request_id();
        let frame = OutboundFrame::new(
            op.code(),
            id,
            0,
            Bytes::copy_from_slice(req),
            Bytes::copy_from_slice(inline),
        );
        let stream = state.stream.as_mut().ok_or(HipwireError::ConnectionClosed)?;
        debug!(op = op.name(), request_id = id, bytes = frame.size(), "request");
        write_frames(stream, std::slice::from_ref(&frame), Some(self.config.io_timeout)).await?;

        let reply = read_response(stream, id, self.config.io_timeout).await?;
        let payload = reply.payload();
        let code = reply
            .result_code()
            .ok_or_else(|| HipwireError::Protocol("response without result code".into()))?;

        let fixed = payload.len().min(resp.len());
        resp[..fixed].copy_from_slice(&payload[..fixed]);
        if let Some(data) = data {
            let rest = &payload[fixed..];
            let n = rest.len().min(data.len());
            data[..n].copy_from_slice(&rest[..n]);
        }
        debug!(op = op.name(), request_id = id, code, "response");
        Ok(code)
    }
}

async fn read_response<S>(stream: &mut S, request_id: u32, timeout: Duration) -> Result<Frame>
where
    S: AsyncRead + Unpin,
{
    let frame = FrameReader::new(stream)
        .with_io_timeout(timeout)
        .read_frame()
        .await?
        .ok_or(HipwireError::ConnectionClosed)?;
    if !frame.is_response() {
        return Err(HipwireError::Protocol(format!(
            "expected a response, got opcode 0x{:04x}",
            frame.op_code()
        )));
    }
    if frame.request_id() != request_id {
        return Err(HipwireError::Protocol(format!(
            "response id {} does not match request {}",
            frame.request_id(),
            request_id
        )));
    }
    Ok(frame)
}

fn describe(err: &HipwireError) -> String {
    match err {
        HipwireError::Io(io) => describe_io_error(io),
        other => other.to_string(),
    }
}
