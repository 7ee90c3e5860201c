//! Async frame reader.
//!
//! Reads one frame at a time from any `AsyncRead`:
//! - `Idle`: waiting for the first header byte
//! - `ReadingHeader`: need the rest of the 20-byte header
//! - `ReadingPayload`: header validated, reading exactly N payload bytes
//! - `Dispatching`: a frame was handed out, nothing buffered
//! - `Closed`: peer closed or a read failed; terminal
//!
//! The header is validated (magic, version major, size bound) before the
//! payload buffer is allocated, so a hostile length never causes an
//! oversized allocation. Nothing is read ahead: at most one frame is ever
//! held, which keeps request handling strictly sequential.
//!
//! # Example
//!
//! ```
//! # tokio_test_block_on(async {
//! use hipwire::protocol::{build_frame, FrameReader, Header};
//!
//! let bytes = build_frame(&Header::new(0x0003, 1, 2, 0), b"hi");
//! let mut reader = FrameReader::new(&bytes[..]);
//! let frame = reader.read_frame().await.unwrap().unwrap();
//! assert_eq!(frame.payload(), b"hi");
//! assert!(reader.read_frame().await.unwrap().is_none());
//! # });
//! # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(f)
//! # }
//! ```

use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt};

use super::wire_format::{Header, HEADER_SIZE, MAX_PAYLOAD_SIZE};
use super::Frame;
use crate::error::{HipwireError, Result};

/// Reader state, observable for diagnostics and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadState {
    Idle,
    ReadingHeader,
    ReadingPayload { op_code: u16, remaining: u32 },
    Dispatching,
    Closed,
}

/// Reads validated frames from a byte stream.
pub struct FrameReader<R> {
    inner: R,
    state: ReadState,
    max_payload_size: u32,
    io_timeout: Option<Duration>,
    untimed_idle: bool,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Reader with the protocol's payload bound and no timeout.
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            state: ReadState::Idle,
            max_payload_size: MAX_PAYLOAD_SIZE,
            io_timeout: None,
            untimed_idle: false,
        }
    }

    /// Override the payload bound.
    pub fn with_max_payload(mut self, max_payload_size: u32) -> Self {
        self.max_payload_size = max_payload_size;
        self
    }

    /// Bound every read by `timeout`.
    pub fn with_io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = Some(timeout);
        self
    }

    /// Wait indefinitely for the first byte of a frame; the timeout only
    /// applies once a frame has started. Used by the worker, whose peers
    /// may sit idle between calls.
    pub fn untimed_idle(mut self) -> Self {
        self.untimed_idle = true;
        self
    }

    /// Current state.
    pub fn state(&self) -> ReadState {
        self.state
    }

    /// Borrow the underlying reader.
    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    /// Read the next frame.
    ///
    /// Returns `Ok(None)` when the peer closes cleanly between frames.
    /// A close in the middle of a frame is `ConnectionClosed`; a bad header
    /// is a `Protocol` error. Either way the reader is `Closed` afterwards.
    pub async fn read_frame(&mut self) -> Result<Option<Frame>> {
        if self.state == ReadState::Closed {
            return Err(HipwireError::ConnectionClosed);
        }
        let result = self.read_frame_inner().await;
        self.state = match &result {
            Ok(Some(_)) => ReadState::Dispatching,
            Ok(None) | Err(_) => ReadState::Closed,
        };
        result
    }

    async fn read_frame_inner(&mut self) -> Result<Option<Frame>> {
        self.state = ReadState::Idle;
        let mut header_buf = [0u8; HEADER_SIZE];

        let first = if self.untimed_idle {
            self.inner.read(&mut header_buf).await?
        } else {
            timed(self.io_timeout, self.inner.read(&mut header_buf)).await??
        };
        if first == 0 {
            return Ok(None);
        }

        self.state = ReadState::ReadingHeader;
        if first < HEADER_SIZE {
            self.read_exact(first, &mut header_buf).await?;
        }

        let header = Header::decode(&header_buf).ok_or_else(|| {
            HipwireError::Protocol("short header".to_string())
        })?;
        header.validate(self.max_payload_size)?;

        self.state = ReadState::ReadingPayload {
            op_code: header.op_code,
            remaining: header.payload_length,
        };
        let mut payload = BytesMut::zeroed(header.payload_length as usize);
        if !payload.is_empty() {
            self.read_exact(0, &mut payload).await?;
        }

        Ok(Some(Frame::new(header, payload.freeze())))
    }

    async fn read_exact(&mut self, already: usize, buf: &mut [u8]) -> Result<()> {
        let fut = self.inner.read_exact(&mut buf[already..]);
        match timed(self.io_timeout, fut).await? {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                Err(HipwireError::ConnectionClosed)
            }
            Err(e) => Err(HipwireError::Io(e)),
        }
    }
}

/// Run `fut` under an optional timeout.
async fn timed<F: std::future::Future>(timeout: Option<Duration>, fut: F) -> Result<F::Output> {
    match timeout {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| HipwireError::Timeout(limit)),
        None => Ok(fut.await),
    }
}
