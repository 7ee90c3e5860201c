//! Write coalescing for fire-and-forget requests.
//!
//! No-reply frames are parked here instead of being written one by one.
//! The session drains the buffer with a single vectored write when:
//! - the next frame would push it past its capacity
//! - a synchronous request is about to be sent
//! - the caller flushes explicitly
//!
//! Frames keep their submission order; the worker executes them in that
//! order before it sees the synchronous request that follows.

use std::time::Duration;

use tokio::io::AsyncWrite;

use crate::error::Result;
use crate::protocol::OutboundFrame;
use crate::transport::write_frames;

/// Bounded queue of encoded frames awaiting one bulk write.
#[derive(Debug)]
pub struct CoalesceBuffer {
    frames: Vec<OutboundFrame>,
    bytes: usize,
    capacity: usize,
}

impl CoalesceBuffer {
    /// Buffer holding up to `capacity` bytes of frames.
    pub fn new(capacity: usize) -> Self {
        Self {
            frames: Vec::new(),
            bytes: 0,
            capacity,
        }
    }

    /// Whether adding `frame_size` bytes needs a flush first.
    #[inline]
    pub fn would_overflow(&self, frame_size: usize) -> bool {
        !self.frames.is_empty() && self.bytes + frame_size > self.capacity
    }

    /// Whether the buffered bytes alone already reach capacity.
    #[inline]
    pub fn is_full(&self) -> bool {
        self.bytes >= self.capacity
    }

    /// Append a frame. Callers check [`would_overflow`](Self::would_overflow) first.
    pub fn push(&mut self, frame: OutboundFrame) {
        self.bytes += frame.size();
        self.frames.push(frame);
    }

    /// Number of buffered frames.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Buffered bytes including headers.
    pub fn pending_bytes(&self) -> usize {
        self.bytes
    }

    /// Drop everything without sending.
    pub fn clear(&mut self) {
        self.frames.clear();
        self.bytes = 0;
    }

    /// Write every buffered frame in one batch.
    ///
    /// The buffer is emptied whether or not the write succeeds: after a
    /// failed write the connection is torn down and partially sent frames
    /// cannot be replayed safely.
    pub async fn flush_to<W>(&mut self, writer: &mut W, timeout: Option<Duration>) -> Result<usize>
    where
        W: AsyncWrite + Unpin,
    {
        if self.frames.is_empty() {
            return Ok(0);
        }
        let count = self.frames.len();
        let result = write_frames(writer, &self.frames, timeout).await;
        self.clear();
        result.map(|_| count)
    }
}
