//! Timed reads and writes, including vectored frame batches.
//!
//! A batch of frames is written with `write_vectored` so a burst of small
//! fire-and-forget requests leaves in as few syscalls as the kernel allows:
//!
//! ```text
//! [hdr|record|inline] [hdr|record] [hdr|record|inline] ... ─► one writev
//! ```
//!
//! Partial writes resume from the exact byte where the kernel stopped.

use std::io::IoSlice;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{HipwireError, Result};
use crate::protocol::OutboundFrame;

async fn with_timeout<F, T>(timeout: Option<Duration>, fut: F) -> Result<T>
where
    F: std::future::Future<Output = std::io::Result<T>>,
{
    let out = match timeout {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| HipwireError::Timeout(limit))?,
        None => fut.await,
    };
    out.map_err(|e| match e.kind() {
        std::io::ErrorKind::UnexpectedEof => HipwireError::ConnectionClosed,
        _ => HipwireError::Io(e),
    })
}

/// Fill `buf` completely or fail.
pub async fn read_exact_timed<R>(reader: &mut R, buf: &mut [u8], timeout: Option<Duration>) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    with_timeout(timeout, reader.read_exact(buf)).await.map(|_| ())
}

/// Write all of `buf` and flush.
pub async fn write_all_timed<W>(writer: &mut W, buf: &[u8], timeout: Option<Duration>) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    with_timeout(timeout, async {
        writer.write_all(buf).await?;
        writer.flush().await
    })
    .await
}

/// Write a batch of frames with vectored I/O and flush.
pub async fn write_frames<W>(writer: &mut W, batch: &[OutboundFrame], timeout: Option<Duration>) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if batch.is_empty() {
        return Ok(());
    }
    with_timeout(timeout, write_batch(writer, batch)).await
}

async fn write_batch<W>(writer: &mut W, batch: &[OutboundFrame]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let total_size: usize = batch.iter().map(OutboundFrame::size).sum();
    let mut total_written = 0;

    while total_written < total_size {
        let slices = build_remaining_slices(batch, total_written);
        let written = writer.write_vectored(&slices).await?;
        if written == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            ));
        }
        total_written += written;
    }

    writer.flush().await
}

/// Build IoSlice array for remaining data after `skip_bytes` were written.
fn build_remaining_slices(batch: &[OutboundFrame], skip_bytes: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::with_capacity(batch.len() * 3);
    let mut start = 0;

    for segment in batch.iter().flat_map(OutboundFrame::segments) {
        let end = start + segment.len();
        if skip_bytes < end {
            slices.push(IoSlice::new(&segment[skip_bytes.saturating_sub(start)..]));
        }
        start = end;
    }

    slices
}
