//! Allocation, transfers and memory set.
//!
//! Copies larger than [`COPY_CHUNK`] are split so no single frame comes
//! near the payload limit. Chunks keep their order on the wire.

use super::RemoteGpu;
use crate::codec::WireRecord;
use crate::protocol::payload::{FreeRequest, MallocRequest, MemInfo, MemcpyKind, MemcpyRequest, MemsetRequest};
use crate::protocol::{HipError, HipResult, OpCode};
use crate::transport::Connector;

/// Largest inline data block of a single copy frame.
pub const COPY_CHUNK: usize = 32 * 1024 * 1024;

fn copy_request(dst: u64, src: u64, size: usize, kind: MemcpyKind, stream: u64) -> MemcpyRequest {
    MemcpyRequest {
        dst,
        src,
        size: size as u64,
        kind: kind as i32,
        stream,
    }
}

/// Reject a device range whose end does not fit the address space. Once
/// this passes, every chunk address inside the range is representable.
fn check_range(base: u64, len: usize) -> HipResult<()> {
    base.checked_add(len as u64)
        .map(drop)
        .ok_or(HipError::InvalidValue)
}

impl<C: Connector> RemoteGpu<C> {
    async fn alloc(&self, op: OpCode, size: usize, flags: u32) -> HipResult<u64> {
        if size == 0 {
            return Ok(0);
        }
        let req = MallocRequest {
            size: size as u64,
            flags,
        };
        self.call(op, &req.encode()).await
    }

    async fn release(&self, op: OpCode, ptr: u64) -> HipResult<()> {
        if ptr == 0 {
            return Ok(());
        }
        self.post(op, &FreeRequest { ptr }.encode()).await
    }

    /// Allocate device memory. A zero size returns a null pointer without a
    /// round trip.
    pub async fn malloc(&self, size: usize) -> HipResult<u64> {
        self.alloc(OpCode::Malloc, size, 0).await
    }

    /// Allocate pinned host memory on the worker.
    pub async fn malloc_host(&self, size: usize) -> HipResult<u64> {
        self.alloc(OpCode::MallocHost, size, 0).await
    }

    pub async fn malloc_managed(&self, size: usize, flags: u32) -> HipResult<u64> {
        self.alloc(OpCode::MallocManaged, size, flags).await
    }

    /// Stream-ordered allocation. The worker executes a connection's
    /// requests in order, so no stream argument is carried.
    pub async fn malloc_async(&self, size: usize) -> HipResult<u64> {
        self.alloc(OpCode::MallocAsync, size, 0).await
    }

    /// Free device memory (fire-and-forget). Freeing null is a no-op.
    pub async fn free(&self, ptr: u64) -> HipResult<()> {
        self.release(OpCode::Free, ptr).await
    }

    pub async fn free_host(&self, ptr: u64) -> HipResult<()> {
        self.release(OpCode::FreeHost, ptr).await
    }

    pub async fn free_async(&self, ptr: u64) -> HipResult<()> {
        self.release(OpCode::FreeAsync, ptr).await
    }

    /// `(free, total)` bytes on the current device.
    pub async fn mem_get_info(&self) -> HipResult<(u64, u64)> {
        let info: MemInfo = self.call(OpCode::MemGetInfo, &[]).await?;
        Ok((info.free, info.total))
    }

    /// Copy host bytes to the device (fire-and-forget, inline data).
    pub async fn memcpy_htod(&self, dst: u64, src: &[u8]) -> HipResult<()> {
        self.htod(OpCode::MemcpyHtoD, dst, src, 0).await
    }

    pub async fn memcpy_htod_async(&self, dst: u64, src: &[u8], stream: u64) -> HipResult<()> {
        self.htod(OpCode::MemcpyHtoDAsync, dst, src, stream).await
    }

    async fn htod(&self, op: OpCode, dst: u64, src: &[u8], stream: u64) -> HipResult<()> {
        check_range(dst, src.len())?;
        let mut offset = 0usize;
        for chunk in src.chunks(COPY_CHUNK) {
            let req = copy_request(dst + offset as u64, 0, chunk.len(), MemcpyKind::HostToDevice, stream);
            self.session
                .enqueue_no_reply_with_inline_data(op, &req.encode(), chunk)
                .await?;
            offset += chunk.len();
        }
        Ok(())
    }

    /// Copy device bytes into `dst` (synchronous, inline response data).
    pub async fn memcpy_dtoh(&self, dst: &mut [u8], src: u64) -> HipResult<()> {
        self.dtoh(OpCode::MemcpyDtoH, dst, src, 0).await
    }

    /// Device-to-host copy on `stream`. Still waits for the bytes.
    pub async fn memcpy_dtoh_async(&self, dst: &mut [u8], src: u64, stream: u64) -> HipResult<()> {
        self.dtoh(OpCode::MemcpyDtoHAsync, dst, src, stream).await
    }

    async fn dtoh(&self, op: OpCode, dst: &mut [u8], src: u64, stream: u64) -> HipResult<()> {
        check_range(src, dst.len())?;
        let mut offset = 0usize;
        for chunk in dst.chunks_mut(COPY_CHUNK) {
            let req = copy_request(0, src + offset as u64, chunk.len(), MemcpyKind::DeviceToHost, stream);
            let mut resp = [0u8; 4];
            let len = chunk.len();
            self.session
                .request_expecting_inline_data(op, &req.encode(), &mut resp, chunk)
                .await?;
            offset += len;
        }
        Ok(())
    }

    /// Device-to-device copy (fire-and-forget).
    pub async fn memcpy_dtod(&self, dst: u64, src: u64, size: usize) -> HipResult<()> {
        self.dtod(OpCode::MemcpyDtoD, dst, src, size, 0).await
    }

    pub async fn memcpy_dtod_async(&self, dst: u64, src: u64, size: usize, stream: u64) -> HipResult<()> {
        self.dtod(OpCode::MemcpyDtoDAsync, dst, src, size, stream).await
    }

    async fn dtod(&self, op: OpCode, dst: u64, src: u64, size: usize, stream: u64) -> HipResult<()> {
        if size == 0 {
            return Ok(());
        }
        check_range(dst, size)?;
        check_range(src, size)?;
        let req = copy_request(dst, src, size, MemcpyKind::DeviceToDevice, stream);
        self.post(op, &req.encode()).await
    }

    /// Host-to-host copy, done locally.
    pub fn memcpy_htoh(&self, dst: &mut [u8], src: &[u8]) -> HipResult<()> {
        let target = dst.get_mut(..src.len()).ok_or(HipError::InvalidValue)?;
        target.copy_from_slice(src);
        Ok(())
    }

    /// Fill `size` bytes with the low byte of `value` (fire-and-forget).
    pub async fn memset(&self, dst: u64, value: i32, size: usize) -> HipResult<()> {
        self.fill(OpCode::Memset, dst, value, size, 0).await
    }

    pub async fn memset_async(&self, dst: u64, value: i32, size: usize, stream: u64) -> HipResult<()> {
        self.fill(OpCode::MemsetAsync, dst, value, size, stream).await
    }

    /// Fill `count` bytes.
    pub async fn memset_d8(&self, dst: u64, value: u8, count: usize) -> HipResult<()> {
        self.fill(OpCode::MemsetD8, dst, i32::from(value), count, 0).await
    }

    /// Fill `count` 16-bit elements.
    pub async fn memset_d16(&self, dst: u64, value: u16, count: usize) -> HipResult<()> {
        self.fill(OpCode::MemsetD16, dst, i32::from(value), count, 0).await
    }

    /// Fill `count` 32-bit elements.
    pub async fn memset_d32(&self, dst: u64, value: u32, count: usize) -> HipResult<()> {
        self.fill(OpCode::MemsetD32, dst, value as i32, count, 0).await
    }

    async fn fill(&self, op: OpCode, dst: u64, value: i32, size: usize, stream: u64) -> HipResult<()> {
        if size == 0 {
            return Ok(());
        }
        let req = MemsetRequest {
            dst,
            value,
            size: size as u64,
            stream,
        };
        self.post(op, &req.encode()).await
    }
}
