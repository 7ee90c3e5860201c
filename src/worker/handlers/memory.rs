//! Allocation, copies and memory set.
//!
//! Every device address a client sends is checked against this
//! connection's allocations before the runtime sees it, including the
//! full byte range a copy or set touches.

use bytes::Bytes;
use tracing::debug;

use crate::codec::WireField;
use crate::protocol::payload::{FreeRequest, MallocRequest, MemInfo, MemcpyKind, MemcpyRequest, MemsetRequest, Reply};
use crate::protocol::{AllocKind, HipError, HipResult, MemsetWidth, MAX_PAYLOAD_SIZE};
use crate::worker::context::Response;
use crate::worker::dispatcher::Connection;
use crate::worker::runtime::GpuRuntime;
use crate::worker::telemetry::SmiLibrary;

/// Largest device-to-host copy that fits one response frame.
const MAX_READBACK: u64 = MAX_PAYLOAD_SIZE as u64 - Reply::<()>::SIZE as u64;

impl<R: GpuRuntime, S: SmiLibrary> Connection<R, S> {
    pub(crate) fn malloc(&mut self, req: MallocRequest, kind: AllocKind) -> Response {
        if req.size == 0 {
            return Response::ok(0u64);
        }
        let result = self
            .runtime
            .malloc(self.device, req.size, kind, req.flags)
            .inspect(|&ptr| self.buffers.insert(ptr, req.size, kind));
        Response::from_result(result)
    }

    /// Free by base address. Freeing null succeeds.
    pub(crate) fn free(&mut self, req: FreeRequest) -> Response {
        if req.ptr == 0 {
            return Response::status(Ok(()));
        }
        let result = self.buffers.remove(req.ptr).and_then(|_| self.runtime.free(req.ptr));
        Response::status(result)
    }

    pub(crate) fn memcpy(&mut self, req: MemcpyRequest, kind: MemcpyKind, data: Bytes) -> Response {
        if let Err(err) = self.native_stream(req.stream) {
            return Response::status(Err(err));
        }
        if req.size == 0 {
            return Response::status(Ok(()));
        }
        match kind {
            MemcpyKind::HostToDevice => Response::status(self.copy_to_device(req.dst, &data)),
            MemcpyKind::DeviceToHost => match self.copy_to_host(req.src, req.size) {
                Ok(bytes) => Response::status(Ok(())).with_inline(bytes),
                Err(err) => Response::status(Err(err)),
            },
            MemcpyKind::DeviceToDevice | MemcpyKind::Default => {
                Response::status(self.copy_on_device(req.dst, req.src, req.size))
            }
            // both ends live in the client's address space
            MemcpyKind::HostToHost => Response::status(Err(HipError::InvalidMemcpyDirection)),
        }
    }

    fn copy_to_device(&self, dst: u64, data: &[u8]) -> HipResult<()> {
        self.buffers.check(dst, data.len() as u64)?;
        self.runtime.memcpy_htod(dst, data)
    }

    fn copy_to_host(&self, src: u64, size: u64) -> HipResult<Bytes> {
        if size > MAX_READBACK {
            return Err(HipError::InvalidValue);
        }
        self.buffers.check(src, size)?;
        let mut buf = vec![0u8; size as usize];
        self.runtime.memcpy_dtoh(&mut buf, src)?;
        debug!(src, size, "device-to-host copy");
        Ok(Bytes::from(buf))
    }

    fn copy_on_device(&self, dst: u64, src: u64, size: u64) -> HipResult<()> {
        self.buffers.check(src, size)?;
        self.buffers.check(dst, size)?;
        self.runtime.memcpy_dtod(dst, src, size)
    }

    /// `size` counts elements of `width`.
    pub(crate) fn memset(&mut self, req: MemsetRequest, width: MemsetWidth) -> Response {
        let result = self.native_stream(req.stream).and_then(|_| {
            if req.size == 0 {
                return Ok(());
            }
            let bytes = req
                .size
                .checked_mul(width.bytes())
                .ok_or(HipError::InvalidValue)?;
            self.buffers.check(req.dst, bytes)?;
            self.runtime.memset(req.dst, req.value as u32, width, req.size)
        });
        Response::status(result)
    }

    pub(crate) fn mem_get_info(&mut self) -> Response {
        let result = self
            .runtime
            .mem_info(self.device)
            .map(|(free, total)| MemInfo { free, total });
        Response::from_result(result)
    }
}
