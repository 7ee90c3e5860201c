//! The GPU runtime the worker executes requests against.
//!
//! [`GpuRuntime`] is the boundary to the native compute runtime. Handles
//! crossing it are the runtime's own values; the worker never hands them to
//! a client without recording them in a per-connection table first.
//!
//! Calls may block for as long as the GPU work they wait on. The dispatcher
//! makes them from the blocking thread pool, never from an async worker
//! thread, so one connection waiting on its device leaves the others and
//! the accept loop running.

mod sim;

pub use sim::{attribute, LaunchRecord, ResourceCounts, SimulatedRuntime, SimulatedRuntimeBuilder};

use crate::protocol::payload::DeviceProperties;
use crate::protocol::{AllocKind, HipResult, MemsetWidth};

/// Resolved launch geometry, with the stream already mapped to its native
/// value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LaunchParams {
    pub grid: [u32; 3],
    pub block: [u32; 3],
    pub shared_mem: u32,
    pub stream: u64,
    pub cooperative: bool,
}

/// A function resolved from a loaded module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedFunction {
    pub handle: u64,
    /// Argument count, when the code object's metadata carries it.
    pub arity: Option<u32>,
}

/// Primitive operations of a GPU compute runtime.
///
/// Native stream 0 is the device's default stream.
pub trait GpuRuntime: Send + Sync + 'static {
    fn device_count(&self) -> HipResult<i32>;
    /// Check that `device` may be selected.
    fn set_device(&self, device: i32) -> HipResult<()>;
    fn device_properties(&self, device: i32) -> HipResult<DeviceProperties>;
    fn device_attribute(&self, device: i32, attribute: i32) -> HipResult<i32>;
    fn device_synchronize(&self, device: i32) -> HipResult<()>;

    fn malloc(&self, device: i32, size: u64, kind: AllocKind, flags: u32) -> HipResult<u64>;
    fn free(&self, ptr: u64) -> HipResult<()>;
    fn memcpy_htod(&self, dst: u64, src: &[u8]) -> HipResult<()>;
    fn memcpy_dtoh(&self, dst: &mut [u8], src: u64) -> HipResult<()>;
    fn memcpy_dtod(&self, dst: u64, src: u64, size: u64) -> HipResult<()>;
    /// Fill `count` elements of `width` with the low bits of `pattern`.
    fn memset(&self, dst: u64, pattern: u32, width: MemsetWidth, count: u64) -> HipResult<()>;
    /// `(free, total)` bytes.
    fn mem_info(&self, device: i32) -> HipResult<(u64, u64)>;

    fn stream_create(&self, device: i32, flags: u32, priority: i32) -> HipResult<u64>;
    fn stream_destroy(&self, stream: u64) -> HipResult<()>;
    fn stream_synchronize(&self, stream: u64) -> HipResult<()>;
    fn stream_query(&self, stream: u64) -> HipResult<()>;
    fn stream_wait_event(&self, stream: u64, event: u64, flags: u32) -> HipResult<()>;

    fn event_create(&self, flags: u32) -> HipResult<u64>;
    fn event_destroy(&self, event: u64) -> HipResult<()>;
    fn event_record(&self, event: u64, stream: u64) -> HipResult<()>;
    fn event_synchronize(&self, event: u64) -> HipResult<()>;
    fn event_query(&self, event: u64) -> HipResult<()>;
    fn event_elapsed_ms(&self, start: u64, end: u64) -> HipResult<f32>;

    fn module_load(&self, image: &[u8]) -> HipResult<u64>;
    fn module_unload(&self, module: u64) -> HipResult<()>;
    fn module_get_function(&self, module: u64, name: &str) -> HipResult<ResolvedFunction>;
    fn launch_kernel(&self, function: u64, params: &LaunchParams, args: &[&[u8]]) -> HipResult<()>;

    fn runtime_version(&self) -> HipResult<i32>;
    fn driver_version(&self) -> HipResult<i32>;
}
