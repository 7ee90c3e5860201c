//! In-memory GPU runtime.
//!
//! Devices are plain byte buffers. Work runs synchronously at submission,
//! so streams are always idle and events complete as soon as they are
//! recorded. Addresses come from a bump allocator with a guard gap after
//! every allocation and are never reused, which makes stale pointers
//! detectable.
//!
//! Every loaded module exposes the same built-in kernels:
//!
//! | Kernel           | Arguments                           | Effect                  |
//! |------------------|-------------------------------------|-------------------------|
//! | `fill_u32`       | `ptr: u64, value: u32, count: u32`  | writes `count` words    |
//! | `vector_add_f32` | `a: u64, b: u64, c: u64, n: u32`    | `c[i] = a[i] + b[i]`    |
//! | `noop`           | none                                | nothing                 |
//! | `fail`           | none                                | fails with LaunchFailure|
//! | `record_args`    | any (arity not reported)            | nothing                 |
//!
//! Launches are recorded, including failing ones, and can be inspected
//! with [`SimulatedRuntime::launches`].

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::debug;

use super::{GpuRuntime, LaunchParams, ResolvedFunction};
use crate::protocol::code_object::image_extent;
use crate::protocol::payload::DeviceProperties;
use crate::protocol::{AllocKind, HipError, HipResult, MemsetWidth};

const BASE_ADDRESS: u64 = 0x7f00_0000_0000;
const ALIGNMENT: u64 = 256;
const DEFAULT_MEMORY: u64 = 1 << 30;
const RUNTIME_VERSION: i32 = 60_200_000;
const DRIVER_VERSION: i32 = 60_243_000;

/// Attribute codes answered by [`SimulatedRuntime`].
pub mod attribute {
    pub const MAX_THREADS_PER_BLOCK: i32 = 1;
    pub const WARP_SIZE: i32 = 2;
    pub const MULTIPROCESSOR_COUNT: i32 = 3;
    pub const CLOCK_RATE: i32 = 4;
    pub const COMPUTE_CAPABILITY_MAJOR: i32 = 5;
    pub const COMPUTE_CAPABILITY_MINOR: i32 = 6;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kernel {
    FillU32,
    VectorAddF32,
    Noop,
    Fail,
    RecordArgs,
}

impl Kernel {
    const ALL: [Kernel; 5] = [
        Kernel::FillU32,
        Kernel::VectorAddF32,
        Kernel::Noop,
        Kernel::Fail,
        Kernel::RecordArgs,
    ];

    fn name(self) -> &'static str {
        match self {
            Kernel::FillU32 => "fill_u32",
            Kernel::VectorAddF32 => "vector_add_f32",
            Kernel::Noop => "noop",
            Kernel::Fail => "fail",
            Kernel::RecordArgs => "record_args",
        }
    }

    fn lookup(name: &str) -> Option<Kernel> {
        Self::ALL.into_iter().find(|k| k.name() == name)
    }

    fn arity(self) -> Option<u32> {
        match self {
            Kernel::FillU32 => Some(3),
            Kernel::VectorAddF32 => Some(4),
            Kernel::Noop | Kernel::Fail => Some(0),
            Kernel::RecordArgs => None,
        }
    }
}

/// One observed kernel launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRecord {
    pub kernel: String,
    pub params: LaunchParams,
    /// Argument bytes as reconstructed by the worker.
    pub args: Vec<Vec<u8>>,
}

/// Live resource counts, for leak checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResourceCounts {
    pub allocations: usize,
    pub streams: usize,
    pub events: usize,
    pub modules: usize,
}

struct Allocation {
    device: usize,
    data: Vec<u8>,
}

struct State {
    next_address: u64,
    next_handle: u64,
    allocations: BTreeMap<u64, Allocation>,
    used: Vec<u64>,
    streams: HashMap<u64, usize>,
    events: HashMap<u64, Option<Instant>>,
    modules: HashMap<u64, Vec<u64>>,
    functions: HashMap<u64, Kernel>,
    launches: Vec<LaunchRecord>,
}

impl State {
    fn handle(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    /// Base address and offset of `len` bytes at `ptr`.
    fn locate(&self, ptr: u64, len: u64) -> HipResult<(u64, usize)> {
        let (&base, alloc) = self
            .allocations
            .range(..=ptr)
            .next_back()
            .ok_or(HipError::InvalidDevicePointer)?;
        let size = alloc.data.len() as u64;
        let offset = ptr - base;
        if offset >= size {
            return Err(HipError::InvalidDevicePointer);
        }
        match offset.checked_add(len) {
            Some(end) if end <= size => Ok((base, offset as usize)),
            _ => Err(HipError::InvalidValue),
        }
    }

    fn bytes(&self, ptr: u64, len: usize) -> HipResult<&[u8]> {
        let (base, offset) = self.locate(ptr, len as u64)?;
        let alloc = self.allocations.get(&base).ok_or(HipError::InvalidDevicePointer)?;
        Ok(&alloc.data[offset..offset + len])
    }

    fn bytes_mut(&mut self, ptr: u64, len: usize) -> HipResult<&mut [u8]> {
        let (base, offset) = self.locate(ptr, len as u64)?;
        let alloc = self
            .allocations
            .get_mut(&base)
            .ok_or(HipError::InvalidDevicePointer)?;
        Ok(&mut alloc.data[offset..offset + len])
    }

    fn check_stream(&self, stream: u64) -> HipResult<()> {
        if stream == 0 || self.streams.contains_key(&stream) {
            Ok(())
        } else {
            Err(HipError::InvalidHandle)
        }
    }

    fn check_event(&self, event: u64) -> HipResult<Option<Instant>> {
        self.events.get(&event).copied().ok_or(HipError::InvalidHandle)
    }
}

/// Builder for [`SimulatedRuntime`].
#[derive(Debug, Clone)]
pub struct SimulatedRuntimeBuilder {
    devices: usize,
    memory_per_device: u64,
    legacy_arity: bool,
    sync_latency: Duration,
}

impl SimulatedRuntimeBuilder {
    pub fn devices(mut self, devices: usize) -> Self {
        self.devices = devices;
        self
    }

    /// Capacity of each device in bytes.
    pub fn memory_per_device(mut self, bytes: u64) -> Self {
        self.memory_per_device = bytes;
        self
    }

    /// Behave like a runtime without kernel metadata: no function reports
    /// its argument count.
    pub fn legacy_arity(mut self, legacy: bool) -> Self {
        self.legacy_arity = legacy;
        self
    }

    /// Make every device synchronization block the calling thread for
    /// `latency`, like a device with queued work.
    pub fn sync_latency(mut self, latency: Duration) -> Self {
        self.sync_latency = latency;
        self
    }

    pub fn build(self) -> SimulatedRuntime {
        SimulatedRuntime {
            devices: self.devices,
            memory_per_device: self.memory_per_device,
            legacy_arity: self.legacy_arity,
            sync_latency: self.sync_latency,
            synchronizations: AtomicUsize::new(0),
            state: Mutex::new(State {
                next_address: BASE_ADDRESS,
                next_handle: 0,
                allocations: BTreeMap::new(),
                used: vec![0; self.devices],
                streams: HashMap::new(),
                events: HashMap::new(),
                modules: HashMap::new(),
                functions: HashMap::new(),
                launches: Vec::new(),
            }),
        }
    }
}

/// GPU runtime held entirely in process memory.
pub struct SimulatedRuntime {
    devices: usize,
    memory_per_device: u64,
    legacy_arity: bool,
    sync_latency: Duration,
    synchronizations: AtomicUsize,
    state: Mutex<State>,
}

impl SimulatedRuntime {
    /// Runtime with `devices` devices of 1 GiB each.
    pub fn new(devices: usize) -> Self {
        Self::builder().devices(devices).build()
    }

    pub fn builder() -> SimulatedRuntimeBuilder {
        SimulatedRuntimeBuilder {
            devices: 1,
            memory_per_device: DEFAULT_MEMORY,
            legacy_arity: false,
            sync_latency: Duration::ZERO,
        }
    }

    /// Number of device synchronizations performed.
    pub fn device_synchronizations(&self) -> usize {
        self.synchronizations.load(Ordering::Relaxed)
    }

    /// Every launch so far, in submission order.
    pub fn launches(&self) -> Vec<LaunchRecord> {
        self.state().launches.clone()
    }

    /// Live resources across all connections.
    pub fn resource_counts(&self) -> ResourceCounts {
        let state = self.state();
        ResourceCounts {
            allocations: state.allocations.len(),
            streams: state.streams.len(),
            events: state.events.len(),
            modules: state.modules.len(),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn device_index(&self, device: i32) -> HipResult<usize> {
        usize::try_from(device)
            .ok()
            .filter(|&d| d < self.devices)
            .ok_or(HipError::InvalidDevice)
    }
}

fn arg<const N: usize>(args: &[&[u8]], index: usize) -> HipResult<[u8; N]> {
    args.get(index)
        .and_then(|a| <[u8; N]>::try_from(*a).ok())
        .ok_or(HipError::InvalidValue)
}

fn arg_u64(args: &[&[u8]], index: usize) -> HipResult<u64> {
    arg::<8>(args, index).map(u64::from_le_bytes)
}

fn arg_u32(args: &[&[u8]], index: usize) -> HipResult<u32> {
    arg::<4>(args, index).map(u32::from_le_bytes)
}

fn run_kernel(state: &mut State, kernel: Kernel, args: &[&[u8]]) -> HipResult<()> {
    match kernel {
        Kernel::FillU32 => {
            let (ptr, value, count) = (arg_u64(args, 0)?, arg_u32(args, 1)?, arg_u32(args, 2)?);
            let out = state.bytes_mut(ptr, count as usize * 4)?;
            for word in out.chunks_exact_mut(4) {
                word.copy_from_slice(&value.to_le_bytes());
            }
            Ok(())
        }
        Kernel::VectorAddF32 => {
            let (a, b, c) = (arg_u64(args, 0)?, arg_u64(args, 1)?, arg_u64(args, 2)?);
            let len = arg_u32(args, 3)? as usize * 4;
            let lhs = state.bytes(a, len)?.to_vec();
            let rhs = state.bytes(b, len)?.to_vec();
            let out = state.bytes_mut(c, len)?;
            for ((o, x), y) in out
                .chunks_exact_mut(4)
                .zip(lhs.chunks_exact(4))
                .zip(rhs.chunks_exact(4))
            {
                let sum = f32::from_le_bytes([x[0], x[1], x[2], x[3]]) + f32::from_le_bytes([y[0], y[1], y[2], y[3]]);
                o.copy_from_slice(&sum.to_le_bytes());
            }
            Ok(())
        }
        Kernel::Noop | Kernel::RecordArgs => Ok(()),
        Kernel::Fail => Err(HipError::LaunchFailure),
    }
}

impl GpuRuntime for SimulatedRuntime {
    fn device_count(&self) -> HipResult<i32> {
        if self.devices == 0 {
            return Err(HipError::NoDevice);
        }
        Ok(self.devices as i32)
    }

    fn set_device(&self, device: i32) -> HipResult<()> {
        self.device_index(device).map(|_| ())
    }

    fn device_properties(&self, device: i32) -> HipResult<DeviceProperties> {
        let index = self.device_index(device)?;
        Ok(DeviceProperties {
            name: format!("Simulated GPU {}", index).into(),
            total_global_mem: self.memory_per_device,
            shared_mem_per_block: 64 * 1024,
            regs_per_block: 65536,
            warp_size: 64,
            max_threads_per_block: 1024,
            max_threads_dim: [1024, 1024, 1024],
            max_grid_size: [i32::MAX, 65535, 65535],
            clock_rate: 1_700_000,
            memory_clock_rate: 1_600_000,
            memory_bus_width: 4096,
            major: 9,
            minor: 0,
            multi_processor_count: 104,
            l2_cache_size: 8 * 1024 * 1024,
            max_threads_per_multi_processor: 2048,
            compute_mode: 0,
            pci_bus_id: 3 + device,
            pci_device_id: 0,
            pci_domain_id: 0,
            integrated: 0,
            can_map_host_memory: 1,
            concurrent_kernels: 1,
            gcn_arch_name: "gfx90a:sramecc+:xnack-".into(),
        })
    }

    fn device_attribute(&self, device: i32, attribute: i32) -> HipResult<i32> {
        let props = self.device_properties(device)?;
        Ok(match attribute {
            attribute::MAX_THREADS_PER_BLOCK => props.max_threads_per_block,
            attribute::WARP_SIZE => props.warp_size,
            attribute::MULTIPROCESSOR_COUNT => props.multi_processor_count,
            attribute::CLOCK_RATE => props.clock_rate,
            attribute::COMPUTE_CAPABILITY_MAJOR => props.major,
            attribute::COMPUTE_CAPABILITY_MINOR => props.minor,
            _ => return Err(HipError::InvalidValue),
        })
    }

    fn device_synchronize(&self, device: i32) -> HipResult<()> {
        self.device_index(device)?;
        if !self.sync_latency.is_zero() {
            std::thread::sleep(self.sync_latency);
        }
        self.synchronizations.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn malloc(&self, device: i32, size: u64, kind: AllocKind, _flags: u32) -> HipResult<u64> {
        let index = self.device_index(device)?;
        if size == 0 {
            return Ok(0);
        }
        let len = usize::try_from(size).map_err(|_| HipError::OutOfMemory)?;
        let mut state = self.state();
        if state.used[index].saturating_add(size) > self.memory_per_device {
            return Err(HipError::OutOfMemory);
        }

        let ptr = state.next_address;
        let span = size.div_ceil(ALIGNMENT) * ALIGNMENT;
        state.next_address += span + ALIGNMENT;
        state.used[index] += size;
        state.allocations.insert(
            ptr,
            Allocation {
                device: index,
                data: vec![0; len],
            },
        );
        debug!("allocated {:#x} ({} bytes, {:?})", ptr, size, kind);
        Ok(ptr)
    }

    fn free(&self, ptr: u64) -> HipResult<()> {
        let mut state = self.state();
        let alloc = state
            .allocations
            .remove(&ptr)
            .ok_or(HipError::InvalidDevicePointer)?;
        state.used[alloc.device] -= alloc.data.len() as u64;
        Ok(())
    }

    fn memcpy_htod(&self, dst: u64, src: &[u8]) -> HipResult<()> {
        self.state().bytes_mut(dst, src.len())?.copy_from_slice(src);
        Ok(())
    }

    fn memcpy_dtoh(&self, dst: &mut [u8], src: u64) -> HipResult<()> {
        let len = dst.len();
        dst.copy_from_slice(self.state().bytes(src, len)?);
        Ok(())
    }

    fn memcpy_dtod(&self, dst: u64, src: u64, size: u64) -> HipResult<()> {
        let len = usize::try_from(size).map_err(|_| HipError::InvalidValue)?;
        let mut state = self.state();
        let data = state.bytes(src, len)?.to_vec();
        state.bytes_mut(dst, len)?.copy_from_slice(&data);
        Ok(())
    }

    fn memset(&self, dst: u64, pattern: u32, width: MemsetWidth, count: u64) -> HipResult<()> {
        let len = count
            .checked_mul(width.bytes())
            .and_then(|n| usize::try_from(n).ok())
            .ok_or(HipError::InvalidValue)?;
        let bytes = pattern.to_le_bytes();
        let element = &bytes[..width.bytes() as usize];
        let mut state = self.state();
        for chunk in state.bytes_mut(dst, len)?.chunks_exact_mut(element.len()) {
            chunk.copy_from_slice(element);
        }
        Ok(())
    }

    fn mem_info(&self, device: i32) -> HipResult<(u64, u64)> {
        let index = self.device_index(device)?;
        let used = self.state().used[index];
        Ok((self.memory_per_device - used, self.memory_per_device))
    }

    fn stream_create(&self, device: i32, _flags: u32, _priority: i32) -> HipResult<u64> {
        let index = self.device_index(device)?;
        let mut state = self.state();
        let stream = state.handle();
        state.streams.insert(stream, index);
        Ok(stream)
    }

    fn stream_destroy(&self, stream: u64) -> HipResult<()> {
        self.state()
            .streams
            .remove(&stream)
            .map(|_| ())
            .ok_or(HipError::InvalidHandle)
    }

    fn stream_synchronize(&self, stream: u64) -> HipResult<()> {
        self.state().check_stream(stream)
    }

    fn stream_query(&self, stream: u64) -> HipResult<()> {
        self.state().check_stream(stream)
    }

    fn stream_wait_event(&self, stream: u64, event: u64, _flags: u32) -> HipResult<()> {
        let state = self.state();
        state.check_stream(stream)?;
        state.check_event(event).map(|_| ())
    }

    fn event_create(&self, _flags: u32) -> HipResult<u64> {
        let mut state = self.state();
        let event = state.handle();
        state.events.insert(event, None);
        Ok(event)
    }

    fn event_destroy(&self, event: u64) -> HipResult<()> {
        self.state()
            .events
            .remove(&event)
            .map(|_| ())
            .ok_or(HipError::InvalidHandle)
    }

    fn event_record(&self, event: u64, stream: u64) -> HipResult<()> {
        let mut state = self.state();
        state.check_stream(stream)?;
        let slot = state.events.get_mut(&event).ok_or(HipError::InvalidHandle)?;
        *slot = Some(Instant::now());
        Ok(())
    }

    fn event_synchronize(&self, event: u64) -> HipResult<()> {
        self.state().check_event(event).map(|_| ())
    }

    fn event_query(&self, event: u64) -> HipResult<()> {
        self.state().check_event(event).map(|_| ())
    }

    fn event_elapsed_ms(&self, start: u64, end: u64) -> HipResult<f32> {
        let state = self.state();
        let (start, end) = (state.check_event(start)?, state.check_event(end)?);
        match (start, end) {
            (Some(start), Some(end)) => Ok(end.saturating_duration_since(start).as_secs_f32() * 1000.0),
            _ => Err(HipError::NotReady),
        }
    }

    fn module_load(&self, image: &[u8]) -> HipResult<u64> {
        let (kind, extent) = image_extent(image).map_err(|_| HipError::InvalidImage)?;
        let mut state = self.state();
        let module = state.handle();
        state.modules.insert(module, Vec::new());
        debug!(module, ?kind, extent, "module loaded");
        Ok(module)
    }

    fn module_unload(&self, module: u64) -> HipResult<()> {
        let mut state = self.state();
        let functions = state.modules.remove(&module).ok_or(HipError::InvalidHandle)?;
        for function in functions {
            state.functions.remove(&function);
        }
        Ok(())
    }

    fn module_get_function(&self, module: u64, name: &str) -> HipResult<ResolvedFunction> {
        let kernel = Kernel::lookup(name);
        let mut state = self.state();
        if !state.modules.contains_key(&module) {
            return Err(HipError::InvalidHandle);
        }
        let kernel = kernel.ok_or(HipError::NotFound)?;
        let handle = state.handle();
        state.functions.insert(handle, kernel);
        if let Some(functions) = state.modules.get_mut(&module) {
            functions.push(handle);
        }
        Ok(ResolvedFunction {
            handle,
            arity: if self.legacy_arity { None } else { kernel.arity() },
        })
    }

    fn launch_kernel(&self, function: u64, params: &LaunchParams, args: &[&[u8]]) -> HipResult<()> {
        let mut state = self.state();
        let kernel = *state
            .functions
            .get(&function)
            .ok_or(HipError::InvalidDeviceFunction)?;
        state.check_stream(params.stream)?;
        if params.grid.contains(&0) || params.block.contains(&0) {
            return Err(HipError::InvalidConfiguration);
        }

        state.launches.push(LaunchRecord {
            kernel: kernel.name().to_string(),
            params: *params,
            args: args.iter().map(|a| a.to_vec()).collect(),
        });
        run_kernel(&mut state, kernel, args)
    }

    fn runtime_version(&self) -> HipResult<i32> {
        Ok(RUNTIME_VERSION)
    }

    fn driver_version(&self) -> HipResult<i32> {
        Ok(DRIVER_VERSION)
    }
}
