//! Per-operation payload records.
//!
//! Requests carry one of the `*Request` records, optionally followed by
//! inline bulk bytes. Every response is a [`Reply<T>`]: a 4-byte result code
//! followed by the operation's body record (`()` when there is none).
//!
//! All records are packed and little-endian; see [`crate::codec`].

use bytes::{Buf, BufMut};

use crate::codec::{wire_record, FixedStr, WireField};

/// Width of name and message string fields.
pub const NAME_LEN: usize = 256;

/// Width of the ASIC serial field.
pub const SERIAL_LEN: usize = 64;

/// `reserved` bit in [`FunctionInfo`]: the worker knows the argument count,
/// even when it is zero.
pub const FUNCTION_ARITY_KNOWN: u32 = 1 << 0;

/// Response record: result code then body.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reply<T> {
    /// Runtime (or telemetry) result code; zero on success.
    pub code: i32,
    /// Operation-specific body. Zeroed when `code` is non-zero.
    pub body: T,
}

impl<T: Default> Reply<T> {
    /// Successful reply.
    pub fn ok(body: T) -> Self {
        Self { code: 0, body }
    }

    /// Failed reply with a zeroed body.
    pub fn failed(code: i32) -> Self {
        Self {
            code,
            body: T::default(),
        }
    }
}

impl<T: WireField> WireField for Reply<T> {
    const SIZE: usize = 4 + T::SIZE;

    fn put<B: BufMut>(&self, buf: &mut B) {
        buf.put_i32_le(self.code);
        self.body.put(buf);
    }

    fn get<B: Buf>(buf: &mut B) -> Self {
        let code = buf.get_i32_le();
        Self {
            code,
            body: T::get(buf),
        }
    }
}

/// Direction of a generic memory copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum MemcpyKind {
    HostToHost = 0,
    HostToDevice = 1,
    DeviceToHost = 2,
    DeviceToDevice = 3,
    Default = 4,
}

impl TryFrom<i32> for MemcpyKind {
    type Error = i32;

    fn try_from(value: i32) -> std::result::Result<Self, i32> {
        Ok(match value {
            0 => MemcpyKind::HostToHost,
            1 => MemcpyKind::HostToDevice,
            2 => MemcpyKind::DeviceToHost,
            3 => MemcpyKind::DeviceToDevice,
            4 => MemcpyKind::Default,
            other => return Err(other),
        })
    }
}

wire_record! {
    /// Device index argument.
    pub struct DeviceRequest {
        pub device_id: i32,
    }

    /// `DEVICE_GET_ATTRIBUTE` request.
    pub struct AttributeRequest {
        pub device_id: i32,
        pub attribute: i32,
    }

    /// Full device property block.
    pub struct DeviceProperties {
        pub name: FixedStr<NAME_LEN>,
        pub total_global_mem: u64,
        pub shared_mem_per_block: u64,
        pub regs_per_block: i32,
        pub warp_size: i32,
        pub max_threads_per_block: i32,
        pub max_threads_dim: [i32; 3],
        pub max_grid_size: [i32; 3],
        pub clock_rate: i32,
        pub memory_clock_rate: i32,
        pub memory_bus_width: i32,
        pub major: i32,
        pub minor: i32,
        pub multi_processor_count: i32,
        pub l2_cache_size: i32,
        pub max_threads_per_multi_processor: i32,
        pub compute_mode: i32,
        pub pci_bus_id: i32,
        pub pci_device_id: i32,
        pub pci_domain_id: i32,
        pub integrated: i32,
        pub can_map_host_memory: i32,
        pub concurrent_kernels: i32,
        pub gcn_arch_name: FixedStr<NAME_LEN>,
    }

    /// Allocation request (all `MALLOC*` opcodes).
    pub struct MallocRequest {
        pub size: u64,
        pub flags: u32,
    }

    /// Device pointer argument (`FREE*`).
    pub struct FreeRequest {
        pub ptr: u64,
    }

    /// Generic copy request. `stream` is ignored by the synchronous opcodes.
    pub struct MemcpyRequest {
        pub dst: u64,
        pub src: u64,
        pub size: u64,
        pub kind: i32,
        pub stream: u64,
    }

    /// Memory set request. For the typed `MEMSET_D*` opcodes `value` is the
    /// element pattern and `size` the element count.
    pub struct MemsetRequest {
        pub dst: u64,
        pub value: i32,
        pub size: u64,
        pub stream: u64,
    }

    /// `MEM_GET_INFO` body.
    pub struct MemInfo {
        pub free: u64,
        pub total: u64,
    }

    /// Stream creation (all three creation opcodes).
    pub struct StreamCreateRequest {
        pub flags: u32,
        pub priority: i32,
    }

    /// Stream handle argument.
    pub struct StreamRequest {
        pub stream: u64,
    }

    /// `STREAM_WAIT_EVENT` request.
    pub struct StreamWaitEventRequest {
        pub stream: u64,
        pub event: u64,
        pub flags: u32,
    }

    /// Event creation.
    pub struct EventCreateRequest {
        pub flags: u32,
    }

    /// Event handle argument.
    pub struct EventRequest {
        pub event: u64,
    }

    /// `EVENT_RECORD` request.
    pub struct EventRecordRequest {
        pub event: u64,
        pub stream: u64,
    }

    /// `EVENT_ELAPSED_TIME` request.
    pub struct EventElapsedRequest {
        pub start: u64,
        pub end: u64,
    }

    /// Module load prefix; `data_size` image bytes follow.
    pub struct ModuleLoadRequest {
        pub data_size: u64,
    }

    /// Module handle argument.
    pub struct ModuleUnloadRequest {
        pub module: u64,
    }

    /// `MODULE_GET_FUNCTION` request.
    pub struct GetFunctionRequest {
        pub module: u64,
        pub name: FixedStr<NAME_LEN>,
    }

    /// `MODULE_GET_FUNCTION` body.
    ///
    /// `num_args == 0` is only meaningful when `reserved` carries
    /// [`FUNCTION_ARITY_KNOWN`].
    pub struct FunctionInfo {
        pub function: u64,
        pub num_args: u32,
        pub reserved: u32,
    }

    /// One kernel argument descriptor, relative to the argument data block.
    pub struct KernelArg {
        pub size: u32,
        pub offset: u32,
    }

    /// Kernel launch prefix; `num_args` descriptors and the argument data
    /// block follow.
    pub struct LaunchRequest {
        pub function: u64,
        pub grid_x: u32,
        pub grid_y: u32,
        pub grid_z: u32,
        pub block_x: u32,
        pub block_y: u32,
        pub block_z: u32,
        pub shared_mem: u32,
        pub stream: u64,
        pub num_args: u32,
    }

    /// `GET_ERROR_NAME` / `GET_ERROR_STRING` request.
    pub struct ErrorStringRequest {
        pub code: i32,
    }

    /// Telemetry initialization.
    pub struct SmiInitRequest {
        pub init_flags: u64,
    }

    /// Processor index argument.
    pub struct ProcessorRequest {
        pub index: u32,
    }

    /// `SMI_GET_CLOCK_INFO` request.
    pub struct ClockRequest {
        pub index: u32,
        pub clock_type: u32,
    }

    /// `SMI_GET_TEMP_METRIC` request.
    pub struct TempRequest {
        pub index: u32,
        pub sensor_type: u32,
    }

    /// Metrics snapshot.
    pub struct GpuMetrics {
        pub temperature_edge: i32,
        pub temperature_hotspot: i32,
        pub temperature_mem: i32,
        pub average_socket_power: u32,
        pub average_gfx_activity: u32,
        pub average_umc_activity: u32,
        pub average_mm_activity: u32,
        pub current_gfxclk: u32,
        pub current_uclk: u32,
        pub current_socclk: u32,
        pub vram_total: u64,
        pub vram_used: u64,
        pub fan_speed_rpm: u32,
        pub pcie_bandwidth: u32,
        pub throttle_status: u32,
        pub reserved: u32,
    }

    /// Power rails.
    pub struct PowerInfo {
        pub current_socket_power: u32,
        pub average_socket_power: u32,
        pub gfx_voltage: u32,
        pub soc_voltage: u32,
        pub mem_voltage: u32,
        pub power_limit: u32,
    }

    /// One clock domain.
    pub struct ClockInfo {
        pub current_clk: u32,
        pub min_clk: u32,
        pub max_clk: u32,
        pub clk_locked: u8,
        pub clk_deep_sleep: u8,
        pub reserved: u16,
    }

    /// Engine activity percentages.
    pub struct GpuActivity {
        pub gfx_activity: u32,
        pub umc_activity: u32,
        pub mm_activity: u32,
        pub reserved: u32,
    }

    /// Memory usage in bytes.
    pub struct VramUsage {
        pub vram_total: u64,
        pub vram_used: u64,
    }

    /// Static identity.
    pub struct AsicInfo {
        pub market_name: FixedStr<NAME_LEN>,
        pub vendor_id: u32,
        pub device_id: u32,
        pub rev_id: u32,
        pub num_compute_units: u32,
        pub asic_serial: FixedStr<SERIAL_LEN>,
    }
}

impl FunctionInfo {
    /// Argument count, or `None` when the worker cannot report it.
    pub fn arity(&self) -> Option<u32> {
        if self.num_args > 0 || self.reserved & FUNCTION_ARITY_KNOWN != 0 {
            Some(self.num_args)
        } else {
            None
        }
    }

    /// Body for a resolved function.
    pub fn new(function: u64, arity: Option<u32>) -> Self {
        Self {
            function,
            num_args: arity.unwrap_or(0),
            reserved: if arity.is_some() { FUNCTION_ARITY_KNOWN } else { 0 },
        }
    }
}

impl LaunchRequest {
    /// Grid dimensions.
    pub fn grid(&self) -> [u32; 3] {
        [self.grid_x, self.grid_y, self.grid_z]
    }

    /// Block dimensions.
    pub fn block(&self) -> [u32; 3] {
        [self.block_x, self.block_y, self.block_z]
    }
}
