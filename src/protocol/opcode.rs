//! Operation codes.
//!
//! The opcode space is partitioned by category:
//!
//! ```text
//! 0x00xx  connection      0x03xx  stream          0x06xx  error queries
//! 0x01xx  device          0x04xx  event           0x07xx  version queries
//! 0x020x  allocation      0x050x  module          0x08xx  telemetry
//! 0x021x  transfer        0x051x  kernel launch
//! 0x022x  memory set
//! 0x023x  memory info
//! ```

macro_rules! op_codes {
    ($($variant:ident = $value:literal => $name:literal,)+) => {
        /// Every operation the protocol defines.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u16)]
        pub enum OpCode {
            $($variant = $value,)+
        }

        impl OpCode {
            /// All opcodes in table order.
            pub const ALL: &'static [OpCode] = &[$(OpCode::$variant,)+];

            /// Runtime call this opcode stands for, used in logs.
            pub fn name(self) -> &'static str {
                match self {
                    $(OpCode::$variant => $name,)+
                }
            }
        }

        impl TryFrom<u16> for OpCode {
            type Error = u16;

            fn try_from(value: u16) -> std::result::Result<Self, u16> {
                match value {
                    $($value => Ok(OpCode::$variant),)+
                    other => Err(other),
                }
            }
        }
    };
}

op_codes! {
    Init = 0x0001 => "hipInit(remote)",
    Shutdown = 0x0002 => "hipShutdown(remote)",
    Ping = 0x0003 => "ping",

    GetDeviceCount = 0x0100 => "hipGetDeviceCount",
    SetDevice = 0x0101 => "hipSetDevice",
    GetDevice = 0x0102 => "hipGetDevice",
    GetDeviceProperties = 0x0103 => "hipGetDeviceProperties",
    DeviceSynchronize = 0x0104 => "hipDeviceSynchronize",
    DeviceReset = 0x0105 => "hipDeviceReset",
    DeviceGetAttribute = 0x0106 => "hipDeviceGetAttribute",

    Malloc = 0x0200 => "hipMalloc",
    Free = 0x0201 => "hipFree",
    MallocHost = 0x0202 => "hipMallocHost",
    FreeHost = 0x0203 => "hipFreeHost",
    MallocManaged = 0x0204 => "hipMallocManaged",
    MallocAsync = 0x0205 => "hipMallocAsync",
    FreeAsync = 0x0206 => "hipFreeAsync",

    Memcpy = 0x0210 => "hipMemcpy",
    MemcpyAsync = 0x0211 => "hipMemcpyAsync",
    Memcpy2D = 0x0212 => "hipMemcpy2D",
    Memcpy2DAsync = 0x0213 => "hipMemcpy2DAsync",
    Memcpy3D = 0x0214 => "hipMemcpy3D",
    Memcpy3DAsync = 0x0215 => "hipMemcpy3DAsync",
    MemcpyDtoD = 0x0216 => "hipMemcpyDtoD",
    MemcpyDtoDAsync = 0x0217 => "hipMemcpyDtoDAsync",
    MemcpyHtoD = 0x0218 => "hipMemcpyHtoD",
    MemcpyHtoDAsync = 0x0219 => "hipMemcpyHtoDAsync",
    MemcpyDtoH = 0x021A => "hipMemcpyDtoH",
    MemcpyDtoHAsync = 0x021B => "hipMemcpyDtoHAsync",

    Memset = 0x0220 => "hipMemset",
    MemsetAsync = 0x0221 => "hipMemsetAsync",
    MemsetD8 = 0x0222 => "hipMemsetD8",
    MemsetD16 = 0x0223 => "hipMemsetD16",
    MemsetD32 = 0x0224 => "hipMemsetD32",

    MemGetInfo = 0x0230 => "hipMemGetInfo",
    PointerGetAttributes = 0x0231 => "hipPointerGetAttributes",

    StreamCreate = 0x0300 => "hipStreamCreate",
    StreamCreateWithFlags = 0x0301 => "hipStreamCreateWithFlags",
    StreamCreateWithPriority = 0x0302 => "hipStreamCreateWithPriority",
    StreamDestroy = 0x0303 => "hipStreamDestroy",
    StreamSynchronize = 0x0304 => "hipStreamSynchronize",
    StreamQuery = 0x0305 => "hipStreamQuery",
    StreamWaitEvent = 0x0306 => "hipStreamWaitEvent",
    StreamGetFlags = 0x0307 => "hipStreamGetFlags",
    StreamGetPriority = 0x0308 => "hipStreamGetPriority",

    EventCreate = 0x0400 => "hipEventCreate",
    EventCreateWithFlags = 0x0401 => "hipEventCreateWithFlags",
    EventDestroy = 0x0402 => "hipEventDestroy",
    EventRecord = 0x0403 => "hipEventRecord",
    EventSynchronize = 0x0404 => "hipEventSynchronize",
    EventQuery = 0x0405 => "hipEventQuery",
    EventElapsedTime = 0x0406 => "hipEventElapsedTime",

    ModuleLoadData = 0x0500 => "hipModuleLoadData",
    ModuleLoadDataEx = 0x0501 => "hipModuleLoadDataEx",
    ModuleUnload = 0x0502 => "hipModuleUnload",
    ModuleGetFunction = 0x0503 => "hipModuleGetFunction",
    ModuleGetGlobal = 0x0504 => "hipModuleGetGlobal",

    LaunchKernel = 0x0510 => "hipLaunchKernel",
    LaunchCooperativeKernel = 0x0511 => "hipLaunchCooperativeKernel",
    ModuleLaunchKernel = 0x0512 => "hipModuleLaunchKernel",

    GetLastError = 0x0600 => "hipGetLastError",
    PeekAtLastError = 0x0601 => "hipPeekAtLastError",
    GetErrorString = 0x0602 => "hipGetErrorString",
    GetErrorName = 0x0603 => "hipGetErrorName",

    RuntimeGetVersion = 0x0700 => "hipRuntimeGetVersion",
    DriverGetVersion = 0x0701 => "hipDriverGetVersion",

    SmiInit = 0x0800 => "amdsmi_init",
    SmiShutdown = 0x0801 => "amdsmi_shut_down",
    SmiGetProcessorCount = 0x0802 => "amdsmi_get_processor_count",
    SmiGetGpuMetrics = 0x0820 => "amdsmi_get_gpu_metrics",
    SmiGetPowerInfo = 0x0821 => "amdsmi_get_power_info",
    SmiGetClockInfo = 0x0822 => "amdsmi_get_clock_info",
    SmiGetTempMetric = 0x0823 => "amdsmi_get_temp_metric",
    SmiGetGpuActivity = 0x0824 => "amdsmi_get_gpu_activity",
    SmiGetVramUsage = 0x0825 => "amdsmi_get_vram_usage",
    SmiGetAsicInfo = 0x0830 => "amdsmi_get_asic_info",
}

impl OpCode {
    /// Raw wire value.
    #[inline]
    pub fn code(self) -> u16 {
        self as u16
    }

    /// Whether this opcode belongs to the telemetry range.
    #[inline]
    pub fn is_telemetry(self) -> bool {
        self.code() & 0xFF00 == 0x0800
    }
}

/// Log-friendly name for any raw opcode, known or not.
pub fn op_name(code: u16) -> &'static str {
    OpCode::try_from(code).map(OpCode::name).unwrap_or("unknown")
}
