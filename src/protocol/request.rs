//! Decoded requests: one variant per supported operation.
//!
//! [`Request::decode`] turns a received frame into a typed request, checking
//! that the fixed record is complete and that every variable-length trailer
//! (inline copy data, code-object image, kernel arguments) fits inside the
//! payload actually received. Known opcodes that this crate does not execute
//! decode to [`Request::Unsupported`] so the dispatcher can still answer.

use bytes::Bytes;

use super::payload::*;
use super::wire_format::{MAX_ARG_SIZE, MAX_KERNEL_ARGS};
use super::{Frame, OpCode};
use crate::codec::{WireField, WireRecord};
use crate::error::{HipwireError, Result};

/// Allocation flavour, from the opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocKind {
    Device,
    Host,
    Managed,
    Async,
}

/// Element width for memory set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemsetWidth {
    /// Byte fill; `MEMSET`/`MEMSET_ASYNC`/`MEMSET_D8`.
    Byte,
    /// 16-bit pattern; `MEMSET_D16`.
    Half,
    /// 32-bit pattern; `MEMSET_D32`.
    Word,
}

impl MemsetWidth {
    /// Element size in bytes.
    pub fn bytes(self) -> u64 {
        match self {
            MemsetWidth::Byte => 1,
            MemsetWidth::Half => 2,
            MemsetWidth::Word => 4,
        }
    }
}

/// A decoded kernel launch.
#[derive(Debug, Clone, PartialEq)]
pub struct KernelLaunch {
    pub request: LaunchRequest,
    /// Argument bytes, one entry per descriptor, in order.
    pub args: Vec<Bytes>,
    pub cooperative: bool,
}

/// Every request the worker can execute.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Init,
    Shutdown,
    Ping,

    GetDeviceCount,
    SetDevice(DeviceRequest),
    GetDevice,
    GetDeviceProperties(DeviceRequest),
    DeviceSynchronize,
    DeviceReset,
    DeviceGetAttribute(AttributeRequest),

    Malloc(MallocRequest, AllocKind),
    Free(FreeRequest),
    /// Copy; `kind` already reflects the directional opcodes. `data` holds
    /// the host bytes of a host-to-device copy.
    Memcpy {
        request: MemcpyRequest,
        kind: MemcpyKind,
        data: Bytes,
    },
    Memset(MemsetRequest, MemsetWidth),
    MemGetInfo,

    StreamCreate(StreamCreateRequest),
    StreamDestroy(StreamRequest),
    StreamSynchronize(StreamRequest),
    StreamQuery(StreamRequest),
    StreamWaitEvent(StreamWaitEventRequest),
    StreamGetFlags(StreamRequest),
    StreamGetPriority(StreamRequest),

    EventCreate(EventCreateRequest),
    EventDestroy(EventRequest),
    EventRecord(EventRecordRequest),
    EventSynchronize(EventRequest),
    EventQuery(EventRequest),
    EventElapsedTime(EventElapsedRequest),

    /// Image bytes exactly as declared by `data_size`.
    ModuleLoad { image: Bytes },
    ModuleUnload(ModuleUnloadRequest),
    ModuleGetFunction(GetFunctionRequest),
    LaunchKernel(KernelLaunch),

    GetLastError,
    PeekAtLastError,
    GetErrorName(ErrorStringRequest),
    GetErrorString(ErrorStringRequest),
    RuntimeGetVersion,
    DriverGetVersion,

    SmiInit(SmiInitRequest),
    SmiShutdown,
    SmiGetProcessorCount,
    SmiGetGpuMetrics(ProcessorRequest),
    SmiGetPowerInfo(ProcessorRequest),
    SmiGetClockInfo(ClockRequest),
    SmiGetTempMetric(TempRequest),
    SmiGetGpuActivity(ProcessorRequest),
    SmiGetVramUsage(ProcessorRequest),
    SmiGetAsicInfo(ProcessorRequest),

    /// Known opcode without an implementation.
    Unsupported(OpCode),
}

impl Request {
    /// Decode the payload of `frame`, whose opcode is `op`.
    pub fn decode(op: OpCode, frame: &Frame) -> Result<Request> {
        let p = frame.payload();
        use OpCode as O;
        Ok(match op {
            O::Init => Request::Init,
            O::Shutdown => Request::Shutdown,
            O::Ping => Request::Ping,

            O::GetDeviceCount => Request::GetDeviceCount,
            O::SetDevice => Request::SetDevice(DeviceRequest::decode(p)?),
            O::GetDevice => Request::GetDevice,
            O::GetDeviceProperties => Request::GetDeviceProperties(DeviceRequest::decode(p)?),
            O::DeviceSynchronize => Request::DeviceSynchronize,
            O::DeviceReset => Request::DeviceReset,
            O::DeviceGetAttribute => Request::DeviceGetAttribute(AttributeRequest::decode(p)?),

            O::Malloc => Request::Malloc(MallocRequest::decode(p)?, AllocKind::Device),
            O::MallocHost => Request::Malloc(MallocRequest::decode(p)?, AllocKind::Host),
            O::MallocManaged => Request::Malloc(MallocRequest::decode(p)?, AllocKind::Managed),
            O::MallocAsync => Request::Malloc(MallocRequest::decode(p)?, AllocKind::Async),
            O::Free | O::FreeHost | O::FreeAsync => Request::Free(FreeRequest::decode(p)?),

            O::Memcpy | O::MemcpyAsync => decode_memcpy(frame, None)?,
            O::MemcpyHtoD | O::MemcpyHtoDAsync => decode_memcpy(frame, Some(MemcpyKind::HostToDevice))?,
            O::MemcpyDtoH | O::MemcpyDtoHAsync => decode_memcpy(frame, Some(MemcpyKind::DeviceToHost))?,
            O::MemcpyDtoD | O::MemcpyDtoDAsync => {
                decode_memcpy(frame, Some(MemcpyKind::DeviceToDevice))?
            }

            O::Memset | O::MemsetAsync | O::MemsetD8 => {
                Request::Memset(MemsetRequest::decode(p)?, MemsetWidth::Byte)
            }
            O::MemsetD16 => Request::Memset(MemsetRequest::decode(p)?, MemsetWidth::Half),
            O::MemsetD32 => Request::Memset(MemsetRequest::decode(p)?, MemsetWidth::Word),
            O::MemGetInfo => Request::MemGetInfo,

            O::StreamCreate | O::StreamCreateWithFlags | O::StreamCreateWithPriority => {
                Request::StreamCreate(StreamCreateRequest::decode(p)?)
            }
            O::StreamDestroy => Request::StreamDestroy(StreamRequest::decode(p)?),
            O::StreamSynchronize => Request::StreamSynchronize(StreamRequest::decode(p)?),
            O::StreamQuery => Request::StreamQuery(StreamRequest::decode(p)?),
            O::StreamWaitEvent => Request::StreamWaitEvent(StreamWaitEventRequest::decode(p)?),
            O::StreamGetFlags => Request::StreamGetFlags(StreamRequest::decode(p)?),
            O::StreamGetPriority => Request::StreamGetPriority(StreamRequest::decode(p)?),

            O::EventCreate | O::EventCreateWithFlags => {
                Request::EventCreate(EventCreateRequest::decode(p)?)
            }
            O::EventDestroy => Request::EventDestroy(EventRequest::decode(p)?),
            O::EventRecord => Request::EventRecord(EventRecordRequest::decode(p)?),
            O::EventSynchronize => Request::EventSynchronize(EventRequest::decode(p)?),
            O::EventQuery => Request::EventQuery(EventRequest::decode(p)?),
            O::EventElapsedTime => Request::EventElapsedTime(EventElapsedRequest::decode(p)?),

            O::ModuleLoadData | O::ModuleLoadDataEx => decode_module_load(frame)?,
            O::ModuleUnload => Request::ModuleUnload(ModuleUnloadRequest::decode(p)?),
            O::ModuleGetFunction => Request::ModuleGetFunction(GetFunctionRequest::decode(p)?),

            O::LaunchKernel | O::ModuleLaunchKernel => decode_launch(frame, false)?,
            O::LaunchCooperativeKernel => decode_launch(frame, true)?,

            O::GetLastError => Request::GetLastError,
            O::PeekAtLastError => Request::PeekAtLastError,
            O::GetErrorName => Request::GetErrorName(ErrorStringRequest::decode(p)?),
            O::GetErrorString => Request::GetErrorString(ErrorStringRequest::decode(p)?),
            O::RuntimeGetVersion => Request::RuntimeGetVersion,
            O::DriverGetVersion => Request::DriverGetVersion,

            O::SmiInit => Request::SmiInit(SmiInitRequest::decode(p)?),
            O::SmiShutdown => Request::SmiShutdown,
            O::SmiGetProcessorCount => Request::SmiGetProcessorCount,
            O::SmiGetGpuMetrics => Request::SmiGetGpuMetrics(ProcessorRequest::decode(p)?),
            O::SmiGetPowerInfo => Request::SmiGetPowerInfo(ProcessorRequest::decode(p)?),
            O::SmiGetClockInfo => Request::SmiGetClockInfo(ClockRequest::decode(p)?),
            O::SmiGetTempMetric => Request::SmiGetTempMetric(TempRequest::decode(p)?),
            O::SmiGetGpuActivity => Request::SmiGetGpuActivity(ProcessorRequest::decode(p)?),
            O::SmiGetVramUsage => Request::SmiGetVramUsage(ProcessorRequest::decode(p)?),
            O::SmiGetAsicInfo => Request::SmiGetAsicInfo(ProcessorRequest::decode(p)?),

            O::Memcpy2D
            | O::Memcpy2DAsync
            | O::Memcpy3D
            | O::Memcpy3DAsync
            | O::PointerGetAttributes
            | O::ModuleGetGlobal => Request::Unsupported(op),
        })
    }
}

fn validation(msg: String) -> HipwireError {
    HipwireError::Validation(msg)
}

fn decode_memcpy(frame: &Frame, implied: Option<MemcpyKind>) -> Result<Request> {
    let request = MemcpyRequest::decode(frame.payload())?;
    let kind = match implied {
        Some(kind) => kind,
        None => MemcpyKind::try_from(request.kind)
            .map_err(|k| validation(format!("unknown memcpy kind {}", k)))?,
    };

    let data = if kind == MemcpyKind::HostToDevice {
        if !frame.has_inline_data() {
            return Err(validation("host-to-device copy without inline data".into()));
        }
        let trailer = frame.payload.slice(MemcpyRequest::SIZE..);
        let size = usize::try_from(request.size)
            .map_err(|_| validation(format!("copy size {} too large", request.size)))?;
        if trailer.len() < size {
            return Err(validation(format!(
                "copy declares {} bytes, {} received",
                size,
                trailer.len()
            )));
        }
        trailer.slice(..size)
    } else {
        Bytes::new()
    };

    Ok(Request::Memcpy { request, kind, data })
}

fn decode_module_load(frame: &Frame) -> Result<Request> {
    let request = ModuleLoadRequest::decode(frame.payload())?;
    let trailer = frame.payload.len() - ModuleLoadRequest::SIZE;
    if request.data_size == 0 || request.data_size > trailer as u64 {
        return Err(validation(format!(
            "module image declares {} bytes, {} received",
            request.data_size, trailer
        )));
    }
    let end = ModuleLoadRequest::SIZE + request.data_size as usize;
    Ok(Request::ModuleLoad {
        image: frame.payload.slice(ModuleLoadRequest::SIZE..end),
    })
}

fn decode_launch(frame: &Frame, cooperative: bool) -> Result<Request> {
    let payload = &frame.payload;
    let request = LaunchRequest::decode(payload)?;
    let num_args = request.num_args as usize;
    if num_args > MAX_KERNEL_ARGS {
        return Err(validation(format!(
            "{} kernel arguments exceeds maximum {}",
            num_args, MAX_KERNEL_ARGS
        )));
    }

    let table_end = LaunchRequest::SIZE + num_args * KernelArg::SIZE;
    if payload.len() < table_end {
        return Err(validation(format!(
            "argument table needs {} bytes, {} received",
            table_end,
            payload.len()
        )));
    }

    let data = payload.slice(table_end..);
    let mut table = &payload[LaunchRequest::SIZE..table_end];
    let mut args = Vec::with_capacity(num_args);
    for index in 0..num_args {
        let arg = KernelArg::get(&mut table);
        let (offset, size) = (arg.offset as usize, arg.size as usize);
        if size > MAX_ARG_SIZE {
            return Err(validation(format!(
                "argument {} is {} bytes, maximum {}",
                index, size, MAX_ARG_SIZE
            )));
        }
        let end = offset
            .checked_add(size)
            .filter(|&end| end <= data.len())
            .ok_or_else(|| {
                validation(format!(
                    "argument {} at {}+{} outside {} data bytes",
                    index,
                    offset,
                    size,
                    data.len()
                ))
            })?;
        args.push(data.slice(offset..end));
    }

    Ok(Request::LaunchKernel(KernelLaunch {
        request,
        args,
        cooperative,
    }))
}
