//! One client connection.
//!
//! A [`Connection`] reads frames strictly in order, executes each one
//! against the runtime and answers it before reading the next:
//!
//! ```text
//! Idle -> ReadingHeader -> ReadingPayload -> Dispatching -> Idle ...
//!            |                  |
//!            +-- bad header ----+--> close (no handler runs)
//! ```
//!
//! Every resource the client creates is recorded in the connection's own
//! tables and released when the connection ends, however it ends.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, error, info, warn};

use super::context::{RequestContext, Response};
use super::handles::{HandleTable, ResourceTable, EVENT_TAG, FUNCTION_TAG, MODULE_TAG, STREAM_TAG};
use super::runtime::GpuRuntime;
use super::telemetry::{SmiLibrary, Telemetry};
use crate::error::{HipwireError, Result};
use crate::protocol::{Frame, FrameReader, HipError, OpCode, Request, SmiStatus};

/// A stream created by this connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct StreamEntry {
    pub native: u64,
    pub flags: u32,
    pub priority: i32,
}

/// A function resolved by this connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FunctionEntry {
    pub native: u64,
    /// Client handle of the owning module.
    pub module: u64,
    pub arity: Option<u32>,
}

/// Result of dispatching one frame.
#[derive(Debug)]
pub(crate) struct Dispatched {
    pub response: Response,
    /// Close the connection once the response is sent.
    pub close: bool,
}

/// Per-connection worker state.
pub struct Connection<R, S> {
    pub(crate) runtime: Arc<R>,
    pub(crate) telemetry: Arc<Telemetry<S>>,
    pub(crate) default_device: i32,
    pub(crate) device: i32,
    pub(crate) buffers: ResourceTable,
    pub(crate) streams: HandleTable<StreamEntry>,
    pub(crate) events: HandleTable<u64>,
    pub(crate) modules: HandleTable<u64>,
    pub(crate) functions: HandleTable<FunctionEntry>,
    /// First failure of a fire-and-forget request since it was last read.
    pub(crate) deferred: Option<HipError>,
    io_timeout: Duration,
    peer: String,
}

impl<R: GpuRuntime, S: SmiLibrary> Connection<R, S> {
    pub fn new(
        runtime: Arc<R>,
        telemetry: Arc<Telemetry<S>>,
        device: i32,
        io_timeout: Duration,
        peer: impl Into<String>,
    ) -> Self {
        Self {
            runtime,
            telemetry,
            default_device: device,
            device,
            buffers: ResourceTable::new(),
            streams: HandleTable::new(STREAM_TAG),
            events: HandleTable::new(EVENT_TAG),
            modules: HandleTable::new(MODULE_TAG),
            functions: HandleTable::new(FUNCTION_TAG),
            deferred: None,
            io_timeout,
            peer: peer.into(),
        }
    }

    /// Serve requests until the peer disconnects, sends `SHUTDOWN`, or
    /// violates the protocol. Resources are released in every case.
    ///
    /// Runtime calls block, so each frame is executed on the blocking pool
    /// while this task only moves bytes.
    pub async fn serve<T>(self, stream: T) -> Result<()>
    where
        T: AsyncRead + AsyncWrite + Unpin,
    {
        let io_timeout = self.io_timeout;
        let peer = self.peer.clone();
        let (rd, mut wr) = tokio::io::split(stream);
        let mut reader = FrameReader::new(rd)
            .untimed_idle()
            .with_io_timeout(io_timeout);
        let conn = Arc::new(Mutex::new(self));

        info!(peer = %peer, "client connected");
        let result = loop {
            let frame = match reader.read_frame().await {
                Ok(Some(frame)) => frame,
                Ok(None) => break Ok(()),
                Err(err) => break Err(err),
            };

            let ctx = RequestContext::for_frame(&frame);
            let Dispatched { response, close } = match run_blocking(&conn, move |c| c.dispatch(&frame)).await {
                Ok(dispatched) => dispatched,
                Err(err) => break Err(err),
            };
            if let Err(err) = ctx.respond(&mut wr, response, io_timeout).await {
                break Err(err);
            }
            if close {
                break Ok(());
            }
        };

        match &result {
            Ok(()) => info!(peer = %peer, "client disconnected"),
            Err(HipwireError::Protocol(msg)) => {
                warn!(peer = %peer, "closing connection: {}", msg)
            }
            Err(err) => error!(peer = %peer, "connection failed: {}", err),
        }
        if let Err(err) = run_blocking(&conn, |c| c.release_all()).await {
            error!(peer = %peer, "resource release failed: {}", err);
        }
        result
    }

    /// Decode and execute one frame.
    pub(crate) fn dispatch(&mut self, frame: &Frame) -> Dispatched {
        let no_reply = frame.is_no_reply();
        let Some(op) = frame.op() else {
            warn!(
                op_code = frame.op_code(),
                request_id = frame.request_id(),
                "unknown opcode"
            );
            let response = Response::code(HipError::NotSupported.code());
            if no_reply {
                self.defer(HipError::NotSupported);
            }
            return Dispatched {
                response,
                close: false,
            };
        };
        debug!(op = op.name(), request_id = frame.request_id(), no_reply, "request");

        let (response, close) = match Request::decode(op, frame) {
            Ok(request) => {
                let close = matches!(request, Request::Shutdown);
                (self.handle(request), close)
            }
            Err(err) => {
                warn!(op = op.name(), request_id = frame.request_id(), "rejected: {}", err);
                (Response::code(decode_failure_code(op)), false)
            }
        };

        if !response.is_success() {
            debug!(op = op.name(), code = response.code, "request failed");
            if no_reply && !op.is_telemetry() {
                self.defer(HipError::from_code(response.code));
            }
        }
        Dispatched { response, close }
    }

    fn handle(&mut self, request: Request) -> Response {
        match request {
            Request::Init => self.init(),
            Request::Shutdown | Request::Ping => Response::status(Ok(())),

            Request::GetDeviceCount => self.get_device_count(),
            Request::SetDevice(req) => self.set_device(req),
            Request::GetDevice => self.get_device(),
            Request::GetDeviceProperties(req) => self.get_device_properties(req),
            Request::DeviceSynchronize => self.device_synchronize(),
            Request::DeviceReset => self.device_reset(),
            Request::DeviceGetAttribute(req) => self.device_get_attribute(req),

            Request::Malloc(req, kind) => self.malloc(req, kind),
            Request::Free(req) => self.free(req),
            Request::Memcpy { request, kind, data } => self.memcpy(request, kind, data),
            Request::Memset(req, width) => self.memset(req, width),
            Request::MemGetInfo => self.mem_get_info(),

            Request::StreamCreate(req) => self.stream_create(req),
            Request::StreamDestroy(req) => self.stream_destroy(req),
            Request::StreamSynchronize(req) => self.stream_synchronize(req),
            Request::StreamQuery(req) => self.stream_query(req),
            Request::StreamWaitEvent(req) => self.stream_wait_event(req),
            Request::StreamGetFlags(req) => self.stream_get_flags(req),
            Request::StreamGetPriority(req) => self.stream_get_priority(req),

            Request::EventCreate(req) => self.event_create(req),
            Request::EventDestroy(req) => self.event_destroy(req),
            Request::EventRecord(req) => self.event_record(req),
            Request::EventSynchronize(req) => self.event_synchronize(req),
            Request::EventQuery(req) => self.event_query(req),
            Request::EventElapsedTime(req) => self.event_elapsed_time(req),

            Request::ModuleLoad { image } => self.module_load(&image),
            Request::ModuleUnload(req) => self.module_unload(req),
            Request::ModuleGetFunction(req) => self.module_get_function(req),
            Request::LaunchKernel(launch) => self.launch_kernel(launch),

            Request::GetLastError => self.get_last_error(),
            Request::PeekAtLastError => self.peek_at_last_error(),
            Request::GetErrorName(req) => self.get_error_name(req),
            Request::GetErrorString(req) => self.get_error_string(req),
            Request::RuntimeGetVersion => self.runtime_get_version(),
            Request::DriverGetVersion => self.driver_get_version(),

            Request::SmiInit(req) => self.smi_init(req),
            Request::SmiShutdown => self.smi_shutdown(),
            Request::SmiGetProcessorCount => self.smi_processor_count(),
            Request::SmiGetGpuMetrics(req) => self.smi_gpu_metrics(req),
            Request::SmiGetPowerInfo(req) => self.smi_power_info(req),
            Request::SmiGetClockInfo(req) => self.smi_clock_info(req),
            Request::SmiGetTempMetric(req) => self.smi_temp_metric(req),
            Request::SmiGetGpuActivity(req) => self.smi_gpu_activity(req),
            Request::SmiGetVramUsage(req) => self.smi_vram_usage(req),
            Request::SmiGetAsicInfo(req) => self.smi_asic_info(req),

            Request::Unsupported(op) => {
                debug!(op = op.name(), "operation not supported");
                Response::code(HipError::NotSupported.code())
            }
        }
    }

    /// Record the failure of a fire-and-forget request. The first one wins.
    pub(crate) fn defer(&mut self, err: HipError) {
        self.deferred.get_or_insert(err);
    }

    /// Release everything this connection still owns.
    pub(crate) fn release_all(&mut self) {
        let functions = self.functions.drain().len();
        let modules = self.modules.drain();
        let events = self.events.drain();
        let streams = self.streams.drain();
        let buffers = self.buffers.drain();
        if functions + modules.len() + events.len() + streams.len() + buffers.len() == 0 {
            return;
        }
        debug!(
            peer = %self.peer,
            buffers = buffers.len(),
            streams = streams.len(),
            events = events.len(),
            modules = modules.len(),
            "releasing connection resources"
        );

        for event in events {
            self.release("event", self.runtime.event_destroy(event));
        }
        for stream in streams {
            self.release("stream", self.runtime.stream_destroy(stream.native));
        }
        for module in modules {
            self.release("module", self.runtime.module_unload(module));
        }
        for ptr in buffers {
            self.release("buffer", self.runtime.free(ptr));
        }
    }

    fn release(&self, what: &str, result: crate::protocol::HipResult<()>) {
        if let Err(err) = result {
            warn!(peer = %self.peer, "failed to release {}: {}", what, err);
        }
    }
}

/// Run `f` against the connection on the blocking pool. A panic inside the
/// runtime surfaces as an I/O error and leaves the state usable for release.
async fn run_blocking<R, S, T, F>(conn: &Arc<Mutex<Connection<R, S>>>, f: F) -> Result<T>
where
    R: GpuRuntime,
    S: SmiLibrary,
    T: Send + 'static,
    F: FnOnce(&mut Connection<R, S>) -> T + Send + 'static,
{
    let conn = conn.clone();
    let task = tokio::task::spawn_blocking(move || {
        let mut guard = conn.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut *guard)
    });
    Ok(task.await.map_err(std::io::Error::from)?)
}

/// Result code for a request that could not be decoded.
fn decode_failure_code(op: OpCode) -> i32 {
    match op {
        OpCode::ModuleLoadData | OpCode::ModuleLoadDataEx => HipError::InvalidImage.code(),
        op if op.is_telemetry() => SmiStatus::InvalidArgs.code(),
        _ => HipError::InvalidValue.code(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::WireRecord;
    use crate::protocol::payload::{DeviceRequest, MallocRequest, Reply};
    use crate::protocol::{build_frame, flags, Header, HEADER_SIZE};
    use crate::worker::runtime::SimulatedRuntime;
    use crate::worker::telemetry::SimulatedSmi;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn connection() -> Connection<SimulatedRuntime, SimulatedSmi> {
        Connection::new(
            Arc::new(SimulatedRuntime::new(2)),
            Arc::new(Telemetry::new(SimulatedSmi::new(2))),
            0,
            Duration::from_secs(5),
            "test",
        )
    }

    fn frame(op: u16, frame_flags: u32, payload: &[u8]) -> Frame {
        let header = Header::new(op, 1, payload.len() as u32, frame_flags);
        Frame::new(header, bytes::Bytes::copy_from_slice(payload))
    }

    #[test]
    fn test_unknown_opcode_not_supported() {
        let mut conn = connection();
        let out = conn.dispatch(&frame(0x0999, 0, &[]));
        assert_eq!(out.response.code, HipError::NotSupported.code());
        assert!(!out.close);
    }

    #[test]
    fn test_decode_failures_map_per_group() {
        let mut conn = connection();
        let short = [1u8, 2];
        let out = conn.dispatch(&frame(OpCode::SetDevice.code(), 0, &short));
        assert_eq!(out.response.code, HipError::InvalidValue.code());

        let out = conn.dispatch(&frame(OpCode::ModuleLoadData.code(), 0, &short));
        assert_eq!(out.response.code, HipError::InvalidImage.code());

        let out = conn.dispatch(&frame(OpCode::SmiGetPowerInfo.code(), 0, &short));
        assert_eq!(out.response.code, 1);
    }

    #[test]
    fn test_failing_no_reply_request_is_deferred() {
        let mut conn = connection();
        let req = crate::protocol::payload::FreeRequest { ptr: 0xdead }.encode();
        conn.dispatch(&frame(OpCode::Free.code(), flags::NO_REPLY, &req));
        let bad_device = DeviceRequest { device_id: 9 }.encode();
        conn.dispatch(&frame(OpCode::SetDevice.code(), flags::NO_REPLY, &bad_device));
        assert_eq!(conn.deferred, Some(HipError::InvalidDevicePointer));

        // a failing synchronous request is answered, not deferred
        conn.deferred = None;
        conn.dispatch(&frame(OpCode::SetDevice.code(), 0, &bad_device));
        assert_eq!(conn.deferred, None);
    }

    #[test]
    fn test_shutdown_closes() {
        let mut conn = connection();
        let out = conn.dispatch(&frame(OpCode::Shutdown.code(), 0, &[]));
        assert!(out.close);
        assert!(out.response.is_success());
    }

    #[test]
    fn test_release_all_frees_runtime_resources() {
        let runtime = Arc::new(SimulatedRuntime::new(1));
        let mut conn = Connection::new(
            runtime.clone(),
            Arc::new(Telemetry::new(SimulatedSmi::new(1))),
            0,
            Duration::from_secs(5),
            "test",
        );
        let req = MallocRequest { size: 64, flags: 0 }.encode();
        for _ in 0..3 {
            assert!(conn.dispatch(&frame(OpCode::Malloc.code(), 0, &req)).response.is_success());
        }
        let stream = crate::protocol::payload::StreamCreateRequest { flags: 0, priority: 0 }.encode();
        conn.dispatch(&frame(OpCode::StreamCreate.code(), 0, &stream));
        assert_eq!(runtime.resource_counts().allocations, 3);
        assert_eq!(runtime.resource_counts().streams, 1);

        conn.release_all();
        assert_eq!(runtime.resource_counts(), Default::default());
        assert!(conn.buffers.is_empty());
    }

    #[tokio::test]
    async fn test_serve_answers_and_releases_on_close() {
        let runtime = Arc::new(SimulatedRuntime::new(2));
        let conn = Connection::new(
            runtime.clone(),
            Arc::new(Telemetry::new(SimulatedSmi::new(1))),
            0,
            Duration::from_secs(5),
            "duplex",
        );
        let (mut client, server) = tokio::io::duplex(64 * 1024);
        let task = tokio::spawn(conn.serve(server));

        let req = MallocRequest { size: 16, flags: 0 }.encode();
        let header = Header::new(OpCode::Malloc.code(), 7, req.len() as u32, 0);
        client.write_all(&build_frame(&header, &req)).await.unwrap();

        let mut head = [0u8; HEADER_SIZE];
        client.read_exact(&mut head).await.unwrap();
        let header = Header::decode(&head).unwrap();
        assert!(header.is_response());
        assert_eq!(header.request_id, 7);
        let mut body = vec![0u8; header.payload_length as usize];
        client.read_exact(&mut body).await.unwrap();
        let reply = Reply::<u64>::decode(&body).unwrap();
        assert_eq!(reply.code, 0);
        assert_ne!(reply.body, 0);
        assert_eq!(runtime.resource_counts().allocations, 1);

        drop(client);
        task.await.unwrap().unwrap();
        assert_eq!(runtime.resource_counts().allocations, 0);
    }

    #[tokio::test]
    async fn test_bad_magic_closes_without_dispatch() {
        let runtime = Arc::new(SimulatedRuntime::new(1));
        let conn = Connection::new(
            runtime.clone(),
            Arc::new(Telemetry::new(SimulatedSmi::new(1))),
            0,
            Duration::from_secs(5),
            "duplex",
        );
        let (mut client, server) = tokio::io::duplex(4096);
        let task = tokio::spawn(conn.serve(server));

        let req = MallocRequest { size: 16, flags: 0 }.encode();
        let header = Header::new(OpCode::Malloc.code(), 1, req.len() as u32, 0);
        let mut bytes = build_frame(&header, &req);
        bytes[0] ^= 0xFF;
        client.write_all(&bytes).await.unwrap();

        let result = task.await.unwrap();
        assert!(matches!(result, Err(HipwireError::Protocol(_))));
        assert_eq!(runtime.resource_counts().allocations, 0);

        let mut buf = [0u8; 1];
        assert_eq!(client.read(&mut buf).await.unwrap(), 0);
    }
}
