//! Streams and events.

use super::RemoteGpu;
use crate::codec::WireRecord;
use crate::protocol::payload::{
    EventCreateRequest, EventElapsedRequest, EventRecordRequest, EventRequest, StreamCreateRequest,
    StreamRequest, StreamWaitEventRequest,
};
use crate::protocol::{HipResult, OpCode};
use crate::transport::Connector;

impl<C: Connector> RemoteGpu<C> {
    pub async fn stream_create(&self) -> HipResult<u64> {
        self.create_stream(OpCode::StreamCreate, 0, 0).await
    }

    pub async fn stream_create_with_flags(&self, flags: u32) -> HipResult<u64> {
        self.create_stream(OpCode::StreamCreateWithFlags, flags, 0).await
    }

    pub async fn stream_create_with_priority(&self, flags: u32, priority: i32) -> HipResult<u64> {
        self.create_stream(OpCode::StreamCreateWithPriority, flags, priority)
            .await
    }

    async fn create_stream(&self, op: OpCode, flags: u32, priority: i32) -> HipResult<u64> {
        let req = StreamCreateRequest { flags, priority };
        self.call(op, &req.encode()).await
    }

    /// Destroy a stream (fire-and-forget).
    pub async fn stream_destroy(&self, stream: u64) -> HipResult<()> {
        self.post(OpCode::StreamDestroy, &StreamRequest { stream }.encode())
            .await
    }

    pub async fn stream_synchronize(&self, stream: u64) -> HipResult<()> {
        self.send(OpCode::StreamSynchronize, &StreamRequest { stream }.encode())
            .await
    }

    /// `Ok` when the stream is idle, `Err(NotReady)` while work is pending.
    pub async fn stream_query(&self, stream: u64) -> HipResult<()> {
        self.send(OpCode::StreamQuery, &StreamRequest { stream }.encode())
            .await
    }

    /// Make `stream` wait for `event` (fire-and-forget).
    pub async fn stream_wait_event(&self, stream: u64, event: u64, flags: u32) -> HipResult<()> {
        let req = StreamWaitEventRequest { stream, event, flags };
        self.post(OpCode::StreamWaitEvent, &req.encode()).await
    }

    pub async fn stream_get_flags(&self, stream: u64) -> HipResult<u32> {
        self.call(OpCode::StreamGetFlags, &StreamRequest { stream }.encode())
            .await
    }

    pub async fn stream_get_priority(&self, stream: u64) -> HipResult<i32> {
        self.call(OpCode::StreamGetPriority, &StreamRequest { stream }.encode())
            .await
    }

    pub async fn event_create(&self) -> HipResult<u64> {
        self.call(OpCode::EventCreate, &EventCreateRequest { flags: 0 }.encode())
            .await
    }

    pub async fn event_create_with_flags(&self, flags: u32) -> HipResult<u64> {
        self.call(OpCode::EventCreateWithFlags, &EventCreateRequest { flags }.encode())
            .await
    }

    /// Destroy an event (fire-and-forget).
    pub async fn event_destroy(&self, event: u64) -> HipResult<()> {
        self.post(OpCode::EventDestroy, &EventRequest { event }.encode())
            .await
    }

    /// Record `event` on `stream` (fire-and-forget).
    pub async fn event_record(&self, event: u64, stream: u64) -> HipResult<()> {
        self.post(OpCode::EventRecord, &EventRecordRequest { event, stream }.encode())
            .await
    }

    pub async fn event_synchronize(&self, event: u64) -> HipResult<()> {
        self.send(OpCode::EventSynchronize, &EventRequest { event }.encode())
            .await
    }

    pub async fn event_query(&self, event: u64) -> HipResult<()> {
        self.send(OpCode::EventQuery, &EventRequest { event }.encode())
            .await
    }

    /// Milliseconds between two recorded events.
    pub async fn event_elapsed_time(&self, start: u64, end: u64) -> HipResult<f32> {
        self.call(OpCode::EventElapsedTime, &EventElapsedRequest { start, end }.encode())
            .await
    }
}
