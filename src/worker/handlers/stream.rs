//! Streams and events.

use crate::protocol::payload::{
    EventCreateRequest, EventElapsedRequest, EventRecordRequest, EventRequest, StreamCreateRequest,
    StreamRequest, StreamWaitEventRequest,
};
use crate::protocol::HipResult;
use crate::worker::context::Response;
use crate::worker::dispatcher::{Connection, StreamEntry};
use crate::worker::runtime::GpuRuntime;
use crate::worker::telemetry::SmiLibrary;

impl<R: GpuRuntime, S: SmiLibrary> Connection<R, S> {
    /// Native stream for a client handle; 0 is the default stream.
    pub(crate) fn native_stream(&self, handle: u64) -> HipResult<u64> {
        if handle == 0 {
            return Ok(0);
        }
        self.streams.get(handle).map(|entry| entry.native)
    }

    fn native_event(&self, handle: u64) -> HipResult<u64> {
        self.events.get(handle).copied()
    }

    fn stream_entry(&self, handle: u64) -> HipResult<StreamEntry> {
        if handle == 0 {
            return Ok(StreamEntry {
                native: 0,
                flags: 0,
                priority: 0,
            });
        }
        self.streams.get(handle).copied()
    }

    pub(crate) fn stream_create(&mut self, req: StreamCreateRequest) -> Response {
        let result = self
            .runtime
            .stream_create(self.device, req.flags, req.priority)
            .map(|native| {
                self.streams.insert(StreamEntry {
                    native,
                    flags: req.flags,
                    priority: req.priority,
                })
            });
        Response::from_result(result)
    }

    pub(crate) fn stream_destroy(&mut self, req: StreamRequest) -> Response {
        let result = self
            .streams
            .get(req.stream)
            .map(|entry| entry.native)
            .and_then(|native| self.runtime.stream_destroy(native))
            .and_then(|()| self.streams.remove(req.stream).map(drop));
        Response::status(result)
    }

    /// Waits for the stream, or reports a deferred failure first.
    pub(crate) fn stream_synchronize(&mut self, req: StreamRequest) -> Response {
        if let Some(err) = self.deferred.take() {
            return Response::status(Err(err));
        }
        let result = self
            .native_stream(req.stream)
            .and_then(|native| self.runtime.stream_synchronize(native));
        Response::status(result)
    }

    pub(crate) fn stream_query(&mut self, req: StreamRequest) -> Response {
        let result = self
            .native_stream(req.stream)
            .and_then(|native| self.runtime.stream_query(native));
        Response::status(result)
    }

    pub(crate) fn stream_wait_event(&mut self, req: StreamWaitEventRequest) -> Response {
        let result = self.native_stream(req.stream).and_then(|stream| {
            let event = self.native_event(req.event)?;
            self.runtime.stream_wait_event(stream, event, req.flags)
        });
        Response::status(result)
    }

    pub(crate) fn stream_get_flags(&mut self, req: StreamRequest) -> Response {
        Response::from_result(self.stream_entry(req.stream).map(|entry| entry.flags))
    }

    pub(crate) fn stream_get_priority(&mut self, req: StreamRequest) -> Response {
        Response::from_result(self.stream_entry(req.stream).map(|entry| entry.priority))
    }

    pub(crate) fn event_create(&mut self, req: EventCreateRequest) -> Response {
        let result = self
            .runtime
            .event_create(req.flags)
            .map(|native| self.events.insert(native));
        Response::from_result(result)
    }

    pub(crate) fn event_destroy(&mut self, req: EventRequest) -> Response {
        let result = self
            .native_event(req.event)
            .and_then(|native| self.runtime.event_destroy(native))
            .and_then(|()| self.events.remove(req.event).map(drop));
        Response::status(result)
    }

    pub(crate) fn event_record(&mut self, req: EventRecordRequest) -> Response {
        let result = self.native_event(req.event).and_then(|event| {
            let stream = self.native_stream(req.stream)?;
            self.runtime.event_record(event, stream)
        });
        Response::status(result)
    }

    /// Waits for the event, or reports a deferred failure first.
    pub(crate) fn event_synchronize(&mut self, req: EventRequest) -> Response {
        if let Some(err) = self.deferred.take() {
            return Response::status(Err(err));
        }
        let result = self
            .native_event(req.event)
            .and_then(|native| self.runtime.event_synchronize(native));
        Response::status(result)
    }

    pub(crate) fn event_query(&mut self, req: EventRequest) -> Response {
        let result = self
            .native_event(req.event)
            .and_then(|native| self.runtime.event_query(native));
        Response::status(result)
    }

    pub(crate) fn event_elapsed_time(&mut self, req: EventElapsedRequest) -> Response {
        let result = self.native_event(req.start).and_then(|start| {
            let end = self.native_event(req.end)?;
            self.runtime.event_elapsed_ms(start, end)
        });
        Response::from_result(result)
    }
}
