//! Request handlers, one module per operation group.
//!
//! Each handler is a method on [`Connection`](super::dispatcher::Connection)
//! that validates client values against the connection's tables, calls the
//! runtime with native values and builds the [`Response`](super::context::Response).
//! Handlers never fail the connection; every error becomes a result code.

mod device;
mod memory;
mod misc;
mod module;
mod smi;
mod stream;

#[cfg(test)]
mod test_support {
    use std::sync::Arc;
    use std::time::Duration;

    use bytes::Bytes;

    use crate::codec::{WireField, WireRecord};
    use crate::protocol::{Frame, Header, OpCode, Reply};
    use crate::worker::context::Response;
    use crate::worker::dispatcher::Connection;
    use crate::worker::runtime::SimulatedRuntime;
    use crate::worker::telemetry::{SimulatedSmi, Telemetry};

    pub type TestConnection = Connection<SimulatedRuntime, SimulatedSmi>;

    pub fn connection(runtime: SimulatedRuntime) -> TestConnection {
        Connection::new(
            Arc::new(runtime),
            Arc::new(Telemetry::new(SimulatedSmi::new(2))),
            0,
            Duration::from_secs(5),
            "test",
        )
    }

    /// Dispatch one request and return the response.
    pub fn call(conn: &mut TestConnection, op: OpCode, frame_flags: u32, payload: &[u8]) -> Response {
        let header = Header::new(op.code(), 1, payload.len() as u32, frame_flags);
        conn.dispatch(&Frame::new(header, Bytes::copy_from_slice(payload)))
            .response
    }

    /// Dispatch and decode the reply body, panicking on failure.
    pub fn body<T: WireField + Default>(conn: &mut TestConnection, op: OpCode, payload: &[u8]) -> T {
        let response = call(conn, op, 0, payload);
        let reply = Reply::<T>::decode(&response.record).unwrap();
        assert_eq!(reply.code, 0, "{} failed", op.name());
        reply.body
    }
}
