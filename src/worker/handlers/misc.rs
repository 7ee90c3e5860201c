//! Error state, error strings and versions.

use crate::codec::FixedStr;
use crate::protocol::payload::{ErrorStringRequest, NAME_LEN};
use crate::protocol::{error_name, error_string};
use crate::worker::context::Response;
use crate::worker::dispatcher::Connection;
use crate::worker::runtime::GpuRuntime;
use crate::worker::telemetry::SmiLibrary;

impl<R: GpuRuntime, S: SmiLibrary> Connection<R, S> {
    /// Report and clear the deferred error.
    pub(crate) fn get_last_error(&mut self) -> Response {
        Response::status(self.deferred.take().map_or(Ok(()), Err))
    }

    /// Report the deferred error, leaving it set.
    pub(crate) fn peek_at_last_error(&mut self) -> Response {
        Response::status(self.deferred.map_or(Ok(()), Err))
    }

    pub(crate) fn get_error_name(&mut self, req: ErrorStringRequest) -> Response {
        Response::ok(FixedStr::<NAME_LEN>::from(error_name(req.code)))
    }

    pub(crate) fn get_error_string(&mut self, req: ErrorStringRequest) -> Response {
        Response::ok(FixedStr::<NAME_LEN>::from(error_string(req.code)))
    }

    pub(crate) fn runtime_get_version(&mut self) -> Response {
        Response::from_result(self.runtime.runtime_version())
    }

    pub(crate) fn driver_get_version(&mut self) -> Response {
        Response::from_result(self.runtime.driver_version())
    }
}
