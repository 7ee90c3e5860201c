//! Connection setup and device management.

use tracing::{debug, info};

use crate::protocol::payload::{AttributeRequest, DeviceRequest};
use crate::worker::context::Response;
use crate::worker::dispatcher::Connection;
use crate::worker::runtime::GpuRuntime;
use crate::worker::telemetry::SmiLibrary;

impl<R: GpuRuntime, S: SmiLibrary> Connection<R, S> {
    /// Handshake: select the worker's default device for this connection.
    pub(crate) fn init(&mut self) -> Response {
        let device = self.default_device;
        let result = self.runtime.set_device(device).map(|()| self.device = device);
        if result.is_ok() {
            info!(device, "connection initialized");
        }
        Response::status(result)
    }

    pub(crate) fn get_device_count(&mut self) -> Response {
        Response::from_result(self.runtime.device_count())
    }

    pub(crate) fn set_device(&mut self, req: DeviceRequest) -> Response {
        let result = self
            .runtime
            .set_device(req.device_id)
            .map(|()| self.device = req.device_id);
        Response::status(result)
    }

    pub(crate) fn get_device(&mut self) -> Response {
        Response::ok(self.device)
    }

    pub(crate) fn get_device_properties(&mut self, req: DeviceRequest) -> Response {
        Response::from_result(self.runtime.device_properties(req.device_id))
    }

    pub(crate) fn device_get_attribute(&mut self, req: AttributeRequest) -> Response {
        Response::from_result(self.runtime.device_attribute(req.device_id, req.attribute))
    }

    /// Wait for the device. A deferred failure is then reported (and
    /// cleared) ahead of the wait's own result.
    pub(crate) fn device_synchronize(&mut self) -> Response {
        let waited = self.runtime.device_synchronize(self.device);
        match self.deferred.take() {
            Some(err) => Response::status(Err(err)),
            None => Response::status(waited),
        }
    }

    /// Drop everything this connection owns and clear its error state.
    pub(crate) fn device_reset(&mut self) -> Response {
        debug!(device = self.device, "device reset");
        self.release_all();
        self.deferred = None;
        Response::status(self.runtime.device_synchronize(self.device))
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{body, call, connection};
    use crate::codec::{FixedStr, WireRecord};
    use crate::protocol::payload::{AttributeRequest, DeviceProperties, DeviceRequest, MallocRequest, NAME_LEN};
    use crate::protocol::{flags, HipError, OpCode};
    use crate::worker::runtime::{attribute, SimulatedRuntime};

    #[test]
    fn test_device_selection() {
        let mut conn = connection(SimulatedRuntime::new(2));
        assert_eq!(body::<i32>(&mut conn, OpCode::GetDeviceCount, &[]), 2);

        let req = DeviceRequest { device_id: 1 }.encode();
        assert!(call(&mut conn, OpCode::SetDevice, 0, &req).is_success());
        assert_eq!(body::<i32>(&mut conn, OpCode::GetDevice, &[]), 1);

        let bad = DeviceRequest { device_id: 2 }.encode();
        let response = call(&mut conn, OpCode::SetDevice, 0, &bad);
        assert_eq!(response.code, HipError::InvalidDevice.code());
        assert_eq!(body::<i32>(&mut conn, OpCode::GetDevice, &[]), 1);

        assert!(call(&mut conn, OpCode::Init, 0, &[]).is_success());
        assert_eq!(body::<i32>(&mut conn, OpCode::GetDevice, &[]), 0);
    }

    #[test]
    fn test_properties_and_attributes() {
        let mut conn = connection(SimulatedRuntime::new(1));
        let req = DeviceRequest { device_id: 0 }.encode();
        let props: DeviceProperties = body(&mut conn, OpCode::GetDeviceProperties, &req);
        assert_eq!(props.name, FixedStr::<NAME_LEN>::from("Simulated GPU 0"));

        let req = AttributeRequest {
            device_id: 0,
            attribute: attribute::WARP_SIZE,
        }
        .encode();
        assert_eq!(body::<i32>(&mut conn, OpCode::DeviceGetAttribute, &req), props.warp_size);
    }

    #[test]
    fn test_synchronize_reports_deferred_error_once() {
        let mut conn = connection(SimulatedRuntime::new(1));
        let free = crate::protocol::payload::FreeRequest { ptr: 0x1234 }.encode();
        call(&mut conn, OpCode::Free, flags::NO_REPLY, &free);

        let first = call(&mut conn, OpCode::DeviceSynchronize, 0, &[]);
        assert_eq!(first.code, HipError::InvalidDevicePointer.code());
        assert!(call(&mut conn, OpCode::DeviceSynchronize, 0, &[]).is_success());
    }

    #[test]
    fn test_synchronize_waits_before_reporting_deferred_error() {
        let mut conn = connection(SimulatedRuntime::new(1));
        conn.deferred = Some(HipError::LaunchFailure);

        let response = call(&mut conn, OpCode::DeviceSynchronize, 0, &[]);
        assert_eq!(response.code, HipError::LaunchFailure.code());
        assert_eq!(conn.runtime.device_synchronizations(), 1);
        assert_eq!(conn.deferred, None);
    }

    #[test]
    fn test_reset_releases_resources() {
        let mut conn = connection(SimulatedRuntime::new(1));
        let req = MallocRequest { size: 32, flags: 0 }.encode();
        body::<u64>(&mut conn, OpCode::Malloc, &req);
        conn.deferred = Some(HipError::LaunchFailure);

        assert!(call(&mut conn, OpCode::DeviceReset, 0, &[]).is_success());
        assert!(conn.buffers.is_empty());
        assert_eq!(conn.deferred, None);
        assert_eq!(conn.runtime.resource_counts().allocations, 0);
    }
}
