//! Device management, error queries and versions.

use super::RemoteGpu;
use crate::codec::WireRecord;
use crate::protocol::payload::{AttributeRequest, DeviceProperties, DeviceRequest};
use crate::protocol::{error_name, error_string, HipResult, OpCode};
use crate::transport::Connector;

impl<C: Connector> RemoteGpu<C> {
    pub async fn get_device_count(&self) -> HipResult<i32> {
        self.call(OpCode::GetDeviceCount, &[]).await
    }

    /// Select the device for this connection.
    pub async fn set_device(&self, device: i32) -> HipResult<()> {
        let req = DeviceRequest { device_id: device };
        self.send(OpCode::SetDevice, &req.encode()).await
    }

    pub async fn get_device(&self) -> HipResult<i32> {
        self.call(OpCode::GetDevice, &[]).await
    }

    pub async fn get_device_properties(&self, device: i32) -> HipResult<DeviceProperties> {
        let req = DeviceRequest { device_id: device };
        self.call(OpCode::GetDeviceProperties, &req.encode()).await
    }

    pub async fn device_get_attribute(&self, attribute: i32, device: i32) -> HipResult<i32> {
        let req = AttributeRequest {
            device_id: device,
            attribute,
        };
        self.call(OpCode::DeviceGetAttribute, &req.encode()).await
    }

    /// Wait for all queued work. Returns the first error of any
    /// fire-and-forget call since the last synchronization.
    pub async fn device_synchronize(&self) -> HipResult<()> {
        self.send(OpCode::DeviceSynchronize, &[]).await
    }

    /// Reset the current device, releasing everything this connection owns
    /// on it.
    pub async fn device_reset(&self) -> HipResult<()> {
        self.send(OpCode::DeviceReset, &[]).await?;
        self.functions.clear();
        Ok(())
    }

    /// Return and clear the connection's last error.
    pub async fn get_last_error(&self) -> HipResult<()> {
        self.send(OpCode::GetLastError, &[]).await
    }

    /// Return the connection's last error without clearing it.
    pub async fn peek_at_last_error(&self) -> HipResult<()> {
        self.send(OpCode::PeekAtLastError, &[]).await
    }

    /// Symbolic name of a result code. Answered locally.
    pub fn get_error_name(&self, code: i32) -> &'static str {
        error_name(code)
    }

    /// Description of a result code. Answered locally.
    pub fn get_error_string(&self, code: i32) -> String {
        error_string(code)
    }

    pub async fn runtime_get_version(&self) -> HipResult<i32> {
        self.call(OpCode::RuntimeGetVersion, &[]).await
    }

    pub async fn driver_get_version(&self) -> HipResult<i32> {
        self.call(OpCode::DriverGetVersion, &[]).await
    }
}
