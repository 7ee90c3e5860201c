//! Telemetry queries.
//!
//! Results use the telemetry status vocabulary. Transport failures map to
//! [`SmiStatus::IoError`]; a malformed exchange maps to
//! [`SmiStatus::ApiFailed`].

use super::RemoteGpu;
use crate::codec::{WireField, WireRecord};
use crate::error::HipwireError;
use crate::protocol::payload::{
    AsicInfo, ClockInfo, ClockRequest, GpuActivity, GpuMetrics, PowerInfo, ProcessorRequest, SmiInitRequest,
    TempRequest, VramUsage,
};
use crate::protocol::{OpCode, Reply, SmiResult, SmiStatus};
use crate::transport::Connector;

fn transport_status(err: HipwireError) -> SmiStatus {
    match err {
        HipwireError::Io(_) | HipwireError::Timeout(_) | HipwireError::ConnectionClosed => SmiStatus::IoError,
        _ => SmiStatus::ApiFailed,
    }
}

impl<C: Connector> RemoteGpu<C> {
    async fn smi_call<T>(&self, op: OpCode, req: &[u8]) -> SmiResult<T>
    where
        T: WireField + Default,
    {
        let mut resp = vec![0u8; Reply::<T>::SIZE];
        let code = self
            .session
            .request_code(op, req, &mut resp)
            .await
            .map_err(transport_status)?;
        SmiStatus::check(code)?;
        Ok(Reply::<T>::decode_padded(&resp).body)
    }

    async fn smi_query<T>(&self, op: OpCode, index: u32) -> SmiResult<T>
    where
        T: WireField + Default,
    {
        self.smi_call(op, &ProcessorRequest { index }.encode()).await
    }

    /// Initialize the worker's telemetry library. Succeeds if it is already
    /// initialized.
    pub async fn smi_init(&self, init_flags: u64) -> SmiResult<()> {
        self.smi_call(OpCode::SmiInit, &SmiInitRequest { init_flags }.encode())
            .await
    }

    pub async fn smi_shutdown(&self) -> SmiResult<()> {
        self.smi_call(OpCode::SmiShutdown, &[]).await
    }

    /// Number of processors; valid indices are `0..count`.
    pub async fn smi_processor_count(&self) -> SmiResult<u32> {
        self.smi_call(OpCode::SmiGetProcessorCount, &[]).await
    }

    pub async fn smi_gpu_metrics(&self, index: u32) -> SmiResult<GpuMetrics> {
        self.smi_query(OpCode::SmiGetGpuMetrics, index).await
    }

    pub async fn smi_power_info(&self, index: u32) -> SmiResult<PowerInfo> {
        self.smi_query(OpCode::SmiGetPowerInfo, index).await
    }

    pub async fn smi_clock_info(&self, index: u32, clock_type: u32) -> SmiResult<ClockInfo> {
        let req = ClockRequest { index, clock_type };
        self.smi_call(OpCode::SmiGetClockInfo, &req.encode()).await
    }

    /// Temperature of one sensor, in degrees Celsius.
    pub async fn smi_temp_metric(&self, index: u32, sensor_type: u32) -> SmiResult<i64> {
        let req = TempRequest { index, sensor_type };
        self.smi_call(OpCode::SmiGetTempMetric, &req.encode()).await
    }

    pub async fn smi_gpu_activity(&self, index: u32) -> SmiResult<GpuActivity> {
        self.smi_query(OpCode::SmiGetGpuActivity, index).await
    }

    pub async fn smi_vram_usage(&self, index: u32) -> SmiResult<VramUsage> {
        self.smi_query(OpCode::SmiGetVramUsage, index).await
    }

    pub async fn smi_asic_info(&self, index: u32) -> SmiResult<AsicInfo> {
        self.smi_query(OpCode::SmiGetAsicInfo, index).await
    }
}
