//! Telemetry requests.
//!
//! Answers carry telemetry status codes, not runtime codes. Telemetry is
//! shared by every connection of the worker, so one client's `SMI_INIT`
//! serves all of them.

use crate::protocol::payload::{ClockRequest, ProcessorRequest, SmiInitRequest, TempRequest};
use crate::worker::context::Response;
use crate::worker::dispatcher::Connection;
use crate::worker::runtime::GpuRuntime;
use crate::worker::telemetry::SmiLibrary;

impl<R: GpuRuntime, S: SmiLibrary> Connection<R, S> {
    pub(crate) fn smi_init(&mut self, req: SmiInitRequest) -> Response {
        Response::from_smi(self.telemetry.init(req.init_flags))
    }

    pub(crate) fn smi_shutdown(&mut self) -> Response {
        Response::from_smi(self.telemetry.shutdown())
    }

    pub(crate) fn smi_processor_count(&mut self) -> Response {
        Response::from_smi(self.telemetry.processor_count())
    }

    pub(crate) fn smi_gpu_metrics(&mut self, req: ProcessorRequest) -> Response {
        Response::from_smi(self.telemetry.query(req.index, |smi, p| smi.gpu_metrics(p)))
    }

    pub(crate) fn smi_power_info(&mut self, req: ProcessorRequest) -> Response {
        Response::from_smi(self.telemetry.query(req.index, |smi, p| smi.power_info(p)))
    }

    pub(crate) fn smi_clock_info(&mut self, req: ClockRequest) -> Response {
        let result = self
            .telemetry
            .query(req.index, |smi, p| smi.clock_info(p, req.clock_type));
        Response::from_smi(result)
    }

    pub(crate) fn smi_temp_metric(&mut self, req: TempRequest) -> Response {
        let result = self
            .telemetry
            .query(req.index, |smi, p| smi.temp_metric(p, req.sensor_type));
        Response::from_smi(result)
    }

    pub(crate) fn smi_gpu_activity(&mut self, req: ProcessorRequest) -> Response {
        Response::from_smi(self.telemetry.query(req.index, |smi, p| smi.gpu_activity(p)))
    }

    pub(crate) fn smi_vram_usage(&mut self, req: ProcessorRequest) -> Response {
        Response::from_smi(self.telemetry.query(req.index, |smi, p| smi.vram_usage(p)))
    }

    pub(crate) fn smi_asic_info(&mut self, req: ProcessorRequest) -> Response {
        Response::from_smi(self.telemetry.query(req.index, |smi, p| smi.asic_info(p)))
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{body, call, connection};
    use super::*;
    use crate::codec::{WireField, WireRecord};
    use crate::protocol::payload::{AsicInfo, GpuMetrics, Reply};
    use crate::protocol::{OpCode, SmiStatus};
    use crate::worker::runtime::SimulatedRuntime;

    #[test]
    fn test_requires_init() {
        let mut conn = connection(SimulatedRuntime::new(1));
        let response = call(&mut conn, OpCode::SmiGetProcessorCount, 0, &[]);
        assert_eq!(response.code, SmiStatus::NotInitialized.code());

        let init = SmiInitRequest { init_flags: 2 }.encode();
        assert!(call(&mut conn, OpCode::SmiInit, 0, &init).is_success());
        assert_eq!(body::<u32>(&mut conn, OpCode::SmiGetProcessorCount, &[]), 2);

        assert!(call(&mut conn, OpCode::SmiShutdown, 0, &[]).is_success());
        assert!(call(&mut conn, OpCode::SmiShutdown, 0, &[]).is_success());
    }

    #[test]
    fn test_out_of_range_index_is_not_found() {
        let mut conn = connection(SimulatedRuntime::new(1));
        call(&mut conn, OpCode::SmiInit, 0, &SmiInitRequest::default().encode());

        let req = ProcessorRequest { index: 2 }.encode();
        let response = call(&mut conn, OpCode::SmiGetGpuMetrics, 0, &req);
        assert_eq!(response.code, 3);
        assert_eq!(response.record.len(), Reply::<GpuMetrics>::SIZE);

        let req = ProcessorRequest { index: 1 }.encode();
        let asic: AsicInfo = body(&mut conn, OpCode::SmiGetAsicInfo, &req);
        assert_eq!(asic.asic_serial.as_str(), "SIM0000000000001");
    }

    #[test]
    fn test_library_status_forwarded() {
        let mut conn = connection(SimulatedRuntime::new(1));
        call(&mut conn, OpCode::SmiInit, 0, &SmiInitRequest::default().encode());

        let temp = TempRequest {
            index: 0,
            sensor_type: 9,
        }
        .encode();
        let response = call(&mut conn, OpCode::SmiGetTempMetric, 0, &temp);
        assert_eq!(response.code, SmiStatus::NotSupported.code());

        let hotspot = TempRequest {
            index: 1,
            sensor_type: 1,
        }
        .encode();
        assert_eq!(body::<i64>(&mut conn, OpCode::SmiGetTempMetric, &hotspot), 56);

        let clock = ClockRequest {
            index: 0,
            clock_type: 7,
        }
        .encode();
        let response = call(&mut conn, OpCode::SmiGetClockInfo, 0, &clock);
        assert_eq!(response.code, SmiStatus::InvalidArgs.code());
    }
}
