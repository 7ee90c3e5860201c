//! In-memory system-management library.
//!
//! Readings are fixed values offset by the processor's ordinal, so tests
//! can tell processors apart.

use std::sync::atomic::{AtomicBool, Ordering};

use super::SmiLibrary;
use crate::protocol::payload::{AsicInfo, ClockInfo, GpuActivity, GpuMetrics, PowerInfo, VramUsage};
use crate::protocol::{SmiResult, SmiStatus};

const SOCKET_BASE: u64 = 0x5000;
const PROCESSOR_BASE: u64 = 0x1000_0000;
const VRAM_TOTAL: u64 = 64 << 30;

/// Clock domains answered by [`SimulatedSmi::clock_info`].
const CLOCK_DOMAINS: u32 = 5;

/// Simulated telemetry library.
#[derive(Debug)]
pub struct SimulatedSmi {
    sockets: Vec<usize>,
    available: bool,
    initialized: AtomicBool,
}

impl SimulatedSmi {
    /// One socket holding `processors` processors.
    pub fn new(processors: usize) -> Self {
        Self::with_sockets(vec![processors])
    }

    /// One entry per socket, giving its processor count.
    pub fn with_sockets(sockets: Vec<usize>) -> Self {
        Self {
            sockets,
            available: true,
            initialized: AtomicBool::new(false),
        }
    }

    /// A library that fails to initialize.
    pub fn unavailable() -> Self {
        Self {
            sockets: Vec::new(),
            available: false,
            initialized: AtomicBool::new(false),
        }
    }

    fn ready(&self) -> SmiResult<()> {
        if self.initialized.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(SmiStatus::NotInitialized)
        }
    }

    /// Position of `processor` across all sockets.
    fn ordinal(&self, processor: u64) -> SmiResult<u32> {
        self.ready()?;
        let socket = ((processor.wrapping_sub(PROCESSOR_BASE)) >> 8) as usize;
        let local = (processor & 0xFF) as usize;
        if processor < PROCESSOR_BASE || socket >= self.sockets.len() || local >= self.sockets[socket] {
            return Err(SmiStatus::InvalidArgs);
        }
        let before: usize = self.sockets[..socket].iter().sum();
        Ok((before + local) as u32)
    }
}

impl SmiLibrary for SimulatedSmi {
    fn init(&self, _flags: u64) -> SmiResult<()> {
        if !self.available {
            return Err(SmiStatus::NotSupported);
        }
        self.initialized.store(true, Ordering::Release);
        Ok(())
    }

    fn shutdown(&self) -> SmiResult<()> {
        self.initialized.store(false, Ordering::Release);
        Ok(())
    }

    fn socket_handles(&self) -> SmiResult<Vec<u64>> {
        self.ready()?;
        Ok((0..self.sockets.len() as u64).map(|s| SOCKET_BASE + s).collect())
    }

    fn processor_handles(&self, socket: u64) -> SmiResult<Vec<u64>> {
        self.ready()?;
        let index = socket
            .checked_sub(SOCKET_BASE)
            .filter(|&s| (s as usize) < self.sockets.len())
            .ok_or(SmiStatus::InvalidArgs)?;
        let count = self.sockets[index as usize] as u64;
        Ok((0..count)
            .map(|p| PROCESSOR_BASE + (index << 8) + p)
            .collect())
    }

    fn gpu_metrics(&self, processor: u64) -> SmiResult<GpuMetrics> {
        let n = self.ordinal(processor)?;
        let vram = self.vram_usage(processor)?;
        Ok(GpuMetrics {
            temperature_edge: 45 + n as i32,
            temperature_hotspot: 55 + n as i32,
            temperature_mem: 50 + n as i32,
            average_socket_power: 150 + n,
            average_gfx_activity: 10 * (n % 10),
            average_umc_activity: 5,
            average_mm_activity: 0,
            current_gfxclk: 1700,
            current_uclk: 1600,
            current_socclk: 1200,
            vram_total: vram.vram_total,
            vram_used: vram.vram_used,
            fan_speed_rpm: 1200 + 10 * n,
            pcie_bandwidth: 32,
            throttle_status: 0,
            reserved: 0,
        })
    }

    fn power_info(&self, processor: u64) -> SmiResult<PowerInfo> {
        let n = self.ordinal(processor)?;
        Ok(PowerInfo {
            current_socket_power: 160 + n,
            average_socket_power: 150 + n,
            gfx_voltage: 850,
            soc_voltage: 900,
            mem_voltage: 1200,
            power_limit: 300,
        })
    }

    fn clock_info(&self, processor: u64, clock_type: u32) -> SmiResult<ClockInfo> {
        self.ordinal(processor)?;
        if clock_type >= CLOCK_DOMAINS {
            return Err(SmiStatus::InvalidArgs);
        }
        let base = 1000 + 100 * clock_type;
        Ok(ClockInfo {
            current_clk: base + 500,
            min_clk: base,
            max_clk: base + 1000,
            clk_locked: 0,
            clk_deep_sleep: 0,
            reserved: 0,
        })
    }

    fn temp_metric(&self, processor: u64, sensor_type: u32) -> SmiResult<i64> {
        let n = i64::from(self.ordinal(processor)?);
        // edge, hotspot, memory
        match sensor_type {
            0 => Ok(45 + n),
            1 => Ok(55 + n),
            2 => Ok(50 + n),
            _ => Err(SmiStatus::NotSupported),
        }
    }

    fn gpu_activity(&self, processor: u64) -> SmiResult<GpuActivity> {
        let n = self.ordinal(processor)?;
        Ok(GpuActivity {
            gfx_activity: 10 * (n % 10),
            umc_activity: 5,
            mm_activity: 0,
            reserved: 0,
        })
    }

    fn vram_usage(&self, processor: u64) -> SmiResult<VramUsage> {
        let n = u64::from(self.ordinal(processor)?);
        Ok(VramUsage {
            vram_total: VRAM_TOTAL,
            vram_used: (n + 1) << 30,
        })
    }

    fn asic_info(&self, processor: u64) -> SmiResult<AsicInfo> {
        let n = self.ordinal(processor)?;
        Ok(AsicInfo {
            market_name: "Simulated Instinct".into(),
            vendor_id: 0x1002,
            device_id: 0x740F,
            rev_id: 1,
            num_compute_units: 104,
            asic_serial: format!("SIM{:013}", n).into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queries_require_init() {
        let smi = SimulatedSmi::new(1);
        assert_eq!(smi.socket_handles(), Err(SmiStatus::NotInitialized));
        smi.init(0).unwrap();
        let socket = smi.socket_handles().unwrap()[0];
        let processor = smi.processor_handles(socket).unwrap()[0];
        assert_eq!(smi.temp_metric(processor, 0), Ok(45));
        smi.shutdown().unwrap();
        assert_eq!(smi.power_info(processor), Err(SmiStatus::NotInitialized));
    }

    #[test]
    fn test_ordinals_span_sockets() {
        let smi = SimulatedSmi::with_sockets(vec![1, 2]);
        smi.init(0).unwrap();
        let sockets = smi.socket_handles().unwrap();
        let last = *smi.processor_handles(sockets[1]).unwrap().last().unwrap();
        assert_eq!(smi.temp_metric(last, 0), Ok(47));
        assert_eq!(smi.asic_info(last).unwrap().asic_serial.as_str(), "SIM0000000000002");
        assert_eq!(smi.processor_handles(0x9999), Err(SmiStatus::InvalidArgs));
    }

    #[test]
    fn test_argument_validation() {
        let smi = SimulatedSmi::new(1);
        smi.init(0).unwrap();
        let p = smi.processor_handles(SOCKET_BASE).unwrap()[0];
        assert_eq!(smi.clock_info(p, CLOCK_DOMAINS), Err(SmiStatus::InvalidArgs));
        assert_eq!(smi.clock_info(p, 0).unwrap().min_clk, 1000);
        assert_eq!(smi.temp_metric(p, 7), Err(SmiStatus::NotSupported));
        assert_eq!(smi.gpu_metrics(p + 1), Err(SmiStatus::InvalidArgs));
    }
}
