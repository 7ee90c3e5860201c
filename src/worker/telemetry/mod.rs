//! Device telemetry.
//!
//! [`SmiLibrary`] is the boundary to the system-management library.
//! [`Telemetry`] owns the library and the processor table built at
//! initialization, and is shared by every connection of a worker.
//!
//! Initialization walks sockets, then the processors under each socket,
//! into one flat [`ProcessorTable`]. Clients address processors by their
//! index in that table. Any enumeration failure aborts initialization and
//! leaves telemetry unavailable.

mod sim;

use std::sync::{PoisonError, RwLock};

use tracing::{info, warn};

pub use sim::SimulatedSmi;

use crate::protocol::payload::{AsicInfo, ClockInfo, GpuActivity, GpuMetrics, PowerInfo, VramUsage};
use crate::protocol::{SmiResult, SmiStatus};

/// Queries of a system-management library. Handles are the library's
/// own values.
pub trait SmiLibrary: Send + Sync + 'static {
    fn init(&self, flags: u64) -> SmiResult<()>;
    fn shutdown(&self) -> SmiResult<()>;
    fn socket_handles(&self) -> SmiResult<Vec<u64>>;
    fn processor_handles(&self, socket: u64) -> SmiResult<Vec<u64>>;

    fn gpu_metrics(&self, processor: u64) -> SmiResult<GpuMetrics>;
    fn power_info(&self, processor: u64) -> SmiResult<PowerInfo>;
    fn clock_info(&self, processor: u64, clock_type: u32) -> SmiResult<ClockInfo>;
    /// Temperature in degrees Celsius.
    fn temp_metric(&self, processor: u64, sensor_type: u32) -> SmiResult<i64>;
    fn gpu_activity(&self, processor: u64) -> SmiResult<GpuActivity>;
    fn vram_usage(&self, processor: u64) -> SmiResult<VramUsage>;
    fn asic_info(&self, processor: u64) -> SmiResult<AsicInfo>;
}

/// Processor handles, in socket order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessorTable {
    handles: Vec<u64>,
}

impl ProcessorTable {
    /// Enumerate every processor of every socket.
    pub fn build<S: SmiLibrary + ?Sized>(library: &S) -> SmiResult<Self> {
        let mut handles = Vec::new();
        for socket in library.socket_handles()? {
            handles.extend(library.processor_handles(socket)?);
        }
        Ok(Self { handles })
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Handle at `index`; out of range is `NotFound`.
    pub fn get(&self, index: u32) -> SmiResult<u64> {
        self.handles
            .get(index as usize)
            .copied()
            .ok_or(SmiStatus::NotFound)
    }
}

/// Shared telemetry state.
pub struct Telemetry<S> {
    library: S,
    table: RwLock<Option<ProcessorTable>>,
}

impl<S: SmiLibrary> Telemetry<S> {
    /// Wrap `library`; nothing is initialized yet.
    pub fn new(library: S) -> Self {
        Self {
            library,
            table: RwLock::new(None),
        }
    }

    pub fn library(&self) -> &S {
        &self.library
    }

    pub fn is_initialized(&self) -> bool {
        self.table
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Initialize the library and build the processor table. A second call
    /// while initialized is a no-op.
    pub fn init(&self, flags: u64) -> SmiResult<()> {
        let mut table = self.table.write().unwrap_or_else(PoisonError::into_inner);
        if table.is_some() {
            return Ok(());
        }
        self.library.init(flags)?;
        match ProcessorTable::build(&self.library) {
            Ok(built) => {
                info!(processors = built.len(), "telemetry initialized");
                *table = Some(built);
                Ok(())
            }
            Err(status) => {
                warn!(?status, "processor enumeration failed");
                let _ = self.library.shutdown();
                Err(status)
            }
        }
    }

    /// Release the table and shut the library down. Shutting down while
    /// not initialized is a no-op.
    pub fn shutdown(&self) -> SmiResult<()> {
        let mut table = self.table.write().unwrap_or_else(PoisonError::into_inner);
        if table.take().is_some() {
            self.library.shutdown()?;
            info!("telemetry shut down");
        }
        Ok(())
    }

    pub fn processor_count(&self) -> SmiResult<u32> {
        self.with_table(|table| Ok(table.len() as u32))
    }

    /// Library handle of processor `index`.
    pub fn processor(&self, index: u32) -> SmiResult<u64> {
        self.with_table(|table| table.get(index))
    }

    /// Run `query` against processor `index` while the table is held.
    pub fn query<T>(&self, index: u32, query: impl FnOnce(&S, u64) -> SmiResult<T>) -> SmiResult<T> {
        self.with_table(|table| query(&self.library, table.get(index)?))
    }

    fn with_table<T>(&self, f: impl FnOnce(&ProcessorTable) -> SmiResult<T>) -> SmiResult<T> {
        let table = self.table.read().unwrap_or_else(PoisonError::into_inner);
        match table.as_ref() {
            Some(table) => f(table),
            None => Err(SmiStatus::NotInitialized),
        }
    }
}
