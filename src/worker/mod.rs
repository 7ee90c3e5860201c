//! The worker: a TCP server executing requests on a local GPU runtime.
//!
//! - [`Worker`] binds the listener and spawns one task per connection
//! - [`Connection`] reads, dispatches and answers frames in order
//! - [`GpuRuntime`] and [`SmiLibrary`] are the native boundaries;
//!   [`SimulatedRuntime`] and [`SimulatedSmi`] implement them in memory
//!
//! ```no_run
//! use hipwire::worker::{SimulatedRuntime, SimulatedSmi, Worker, WorkerConfig};
//!
//! # async fn run() -> hipwire::Result<()> {
//! let worker = Worker::bind(WorkerConfig::default(), SimulatedRuntime::new(1), SimulatedSmi::new(1)).await?;
//! worker.run().await
//! # }
//! ```

mod context;
mod dispatcher;
mod handlers;
mod handles;
pub mod runtime;
mod server;
pub mod telemetry;

pub use context::{RequestContext, Response};
pub use dispatcher::Connection;
pub use handles::{Allocation, HandleTable, ResourceTable};
pub use runtime::{GpuRuntime, LaunchParams, LaunchRecord, ResolvedFunction, SimulatedRuntime};
pub use server::{shutdown_signal, Worker, WorkerConfig, DEFAULT_IO_TIMEOUT};
pub use telemetry::{ProcessorTable, SimulatedSmi, SmiLibrary, Telemetry};
