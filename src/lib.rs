//! # hipwire
//!
//! Remote execution of GPU compute runtime calls over TCP.
//!
//! A client process without a local GPU issues runtime calls through
//! [`RemoteGpu`]; a worker on a GPU host executes them and answers.
//!
//! ## Architecture
//!
//! - **Data plane** (TCP): 20-byte header + packed little-endian records,
//!   strictly ordered per connection
//! - **Fire-and-forget**: calls with no result are coalesced on the client
//!   and sent in one write; their failures surface at the next
//!   synchronization
//! - **Control plane** (worker stdout): one JSON ready line
//!
//! ## Example
//!
//! ```no_run
//! use hipwire::{ClientConfig, RemoteGpu};
//!
//! # async fn run() -> hipwire::protocol::HipResult<()> {
//! let gpu = RemoteGpu::new(ClientConfig::builder().host("gpu-host").build());
//! let ptr = gpu.malloc(1024).await?;
//! gpu.memcpy_htod(ptr, &[0u8; 1024]).await?;
//! gpu.device_synchronize().await?;
//! gpu.free(ptr).await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod codec;
pub mod control;
pub mod error;
pub mod protocol;
pub mod transport;
pub mod worker;

pub use client::{ArgCount, ClientConfig, Dim3, LaunchConfig, RemoteGpu, Session};
pub use error::{HipwireError, Result};
pub use protocol::{HipError, HipResult, SmiResult, SmiStatus};
pub use worker::{SimulatedRuntime, SimulatedSmi, Worker, WorkerConfig};

/// Environment variable holding a `tracing` filter directive.
pub const LOG_ENV: &str = "HIPWIRE_LOG";

/// Default filter: `debug` when `debug` is set, `info` otherwise.
pub fn default_log_filter(debug: bool) -> &'static str {
    if debug {
        "hipwire=debug"
    } else {
        "hipwire=info"
    }
}

/// Install a stderr `tracing` subscriber for a client process.
///
/// `HIPWIRE_LOG` wins when set; otherwise `TF_DEBUG=1` selects debug
/// output. Does nothing when a subscriber is already installed.
pub fn init_logging() {
    let debug = ClientConfig::global().debug;
    let filter = tracing_subscriber::EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_log_filter(debug)));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
