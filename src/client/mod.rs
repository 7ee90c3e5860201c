//! Client side: configuration, the session engine and the API surface.
//!
//! ```ignore
//! use hipwire::client::RemoteGpu;
//!
//! let gpu = RemoteGpu::from_env();
//! let buf = gpu.malloc(1024).await?;
//! gpu.memcpy_htod(buf, &[7u8; 1024]).await?;
//! let mut out = [0u8; 1024];
//! gpu.memcpy_dtoh(&mut out, buf).await?;
//! gpu.free(buf).await?;
//! gpu.device_synchronize().await?;
//! ```

mod api;
mod coalesce;
mod config;
mod session;

pub use api::{ArgCount, Dim3, LaunchConfig, RemoteGpu};
pub use coalesce::CoalesceBuffer;
pub use config::{
    ClientConfig, ClientConfigBuilder, DEFAULT_COALESCE_CAPACITY, DEFAULT_CONNECT_TIMEOUT, DEFAULT_IO_TIMEOUT,
};
pub use session::Session;
