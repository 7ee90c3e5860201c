//! Native-style call surface over a [`Session`].
//!
//! Each method builds its request record and picks a dispatch mode:
//! - calls that create something or return data go out synchronously
//! - side-effecting GPU work (frees, destroys, device copies, sets,
//!   launches, stream waits) is queued fire-and-forget
//! - host-to-device copies are fire-and-forget with inline data
//!
//! Errors of queued work surface on the next synchronous call, usually
//! [`RemoteGpu::device_synchronize`].

mod device;
mod memory;
mod module;
mod stream;
mod telemetry;

use dashmap::DashMap;

pub use module::{ArgCount, Dim3, LaunchConfig};

use super::config::ClientConfig;
use super::session::Session;
use crate::codec::{WireField, WireRecord};
use crate::protocol::{HipResult, OpCode, Reply};
use crate::transport::{Connector, TcpConnector};

/// Cached metadata of a resolved kernel function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FunctionEntry {
    module: u64,
    args: ArgCount,
}

/// Remote GPU runtime client.
pub struct RemoteGpu<C: Connector = TcpConnector> {
    session: Session<C>,
    functions: DashMap<u64, FunctionEntry>,
}

impl RemoteGpu<TcpConnector> {
    /// Client for the worker described by `config`.
    pub fn new(config: ClientConfig) -> Self {
        Self::from_session(Session::new(config))
    }

    /// Client configured from the `TF_*` environment.
    pub fn from_env() -> Self {
        Self::from_session(Session::from_env())
    }
}

impl<C: Connector> RemoteGpu<C> {
    pub fn with_connector(connector: C, config: ClientConfig) -> Self {
        Self::from_session(Session::with_connector(connector, config))
    }

    pub fn from_session(session: Session<C>) -> Self {
        Self {
            session,
            functions: DashMap::new(),
        }
    }

    /// Underlying session.
    pub fn session(&self) -> &Session<C> {
        &self.session
    }

    /// Send queued fire-and-forget work now.
    pub async fn flush(&self) -> HipResult<()> {
        self.session.flush().await
    }

    /// Flush, notify the worker, and close. The next call reconnects.
    pub async fn disconnect(&self) {
        self.session.disconnect().await;
        self.functions.clear();
    }

    /// Synchronous call decoding a `Reply<T>` body.
    async fn call<T>(&self, op: OpCode, req: &[u8]) -> HipResult<T>
    where
        T: WireField + Default,
    {
        let mut resp = vec![0u8; Reply::<T>::SIZE];
        self.session.request(op, req, &mut resp).await?;
        Ok(Reply::<T>::decode_padded(&resp).body)
    }

    /// Synchronous call with a code-only reply.
    async fn send(&self, op: OpCode, req: &[u8]) -> HipResult<()> {
        let mut resp = [0u8; 4];
        self.session.request(op, req, &mut resp).await
    }

    /// Fire-and-forget call.
    async fn post(&self, op: OpCode, req: &[u8]) -> HipResult<()> {
        self.session.enqueue_no_reply(op, req).await
    }
}
