//! TCP listener and connection tasks.
//!
//! The worker accepts connections until its shutdown future resolves. Each
//! connection runs in its own task with its own handle tables; the runtime
//! and telemetry are shared.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use super::dispatcher::Connection;
use super::runtime::GpuRuntime;
use super::telemetry::{SmiLibrary, Telemetry};
use crate::error::Result;
use crate::protocol::DEFAULT_PORT;
use crate::transport::{configure_stream, describe_io_error};

/// Default socket I/O timeout once a frame has started.
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(60);

/// Listener settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    pub bind: String,
    pub port: u16,
    /// Device selected by each connection's INIT.
    pub device: i32,
    pub io_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            device: 0,
            io_timeout: DEFAULT_IO_TIMEOUT,
        }
    }
}

/// A bound worker.
pub struct Worker<R, S> {
    listener: TcpListener,
    runtime: Arc<R>,
    telemetry: Arc<Telemetry<S>>,
    config: WorkerConfig,
}

impl<R: GpuRuntime, S: SmiLibrary> Worker<R, S> {
    /// Bind the listener. Port 0 picks a free port; see [`Worker::local_addr`].
    pub async fn bind(config: WorkerConfig, runtime: R, library: S) -> Result<Self> {
        let listener = TcpListener::bind((config.bind.as_str(), config.port)).await?;
        info!(address = %listener.local_addr()?, device = config.device, "worker listening");
        Ok(Self {
            listener,
            runtime: Arc::new(runtime),
            telemetry: Arc::new(Telemetry::new(library)),
            config,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn runtime(&self) -> &Arc<R> {
        &self.runtime
    }

    pub fn telemetry(&self) -> &Arc<Telemetry<S>> {
        &self.telemetry
    }

    /// Serve until Ctrl-C or SIGTERM.
    pub async fn run(self) -> Result<()> {
        self.run_until(shutdown_signal()).await
    }

    /// Serve until `shutdown` resolves. Connections already accepted keep
    /// running in their own tasks.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        if let Err(err) = configure_stream(&stream) {
                            warn!(%peer, "failed to configure socket: {}", err);
                        }
                        let task = self.serve_connection(stream, peer.to_string());
                        tokio::spawn(async move {
                            if let Err(err) = task.await {
                                debug!(%peer, "connection ended: {}", err);
                            }
                        });
                    }
                    Err(err) => {
                        warn!("accept failed: {}", describe_io_error(&err));
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                },
            }
        }

        info!("worker shutting down");
        if let Err(status) = self.telemetry.shutdown() {
            warn!(?status, "telemetry shutdown failed");
        }
        Ok(())
    }

    /// Serve one already-connected stream to completion.
    pub fn serve_connection<T>(
        &self,
        stream: T,
        peer: impl Into<String>,
    ) -> impl Future<Output = Result<()>> + Send + 'static
    where
        T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        Connection::new(
            self.runtime.clone(),
            self.telemetry.clone(),
            self.config.device,
            self.config.io_timeout,
            peer,
        )
        .serve(stream)
    }
}

/// Resolves on Ctrl-C, or SIGTERM on Unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("cannot listen for Ctrl-C: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                warn!("cannot listen for SIGTERM: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl-C"),
        _ = terminate => info!("received SIGTERM"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::runtime::SimulatedRuntime;
    use crate::worker::telemetry::SimulatedSmi;
    use tokio::net::TcpStream;

    fn local() -> WorkerConfig {
        WorkerConfig {
            bind: "127.0.0.1".into(),
            port: 0,
            ..Default::default()
        }
    }

    #[test]
    fn test_default_config() {
        let config = WorkerConfig::default();
        assert_eq!(config.port, 18515);
        assert_eq!(config.bind, "0.0.0.0");
        assert_eq!(config.io_timeout, Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_bind_port_zero_and_stop() {
        let worker = Worker::bind(local(), SimulatedRuntime::new(1), SimulatedSmi::new(1))
            .await
            .unwrap();
        let addr = worker.local_addr().unwrap();
        assert_ne!(addr.port(), 0);

        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let server = tokio::spawn(worker.run_until(async {
            let _ = stop_rx.await;
        }));

        let stream = TcpStream::connect(addr).await.unwrap();
        drop(stream);
        stop_tx.send(()).unwrap();
        server.await.unwrap().unwrap();
    }
}
