//! TCP connection setup and per-OS socket error text.
//!
//! - [`Connector`] abstracts "give me a connected byte stream" so sessions
//!   can run over TCP in production and over in-memory pipes in tests.
//! - [`TcpConnector`] resolves, connects under a timeout and disables Nagle.
//!
//! Socket-subsystem setup is owned by the tokio runtime, so no global
//! init/cleanup is needed on any platform.

use std::future::Future;
use std::io;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use crate::error::{HipwireError, Result};

/// Establishes connections for a session.
pub trait Connector: Send + Sync + 'static {
    /// Connected stream type.
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Connect to `host:port`, giving up after `timeout`.
    fn connect(
        &self,
        host: &str,
        port: u16,
        timeout: Duration,
    ) -> impl Future<Output = Result<Self::Stream>> + Send;
}

/// Plain TCP with `TCP_NODELAY`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

impl Connector for TcpConnector {
    type Stream = TcpStream;

    async fn connect(&self, host: &str, port: u16, timeout: Duration) -> Result<TcpStream> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| HipwireError::Timeout(timeout))??;
        configure_stream(&stream)?;
        Ok(stream)
    }
}

/// Apply the socket options every protocol connection uses.
///
/// Small request frames must not wait for Nagle coalescing; batching is
/// done explicitly by the session.
pub fn configure_stream(stream: &TcpStream) -> Result<()> {
    stream.set_nodelay(true)?;
    Ok(())
}

/// Describe a socket error including the OS error number.
pub fn describe_io_error(err: &io::Error) -> String {
    match err.raw_os_error() {
        Some(code) => os::describe(err, code),
        None => err.to_string(),
    }
}

#[cfg(unix)]
mod os {
    pub(super) fn describe(err: &std::io::Error, code: i32) -> String {
        format!("{} (errno {})", err, code)
    }
}

#[cfg(windows)]
mod os {
    pub(super) fn describe(err: &std::io::Error, code: i32) -> String {
        format!("{} (WSA error {})", err, code)
    }
}

#[cfg(not(any(unix, windows)))]
mod os {
    pub(super) fn describe(err: &std::io::Error, code: i32) -> String {
        format!("{} (os error {})", err, code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_sets_nodelay() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let stream = TcpConnector
            .connect("127.0.0.1", port, Duration::from_secs(5))
            .await
            .unwrap();
        assert!(stream.nodelay().unwrap());
    }

    #[tokio::test]
    async fn test_connect_refused_is_io_error() {
        // Bind then drop to get a port nobody listens on.
        let port = {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let err = TcpConnector
            .connect("127.0.0.1", port, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_describe_io_error() {
        let plain = io::Error::new(io::ErrorKind::Other, "boom");
        assert_eq!(describe_io_error(&plain), "boom");

        let os_err = io::Error::from_raw_os_error(111);
        assert!(describe_io_error(&os_err).contains("111"));
    }
}
