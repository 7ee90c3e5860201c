//! Error types for hipwire.
//!
//! Two layers of errors exist:
//! - [`HipwireError`] covers transport and framing failures inside the crate.
//! - [`HipError`](crate::protocol::HipError) is the result-code vocabulary
//!   callers see. Every `HipwireError` collapses into one of those codes at
//!   the session boundary.

use thiserror::Error;

use crate::protocol::HipError;

/// Main error type for all internal hipwire operations.
#[derive(Debug, Error)]
pub enum HipwireError {
    /// I/O error during socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error (ready announcement only).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Protocol error (bad magic, version mismatch, oversized payload).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Request record is shorter or otherwise malformed.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Connect or socket I/O exceeded the configured timeout.
    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Peer closed the connection.
    #[error("Connection closed")]
    ConnectionClosed,

    /// The remote side answered with a failing result code.
    #[error("Remote status: {0}")]
    Status(HipError),
}

impl HipwireError {
    /// Whether this error leaves the connection unusable.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            HipwireError::Io(_)
                | HipwireError::Protocol(_)
                | HipwireError::Timeout(_)
                | HipwireError::ConnectionClosed
        )
    }
}

impl From<HipwireError> for HipError {
    fn from(err: HipwireError) -> Self {
        match err {
            HipwireError::Io(_) | HipwireError::Timeout(_) | HipwireError::ConnectionClosed => {
                HipError::NotInitialized
            }
            HipwireError::Protocol(_) | HipwireError::Validation(_) | HipwireError::Json(_) => {
                HipError::InvalidValue
            }
            HipwireError::Status(code) => code,
        }
    }
}

/// Result type alias using HipwireError.
pub type Result<T> = std::result::Result<T, HipwireError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connectivity_errors_map_to_not_initialized() {
        let io = HipwireError::Io(std::io::Error::from(std::io::ErrorKind::BrokenPipe));
        assert!(io.is_fatal());
        assert_eq!(HipError::from(io), HipError::NotInitialized);
        assert_eq!(
            HipError::from(HipwireError::Timeout(std::time::Duration::from_secs(1))),
            HipError::NotInitialized
        );
        assert_eq!(
            HipError::from(HipwireError::ConnectionClosed),
            HipError::NotInitialized
        );
    }

    #[test]
    fn test_protocol_errors_map_to_invalid_value() {
        let err = HipwireError::Protocol("bad magic".into());
        assert!(err.is_fatal());
        assert_eq!(HipError::from(err), HipError::InvalidValue);

        let err = HipwireError::Validation("short record".into());
        assert!(!err.is_fatal());
        assert_eq!(HipError::from(err), HipError::InvalidValue);
    }

    #[test]
    fn test_status_passes_through() {
        let err = HipwireError::Status(HipError::OutOfMemory);
        assert!(!err.is_fatal());
        assert_eq!(HipError::from(err), HipError::OutOfMemory);
    }
}
