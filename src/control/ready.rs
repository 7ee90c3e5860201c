//! Readiness announcement.
//!
//! Once the worker is listening it prints exactly one JSON line on stdout.
//! Supervisors wait for it before connecting, and read the bound port
//! from it when the worker was started on port 0.
//!
//! ```
//! use hipwire::control::ReadyMessage;
//!
//! let addr = "127.0.0.1:18515".parse().unwrap();
//! let json = ReadyMessage::new(addr, 2, true).to_json().unwrap();
//! assert!(json.starts_with(r#"{"type":"ready","protocol":"hipwire""#));
//! ```

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

/// Protocol version announced by the worker.
pub const PROTOCOL_VERSION: &str = "1.0";

/// Protocol name announced by the worker.
pub const PROTOCOL_NAME: &str = "hipwire";

/// The `ready` line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadyMessage {
    #[serde(rename = "type")]
    pub kind: String,
    pub protocol: String,
    pub version: String,
    pub address: String,
    pub port: u16,
    /// Devices the runtime enumerated.
    pub devices: i32,
    /// Whether telemetry initialized.
    pub telemetry: bool,
}

impl ReadyMessage {
    pub fn new(addr: SocketAddr, devices: i32, telemetry: bool) -> Self {
        Self {
            kind: "ready".to_string(),
            protocol: PROTOCOL_NAME.to_string(),
            version: PROTOCOL_VERSION.to_string(),
            address: addr.ip().to_string(),
            port: addr.port(),
            devices,
            telemetry,
        }
    }

    pub fn to_json(&self) -> crate::error::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a line printed by a worker.
    pub fn parse(line: &str) -> crate::error::Result<Self> {
        Ok(serde_json::from_str(line.trim_end())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_order_and_names() {
        let addr: SocketAddr = "0.0.0.0:4000".parse().unwrap();
        let json = ReadyMessage::new(addr, 1, false).to_json().unwrap();
        assert_eq!(
            json,
            r#"{"type":"ready","protocol":"hipwire","version":"1.0","address":"0.0.0.0","port":4000,"devices":1,"telemetry":false}"#
        );
    }

    #[test]
    fn test_parse_roundtrip() {
        let addr: SocketAddr = "127.0.0.1:39001".parse().unwrap();
        let msg = ReadyMessage::new(addr, 2, true);
        let parsed = ReadyMessage::parse(&format!("{}\n", msg.to_json().unwrap())).unwrap();
        assert_eq!(parsed, msg);
        assert!(ReadyMessage::parse("not json").is_err());
    }
}
