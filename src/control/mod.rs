//! Control plane - the worker's stdout readiness line.
//!
//! Requests and responses travel over TCP; stdout carries only the single
//! JSON line printed once the listener is bound. Logs go to stderr.

mod ready;
mod stdio;

pub use ready::{ReadyMessage, PROTOCOL_NAME, PROTOCOL_VERSION};
pub use stdio::{announce_ready, write_stdout_line};
