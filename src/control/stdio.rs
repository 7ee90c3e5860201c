//! Stdout writer for the control line.
//!
//! - **stdout**: the ready line, nothing else
//! - **stderr**: logs
//!
//! Lines end in a bare `\n` on every platform and are flushed at once, since
//! a supervisor blocks until the full line arrives.

use std::io::Write;

use super::ReadyMessage;

/// Write `line` and a `\n` to stdout, then flush.
pub fn write_stdout_line(line: &str) -> std::io::Result<()> {
    let stdout = std::io::stdout();
    let mut handle = stdout.lock();
    handle.write_all(line.as_bytes())?;
    handle.write_all(b"\n")?;
    handle.flush()
}

/// Print the ready line.
pub fn announce_ready(msg: &ReadyMessage) -> crate::error::Result<()> {
    write_stdout_line(&msg.to_json()?)?;
    Ok(())
}
