//! Transport module - sockets, timeouts and batched writes.
//!
//! Higher layers only see [`Connector`], the timed I/O helpers and
//! [`describe_io_error`]; OS differences stop here.

mod io;
mod tcp;

pub use io::{read_exact_timed, write_all_timed, write_frames};
pub use tcp::{configure_stream, describe_io_error, Connector, TcpConnector};
