//! Protocol module - wire format, opcodes, payload records.
//!
//! Everything both peers must agree on byte-for-byte lives here:
//! - [`Header`] - the 20-byte frame header and its flag bits
//! - [`OpCode`] - the closed operation table
//! - [`payload`] - fixed records per operation and the [`Reply`] envelope
//! - [`Request`] - a decoded request, one variant per operation
//! - [`FrameReader`] - validated async frame input
//! - [`code_object`] - code-object length inference for module loads

pub mod code_object;
mod frame;
mod frame_reader;
mod opcode;
pub mod payload;
mod request;
mod status;
mod wire_format;

pub use frame::{build_frame, Frame, OutboundFrame};
pub use frame_reader::{FrameReader, ReadState};
pub use opcode::{op_name, OpCode};
pub use payload::Reply;
pub use request::{AllocKind, KernelLaunch, MemsetWidth, Request};
pub use status::{
    check, code_of, error_name, error_string, HipError, HipResult, SmiResult, SmiStatus, SUCCESS,
};
pub use wire_format::{
    flags, validate_header, Header, DEFAULT_PORT, HEADER_SIZE, MAGIC, MAX_ARG_SIZE,
    MAX_KERNEL_ARGS, MAX_PAYLOAD_SIZE, PROTOCOL_VERSION,
};
