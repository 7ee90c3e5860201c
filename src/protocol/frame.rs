//! Frame struct with typed accessors.
//!
//! A frame is a header plus its payload. Received frames keep the payload
//! as one `bytes::Bytes`; outbound frames keep the fixed record and any
//! inline bulk data apart so they can be written with one vectored call
//! without copying the bulk bytes.
//!
//! # Example
//!
//! ```
//! use hipwire::protocol::{Frame, Header, OpCode, flags};
//! use bytes::Bytes;
//!
//! let header = Header::new(OpCode::Ping.code(), 7, 4, flags::RESPONSE);
//! let frame = Frame::new(header, Bytes::from_static(&[0, 0, 0, 0]));
//!
//! assert_eq!(frame.op(), Some(OpCode::Ping));
//! assert_eq!(frame.request_id(), 7);
//! ```

use bytes::Bytes;

use super::opcode::OpCode;
use super::wire_format::{flags, Header, HEADER_SIZE};

/// A complete received frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Decoded header.
    pub header: Header,
    /// Payload bytes, exactly `header.payload_length` long.
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame from header and payload.
    pub fn new(header: Header, payload: Bytes) -> Self {
        Self { header, payload }
    }

    /// Get a reference to the payload bytes.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Raw opcode.
    #[inline]
    pub fn op_code(&self) -> u16 {
        self.header.op_code
    }

    /// Opcode, if it is one this crate knows.
    #[inline]
    pub fn op(&self) -> Option<OpCode> {
        OpCode::try_from(self.header.op_code).ok()
    }

    /// Get the request ID.
    #[inline]
    pub fn request_id(&self) -> u32 {
        self.header.request_id
    }

    /// Check if this is a response.
    #[inline]
    pub fn is_response(&self) -> bool {
        self.header.is_response()
    }

    /// Check if bulk data follows the fixed record.
    #[inline]
    pub fn has_inline_data(&self) -> bool {
        self.header.has_inline_data()
    }

    /// Check if the sender expects no response.
    #[inline]
    pub fn is_no_reply(&self) -> bool {
        self.header.is_no_reply()
    }

    /// Result code at the front of a response payload, if present.
    pub fn result_code(&self) -> Option<i32> {
        self.payload
            .get(..4)
            .map(|b| i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }
}

/// A frame ready to be written.
///
/// `record` is the opcode's fixed record, `inline` optional bulk data.
/// The header's payload length covers both.
#[derive(Debug, Clone)]
pub struct OutboundFrame {
    /// Pre-encoded header.
    pub header: [u8; HEADER_SIZE],
    /// Fixed record.
    pub record: Bytes,
    /// Inline bulk data (may be empty).
    pub inline: Bytes,
}

impl OutboundFrame {
    /// Build a request or response frame.
    ///
    /// Sets `HAS_INLINE_DATA` when `inline` is non-empty.
    pub fn new(op_code: u16, request_id: u32, frame_flags: u32, record: Bytes, inline: Bytes) -> Self {
        let mut frame_flags = frame_flags;
        if !inline.is_empty() {
            frame_flags |= flags::HAS_INLINE_DATA;
        }
        let payload_length = (record.len() + inline.len()) as u32;
        let header = Header::new(op_code, request_id, payload_length, frame_flags);
        Self {
            header: header.encode(),
            record,
            inline,
        }
    }

    /// Total size of this frame (header + record + inline data).
    #[inline]
    pub fn size(&self) -> usize {
        HEADER_SIZE + self.record.len() + self.inline.len()
    }

    /// Segments in wire order, skipping empty ones.
    pub fn segments(&self) -> impl Iterator<Item = &[u8]> {
        [&self.header[..], &self.record[..], &self.inline[..]]
            .into_iter()
            .filter(|s| !s.is_empty())
    }
}

/// Build a complete frame as a single byte vector.
///
/// Use [`OutboundFrame`] for vectored writes.
///
/// # Example
///
/// ```
/// use hipwire::protocol::{build_frame, Header, HEADER_SIZE};
///
/// let header = Header::new(0x0003, 1, 5, 0);
/// let bytes = build_frame(&header, b"hello");
/// assert_eq!(bytes.len(), HEADER_SIZE + 5);
/// ```
pub fn build_frame(header: &Header, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    buf.extend_from_slice(&header.encode());
    buf.extend_from_slice(payload);
    buf
}
