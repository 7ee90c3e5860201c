//! Wire format encoding and decoding.
//!
//! Implements the 20-byte header that precedes every frame:
//! ```text
//! ┌──────────┬─────────┬─────────┬────────────┬─────────────┬──────────┐
//! │ Magic    │ Version │ Op code │ Request ID │ Payload len │ Flags    │
//! │ 4 bytes  │ 2 bytes │ 2 bytes │ 4 bytes    │ 4 bytes     │ 4 bytes  │
//! │ u32 LE   │ u16 LE  │ u16 LE  │ u32 LE     │ u32 LE      │ u32 LE   │
//! └──────────┴─────────┴─────────┴────────────┴─────────────┴──────────┘
//! ```
//!
//! All multi-byte integers are Little Endian and the record has no padding.

use crate::error::{HipwireError, Result};

/// Header size in bytes (fixed, exactly 20).
pub const HEADER_SIZE: usize = 20;

/// Protocol magic, `0x48495052` (`HIPR` when the value is read big-endian).
/// On the wire it is little-endian like every other field, so the first
/// four bytes of a frame are `52 50 49 48` (`RPIH`).
pub const MAGIC: u32 = 0x4849_5052;

/// Protocol version as `0xMMmm`. The major byte must match across peers.
pub const PROTOCOL_VERSION: u16 = 0x0100;

/// Maximum payload size (64 MiB).
pub const MAX_PAYLOAD_SIZE: u32 = 64 * 1024 * 1024;

/// Default worker TCP port.
pub const DEFAULT_PORT: u16 = 18515;

/// Maximum number of kernel arguments in one launch.
pub const MAX_KERNEL_ARGS: usize = 64;

/// Maximum size of a single kernel argument in bytes.
pub const MAX_ARG_SIZE: usize = 256;

/// Flag constants for the protocol.
pub mod flags {
    /// Frame is a response.
    pub const RESPONSE: u32 = 1 << 0;
    /// Operation failed (informational, the result code is authoritative).
    pub const ERROR: u32 = 1 << 1;
    /// Bulk bytes follow the fixed record.
    pub const HAS_INLINE_DATA: u32 = 1 << 2;
    /// Worker must not answer this request.
    pub const NO_REPLY: u32 = 1 << 3;

    /// Check if a specific flag is set.
    #[inline]
    pub fn has_flag(flags: u32, flag: u32) -> bool {
        flags & flag != 0
    }
}

/// Decoded header from wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Protocol magic (must equal [`MAGIC`]).
    pub magic: u32,
    /// Protocol version.
    pub version: u16,
    /// Raw operation code.
    pub op_code: u16,
    /// Correlation id.
    pub request_id: u32,
    /// Payload length in bytes.
    pub payload_length: u32,
    /// Flags bitmask (see `flags` module).
    pub flags: u32,
}

impl Header {
    /// Create a header with the current magic and version.
    pub fn new(op_code: u16, request_id: u32, payload_length: u32, flags: u32) -> Self {
        Self {
            magic: MAGIC,
            version: PROTOCOL_VERSION,
            op_code,
            request_id,
            payload_length,
            flags,
        }
    }

    /// Encode header to bytes (Little Endian).
    ///
    /// # Example
    ///
    /// ```
    /// use hipwire::protocol::{Header, flags, HEADER_SIZE};
    ///
    /// let header = Header::new(0x0100, 42, 4, flags::RESPONSE);
    /// let bytes = header.encode();
    /// assert_eq!(bytes.len(), HEADER_SIZE);
    /// assert_eq!(&bytes[0..4], &[0x52, 0x50, 0x49, 0x48]);
    /// ```
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        self.encode_into(&mut buf);
        buf
    }

    /// Encode header into an existing buffer.
    ///
    /// # Panics
    ///
    /// Panics if buffer is smaller than `HEADER_SIZE` (20 bytes).
    pub fn encode_into(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= HEADER_SIZE);
        buf[0..4].copy_from_slice(&self.magic.to_le_bytes());
        buf[4..6].copy_from_slice(&self.version.to_le_bytes());
        buf[6..8].copy_from_slice(&self.op_code.to_le_bytes());
        buf[8..12].copy_from_slice(&self.request_id.to_le_bytes());
        buf[12..16].copy_from_slice(&self.payload_length.to_le_bytes());
        buf[16..20].copy_from_slice(&self.flags.to_le_bytes());
    }

    /// Decode header from bytes (Little Endian).
    ///
    /// Returns `None` if buffer is too short. No validation happens here.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_SIZE {
            return None;
        }
        let u32_at = |i: usize| u32::from_le_bytes([buf[i], buf[i + 1], buf[i + 2], buf[i + 3]]);
        let u16_at = |i: usize| u16::from_le_bytes([buf[i], buf[i + 1]]);
        Some(Self {
            magic: u32_at(0),
            version: u16_at(4),
            op_code: u16_at(6),
            request_id: u32_at(8),
            payload_length: u32_at(12),
            flags: u32_at(16),
        })
    }

    /// Validate the header for protocol compliance.
    ///
    /// Checks:
    /// - Magic matches
    /// - Version major byte matches (minor is advisory)
    /// - Payload length doesn't exceed `max_payload_size`
    ///
    /// A failing header leaves the connection unusable.
    pub fn validate(&self, max_payload_size: u32) -> Result<()> {
        if self.magic != MAGIC {
            return Err(HipwireError::Protocol(format!(
                "Bad magic 0x{:08x}",
                self.magic
            )));
        }

        if self.version_major() != (PROTOCOL_VERSION >> 8) as u8 {
            return Err(HipwireError::Protocol(format!(
                "Version major {} does not match {}",
                self.version_major(),
                PROTOCOL_VERSION >> 8
            )));
        }

        if self.payload_length > max_payload_size {
            return Err(HipwireError::Protocol(format!(
                "Payload size {} exceeds maximum {}",
                self.payload_length, max_payload_size
            )));
        }

        Ok(())
    }

    /// Major version byte.
    #[inline]
    pub fn version_major(&self) -> u8 {
        (self.version >> 8) as u8
    }

    /// Check if this is a response.
    #[inline]
    pub fn is_response(&self) -> bool {
        flags::has_flag(self.flags, flags::RESPONSE)
    }

    /// Check if this is an error response.
    #[inline]
    pub fn is_error(&self) -> bool {
        flags::has_flag(self.flags, flags::ERROR)
    }

    /// Check if bulk data follows the fixed record.
    #[inline]
    pub fn has_inline_data(&self) -> bool {
        flags::has_flag(self.flags, flags::HAS_INLINE_DATA)
    }

    /// Check if the sender expects no response.
    #[inline]
    pub fn is_no_reply(&self) -> bool {
        flags::has_flag(self.flags, flags::NO_REPLY)
    }
}

/// Validate a header for protocol compliance against [`MAX_PAYLOAD_SIZE`].
#[inline]
pub fn validate_header(header: &Header) -> Result<()> {
    header.validate(MAX_PAYLOAD_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_encode_decode_roundtrip() {
        let original = Header::new(0x0210, 42, 100, flags::HAS_INLINE_DATA);
        let encoded = original.encode();
        let decoded = Header::decode(&encoded).unwrap();
        assert_eq!(original, decoded);
    }

    #[test]
    fn test_header_little_endian_byte_order() {
        let mut header = Header::new(0x0102, 0x04050607, 0x08090A0B, 0x0C0D0E0F);
        header.version = 0x0100;
        let bytes = header.encode();

        // Magic 0x48495052 LE
        assert_eq!(&bytes[0..4], &[0x52, 0x50, 0x49, 0x48]);
        assert_eq!(&bytes[0..4], b"RPIH");
        assert_eq!(&MAGIC.to_be_bytes(), b"HIPR");
        // Version 0x0100 LE
        assert_eq!(&bytes[4..6], &[0x00, 0x01]);
        // Op code 0x0102 LE
        assert_eq!(&bytes[6..8], &[0x02, 0x01]);
        // Request ID LE
        assert_eq!(&bytes[8..12], &[0x07, 0x06, 0x05, 0x04]);
        // Payload length LE
        assert_eq!(&bytes[12..16], &[0x0B, 0x0A, 0x09, 0x08]);
        // Flags LE
        assert_eq!(&bytes[16..20], &[0x0F, 0x0E, 0x0D, 0x0C]);
    }

    #[test]
    fn test_header_size_is_exactly_20() {
        assert_eq!(HEADER_SIZE, 20);
        assert_eq!(Header::new(1, 1, 0, 0).encode().len(), 20);
    }

    #[test]
    fn test_decode_too_short_buffer() {
        let buf = [0u8; 19];
        assert!(Header::decode(&buf).is_none());
    }

    #[test]
    fn test_validate_bad_magic_rejected() {
        let mut header = Header::new(1, 1, 0, 0);
        header.magic ^= 0xFF;
        let result = validate_header(&header);
        assert!(result.unwrap_err().to_string().contains("Bad magic"));
    }

    #[test]
    fn test_validate_major_version_mismatch_rejected() {
        let mut header = Header::new(1, 1, 0, 0);
        header.version = 0x0200;
        let result = validate_header(&header);
        assert!(result.unwrap_err().to_string().contains("Version major"));
    }

    #[test]
    fn test_validate_minor_version_is_advisory() {
        let mut header = Header::new(1, 1, 0, 0);
        header.version = 0x01FF;
        assert!(validate_header(&header).is_ok());
    }

    #[test]
    fn test_validate_payload_too_large() {
        let header = Header::new(1, 1, MAX_PAYLOAD_SIZE + 1, 0);
        let result = validate_header(&header);
        assert!(result.unwrap_err().to_string().contains("exceeds maximum"));

        let at_limit = Header::new(1, 1, MAX_PAYLOAD_SIZE, 0);
        assert!(validate_header(&at_limit).is_ok());
    }

    #[test]
    fn test_flags() {
        let header = Header::new(1, 1, 0, flags::RESPONSE | flags::HAS_INLINE_DATA);
        assert!(header.is_response());
        assert!(header.has_inline_data());
        assert!(!header.is_error());
        assert!(!header.is_no_reply());

        assert_eq!(flags::RESPONSE, 0x1);
        assert_eq!(flags::ERROR, 0x2);
        assert_eq!(flags::HAS_INLINE_DATA, 0x4);
        assert_eq!(flags::NO_REPLY, 0x8);
    }
}
