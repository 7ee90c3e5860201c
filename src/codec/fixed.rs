//! Fixed-width string fields (`char name[N]`).

use std::fmt;

use bytes::{Buf, BufMut};

use super::WireField;

/// A string stored in exactly `N` bytes on the wire.
///
/// Encoding truncates to `N - 1` bytes and pads with NUL, so the field is
/// always terminated. Decoding stops at the first NUL; invalid UTF-8 is
/// replaced rather than rejected.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct FixedStr<const N: usize>(String);

impl<const N: usize> FixedStr<N> {
    /// Wrap a string; it is only truncated when encoded.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Borrow the string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Take the string.
    pub fn into_string(self) -> String {
        self.0
    }

    /// Byte length the string occupies once encoded (without the NUL).
    fn encoded_len(&self) -> usize {
        let limit = N.saturating_sub(1);
        if self.0.len() <= limit {
            return self.0.len();
        }
        // never split a UTF-8 sequence
        let mut end = limit;
        while !self.0.is_char_boundary(end) {
            end -= 1;
        }
        end
    }
}

impl<const N: usize> WireField for FixedStr<N> {
    const SIZE: usize = N;

    fn put<B: BufMut>(&self, buf: &mut B) {
        let len = self.encoded_len();
        buf.put_slice(&self.0.as_bytes()[..len]);
        buf.put_bytes(0, N - len);
    }

    fn get<B: Buf>(buf: &mut B) -> Self {
        let mut raw = [0u8; N];
        buf.copy_to_slice(&mut raw);
        let end = raw.iter().position(|&b| b == 0).unwrap_or(N);
        Self(String::from_utf8_lossy(&raw[..end]).into_owned())
    }
}

impl<const N: usize> fmt::Debug for FixedStr<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl<const N: usize> fmt::Display for FixedStr<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<const N: usize> From<&str> for FixedStr<N> {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl<const N: usize> From<String> for FixedStr<N> {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::WireRecord;

    #[test]
    fn test_short_string_is_nul_padded() {
        let s: FixedStr<8> = "abc".into();
        let bytes = s.encode();
        assert_eq!(&bytes[..], b"abc\0\0\0\0\0");
        assert_eq!(FixedStr::<8>::decode(&bytes).unwrap().as_str(), "abc");
    }

    #[test]
    fn test_long_string_is_truncated_and_terminated() {
        let s: FixedStr<4> = "abcdef".into();
        let bytes = s.encode();
        assert_eq!(&bytes[..], b"abc\0");
    }

    #[test]
    fn test_truncation_respects_char_boundary() {
        // 'é' is two bytes; a 3-byte field leaves room for 2 bytes of text
        let s: FixedStr<3> = "aé".into();
        assert_eq!(&s.encode()[..], b"a\0\0");
    }

    #[test]
    fn test_unterminated_field_decodes_whole_width() {
        let s = FixedStr::<4>::decode(b"wxyz").unwrap();
        assert_eq!(s.as_str(), "wxyz");
    }
}
