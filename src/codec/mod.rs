//! Codec module - fixed-layout little-endian records.
//!
//! Every payload on the wire is a packed record: fields follow each other
//! with no padding, integers are little-endian, strings are fixed-width
//! NUL-padded byte arrays. Records are declared with [`wire_record!`] which
//! derives the byte layout from the field list, so both peers agree on
//! offsets by construction.
//!
//! - [`WireField`] - one field (or a nested record): size, put, get
//! - [`WireRecord`] - whole-record helpers built on top: `encode`, `decode`
//! - [`FixedStr`] - a `char[N]` string field
//!
//! # Example
//!
//! ```
//! use hipwire::codec::WireRecord;
//! use hipwire::protocol::payload::MallocRequest;
//!
//! let req = MallocRequest { size: 1024, flags: 0 };
//! let bytes = req.encode();
//! assert_eq!(bytes.len(), 12);
//! assert_eq!(MallocRequest::decode(&bytes).unwrap(), req);
//! ```

mod fixed;

pub use fixed::FixedStr;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{HipwireError, Result};

/// A value with a fixed, packed wire layout.
pub trait WireField: Sized {
    /// Encoded size in bytes.
    const SIZE: usize;

    /// Append the little-endian encoding to `buf`.
    fn put<B: BufMut>(&self, buf: &mut B);

    /// Read one value. The caller guarantees `buf.remaining() >= SIZE`.
    fn get<B: Buf>(buf: &mut B) -> Self;
}

/// Whole-record encode/decode with length checking.
pub trait WireRecord: WireField {
    /// Encode into a fresh buffer of exactly `SIZE` bytes.
    fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::SIZE);
        self.put(&mut buf);
        buf.freeze()
    }

    /// Decode from the front of `data`; trailing bytes are ignored.
    ///
    /// A short buffer is a validation error: the peer sent less than the
    /// fixed record this operation requires.
    fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(HipwireError::Validation(format!(
                "record needs {} bytes, got {}",
                Self::SIZE,
                data.len()
            )));
        }
        let mut cursor = data;
        Ok(Self::get(&mut cursor))
    }

    /// Decode, treating missing trailing bytes as zero.
    ///
    /// Used for responses, where the caller's buffer is a fixed size and a
    /// shorter answer leaves the remaining fields zeroed.
    fn decode_padded(data: &[u8]) -> Self {
        if data.len() >= Self::SIZE {
            let mut cursor = data;
            return Self::get(&mut cursor);
        }
        let mut padded = vec![0u8; Self::SIZE];
        padded[..data.len()].copy_from_slice(data);
        let mut cursor = &padded[..];
        Self::get(&mut cursor)
    }
}

impl<T: WireField> WireRecord for T {}

macro_rules! impl_primitive {
    ($($ty:ty => $put:ident, $get:ident;)+) => {
        $(
            impl WireField for $ty {
                const SIZE: usize = std::mem::size_of::<$ty>();

                #[inline]
                fn put<B: BufMut>(&self, buf: &mut B) {
                    buf.$put(*self);
                }

                #[inline]
                fn get<B: Buf>(buf: &mut B) -> Self {
                    buf.$get()
                }
            }
        )+
    };
}

impl_primitive! {
    u8 => put_u8, get_u8;
    u16 => put_u16_le, get_u16_le;
    u32 => put_u32_le, get_u32_le;
    u64 => put_u64_le, get_u64_le;
    i32 => put_i32_le, get_i32_le;
    i64 => put_i64_le, get_i64_le;
    f32 => put_f32_le, get_f32_le;
}

impl WireField for () {
    const SIZE: usize = 0;

    fn put<B: BufMut>(&self, _buf: &mut B) {}

    fn get<B: Buf>(_buf: &mut B) -> Self {}
}

impl<T: WireField, const N: usize> WireField for [T; N] {
    const SIZE: usize = T::SIZE * N;

    fn put<B: BufMut>(&self, buf: &mut B) {
        for item in self {
            item.put(buf);
        }
    }

    fn get<B: Buf>(buf: &mut B) -> Self {
        std::array::from_fn(|_| T::get(buf))
    }
}

/// Declare a packed wire record.
///
/// Generates the struct (with `Debug`, `Clone`, `Default`, `PartialEq`) and
/// its [`WireField`] impl; fields are laid out in declaration order.
macro_rules! wire_record {
    ($(
        $(#[$meta:meta])*
        pub struct $name:ident {
            $(
                $(#[$field_meta:meta])*
                pub $field:ident : $ty:ty
            ),* $(,)?
        }
    )+) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Default, PartialEq)]
            pub struct $name {
                $(
                    $(#[$field_meta])*
                    pub $field: $ty,
                )*
            }

            impl $crate::codec::WireField for $name {
                const SIZE: usize = 0 $(+ <$ty as $crate::codec::WireField>::SIZE)*;

                #[allow(unused_variables)]
                fn put<B: ::bytes::BufMut>(&self, buf: &mut B) {
                    $($crate::codec::WireField::put(&self.$field, buf);)*
                }

                #[allow(unused_variables)]
                fn get<B: ::bytes::Buf>(buf: &mut B) -> Self {
                    Self {
                        $($field: <$ty as $crate::codec::WireField>::get(buf),)*
                    }
                }
            }
        )+
    };
}

pub(crate) use wire_record;

#[cfg(test)]
mod tests {
    use super::*;

    wire_record! {
        /// Test record mixing every primitive.
        pub struct Mixed {
            pub a: u8,
            pub b: u16,
            pub c: i32,
            pub d: u64,
            pub e: f32,
            pub dims: [u32; 3],
        }
    }

    #[test]
    fn test_record_size_is_packed() {
        assert_eq!(Mixed::SIZE, 1 + 2 + 4 + 8 + 4 + 12);
        assert_eq!(<()>::SIZE, 0);
    }

    #[test]
    fn test_record_layout_is_little_endian() {
        let rec = Mixed {
            a: 0x01,
            b: 0x0302,
            c: -1,
            d: 0x0B0A_0908_0706_0504,
            e: 1.0,
            dims: [1, 2, 3],
        };
        let bytes = rec.encode();
        assert_eq!(bytes[0], 0x01);
        assert_eq!(&bytes[1..3], &[0x02, 0x03]);
        assert_eq!(&bytes[3..7], &[0xFF; 4]);
        assert_eq!(&bytes[7..15], &[4, 5, 6, 7, 8, 9, 10, 11]);
        assert_eq!(&bytes[15..19], &1.0f32.to_le_bytes());
        assert_eq!(&bytes[19..23], &[1, 0, 0, 0]);

        assert_eq!(Mixed::decode(&bytes).unwrap(), rec);
    }

    #[test]
    fn test_decode_short_buffer_is_validation_error() {
        let err = Mixed::decode(&[0u8; 5]).unwrap_err();
        assert!(matches!(err, HipwireError::Validation(_)));
    }

    #[test]
    fn test_decode_ignores_trailing_bytes() {
        let mut bytes = 7u32.encode().to_vec();
        bytes.extend_from_slice(b"trailer");
        assert_eq!(u32::decode(&bytes).unwrap(), 7);
    }

    #[test]
    fn test_decode_padded_zero_fills() {
        let rec = Mixed::decode_padded(&[0x09, 0x01]);
        assert_eq!(rec.a, 9);
        assert_eq!(rec.b, 1);
        assert_eq!(rec.d, 0);
        assert_eq!(rec.dims, [0, 0, 0]);
    }
}
