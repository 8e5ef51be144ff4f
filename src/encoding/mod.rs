//! The crate's binary wire format.
//!
//! Everything the database writes to disk — WAL frames, SSTable blocks,
//! archive files, compute-state rows, join-result payloads — passes
//! through the [`Encode`] and [`Decode`] traits defined here. Owning the
//! codec keeps the on-disk representation byte-stable across dependency
//! upgrades and lets each format document itself in one table:
//!
//! | Rust type       | Encoding                                      |
//! |-----------------|-----------------------------------------------|
//! | `u8`            | 1 raw byte                                    |
//! | `u32` / `u64` / `i64` | fixed width, little-endian              |
//! | `f64`           | IEEE-754 bit pattern as a little-endian `u64` |
//! | `bool`          | `0x00` = false, `0x01` = true                 |
//! | `[u8; N]`       | `N` raw bytes, no length prefix               |
//! | `Vec<u8>`       | `[u32 len][bytes]`                            |
//! | `String`        | `[u32 len][utf-8 bytes]`                      |
//! | `Option<T>`     | `[u8 0|1][T when 1]`                          |
//! | `Vec<T>`        | `[u32 count][T]…` via [`encode_vec`]          |
//! | string map      | `[u32 count][key][value]…` in key order       |
//! | `enum`          | `[u8 tag][fields]…`, written per type         |
//!
//! Lengths and counts are `u32`, so no single item exceeds 4 GiB.
//!
//! Decoders never trust a length field: every variable-length read is
//! capped ([`MAX_BYTE_LEN`], [`MAX_VEC_ELEMENTS`]) and bounds-checked
//! before any allocation, so corrupt or hostile input fails with an
//! [`EncodingError`] instead of an allocation bomb or a panic. Nothing
//! in this module panics; there is no `unwrap` or indexing past a check.
//!
//! Decoding returns `(value, bytes_consumed)` so callers can walk a
//! buffer that holds several items back to back.

#[cfg(test)]
mod tests;

use std::collections::BTreeMap;

use thiserror::Error;

// ------------------------------------------------------------------------------------------------
// Decode-side caps
// ------------------------------------------------------------------------------------------------

/// Upper bound on a single decoded `Vec<u8>` or `String` (256 MiB).
pub const MAX_BYTE_LEN: u32 = 256 * 1024 * 1024;

/// Upper bound on a decoded element or map-entry count (16 M).
pub const MAX_VEC_ELEMENTS: u32 = 16 * 1024 * 1024;

// ------------------------------------------------------------------------------------------------
// Error type
// ------------------------------------------------------------------------------------------------

/// Errors produced while encoding or decoding.
#[derive(Debug, Error)]
pub enum EncodingError {
    /// The buffer ended before the value did.
    #[error("buffer too short: need {needed} more bytes, {available} left")]
    UnexpectedEof {
        /// Bytes the decoder still needs.
        needed: usize,
        /// Bytes actually left in the buffer.
        available: usize,
    },

    /// An enum discriminant byte matched no variant.
    #[error("tag {tag} is not a valid {type_name}")]
    InvalidTag {
        /// The discriminant that was read.
        tag: u32,
        /// The type being decoded.
        type_name: &'static str,
    },

    /// A bool slot held something other than `0x00` or `0x01`.
    #[error("byte 0x{0:02X} is not a bool")]
    InvalidBool(u8),

    /// String bytes were not valid UTF-8.
    #[error("string is not UTF-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    /// A declared length or count breached its cap.
    #[error("declared length out of range: {0}")]
    LengthOverflow(String),

    /// Application-level decode failure.
    #[error("{0}")]
    Custom(String),
}

// ------------------------------------------------------------------------------------------------
// Core traits
// ------------------------------------------------------------------------------------------------

/// Append the wire form of `self` to a buffer.
///
/// Implementations must be deterministic: one logical value, one byte
/// sequence. That is what makes WAL replay and SSTable comparison sound.
pub trait Encode {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError>;
}

/// Read one value from the front of a buffer.
///
/// On success returns the value and how many bytes it occupied.
pub trait Decode: Sized {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError>;
}

/// Encode a value into a fresh `Vec<u8>`.
pub fn encode_to_vec<T: Encode>(value: &T) -> Result<Vec<u8>, EncodingError> {
    let mut buf = Vec::new();
    value.encode_to(&mut buf)?;
    Ok(buf)
}

/// Decode a value from the front of `buf`; returns `(value, consumed)`.
pub fn decode_from_slice<T: Decode>(buf: &[u8]) -> Result<(T, usize), EncodingError> {
    T::decode_from(buf)
}

// ------------------------------------------------------------------------------------------------
// Shared decode helpers
// ------------------------------------------------------------------------------------------------

/// Copy the first `N` bytes of `buf` out as an array, or report how far
/// short the buffer fell.
#[inline]
fn split_fixed<const N: usize>(buf: &[u8]) -> Result<[u8; N], EncodingError> {
    match buf.get(..N) {
        Some(head) => {
            let mut bytes = [0u8; N];
            bytes.copy_from_slice(head);
            Ok(bytes)
        }
        None => Err(EncodingError::UnexpectedEof {
            needed: N,
            available: buf.len(),
        }),
    }
}

/// Read a `u32` length prefix, enforce `cap`, and verify the payload is
/// actually present. Returns `(payload_len, prefix_consumed)`.
#[inline]
fn declared_len(buf: &[u8], cap: u32, what: &str) -> Result<(usize, usize), EncodingError> {
    let (declared, consumed) = u32::decode_from(buf)?;
    if declared > cap {
        return Err(EncodingError::LengthOverflow(format!(
            "{what} claims {declared} but the cap is {cap}"
        )));
    }
    let len = declared as usize;
    let available = buf.len() - consumed;
    if available < len {
        return Err(EncodingError::UnexpectedEof {
            needed: len,
            available,
        });
    }
    Ok((len, consumed))
}

/// Write a `u32` length prefix, rejecting anything the prefix cannot hold.
#[inline]
fn write_len_prefix(len: usize, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
    match u32::try_from(len) {
        Ok(prefix) => prefix.encode_to(buf),
        Err(_) => Err(EncodingError::LengthOverflow(format!(
            "{len} does not fit in a u32 length prefix"
        ))),
    }
}

// ------------------------------------------------------------------------------------------------
// Fixed-width primitives
// ------------------------------------------------------------------------------------------------

/// One Encode/Decode pair per fixed-width little-endian integer. The
/// byte layout is `to_le_bytes`/`from_le_bytes` exactly.
macro_rules! fixed_width_codec {
    ($($ty:ty),* $(,)?) => {$(
        impl Encode for $ty {
            #[inline]
            fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
                buf.extend_from_slice(&self.to_le_bytes());
                Ok(())
            }
        }

        impl Decode for $ty {
            #[inline]
            fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
                let bytes = split_fixed::<{ std::mem::size_of::<$ty>() }>(buf)?;
                Ok((<$ty>::from_le_bytes(bytes), std::mem::size_of::<$ty>()))
            }
        }
    )*};
}

fixed_width_codec!(u32, u64, i64);

impl Encode for u8 {
    #[inline]
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        buf.push(*self);
        Ok(())
    }
}

impl Decode for u8 {
    #[inline]
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        match buf.first() {
            Some(byte) => Ok((*byte, 1)),
            None => Err(EncodingError::UnexpectedEof {
                needed: 1,
                available: 0,
            }),
        }
    }
}

/// Floats travel as their raw bit pattern, so NaN payloads and signed
/// zeros round-trip exactly.
impl Encode for f64 {
    #[inline]
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.to_bits().encode_to(buf)
    }
}

impl Decode for f64 {
    #[inline]
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (bits, consumed) = u64::decode_from(buf)?;
        Ok((f64::from_bits(bits), consumed))
    }
}

impl Encode for bool {
    #[inline]
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        buf.push(*self as u8);
        Ok(())
    }
}

impl Decode for bool {
    #[inline]
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (byte, consumed) = u8::decode_from(buf)?;
        match byte {
            0 => Ok((false, consumed)),
            1 => Ok((true, consumed)),
            other => Err(EncodingError::InvalidBool(other)),
        }
    }
}

impl<const N: usize> Encode for [u8; N] {
    #[inline]
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        buf.extend_from_slice(self);
        Ok(())
    }
}

impl<const N: usize> Decode for [u8; N] {
    #[inline]
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        Ok((split_fixed::<N>(buf)?, N))
    }
}

// ------------------------------------------------------------------------------------------------
// Length-prefixed payloads
// ------------------------------------------------------------------------------------------------

impl Encode for Vec<u8> {
    #[inline]
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        write_len_prefix(self.len(), buf)?;
        buf.extend_from_slice(self);
        Ok(())
    }
}

impl Decode for Vec<u8> {
    #[inline]
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (len, prefix) = declared_len(buf, MAX_BYTE_LEN, "byte payload")?;
        Ok((buf[prefix..prefix + len].to_vec(), prefix + len))
    }
}

impl Encode for String {
    #[inline]
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        write_len_prefix(self.len(), buf)?;
        buf.extend_from_slice(self.as_bytes());
        Ok(())
    }
}

impl Decode for String {
    #[inline]
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (raw, consumed) = Vec::<u8>::decode_from(buf)?;
        Ok((String::from_utf8(raw)?, consumed))
    }
}

impl<T: Encode> Encode for Option<T> {
    #[inline]
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        match self {
            None => buf.push(0),
            Some(inner) => {
                buf.push(1);
                inner.encode_to(buf)?;
            }
        }
        Ok(())
    }
}

impl<T: Decode> Decode for Option<T> {
    #[inline]
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (tag, prefix) = u8::decode_from(buf)?;
        match tag {
            0 => Ok((None, prefix)),
            1 => {
                let (inner, consumed) = T::decode_from(&buf[prefix..])?;
                Ok((Some(inner), prefix + consumed))
            }
            other => Err(EncodingError::InvalidTag {
                tag: other as u32,
                type_name: "Option<T>",
            }),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Typed sequences and string maps
//
// `Vec<u8>` above is raw bytes; a blanket `Vec<T>` impl would collide
// with it under coherence, so typed sequences go through free functions.
// ------------------------------------------------------------------------------------------------

/// Write a typed slice as `[u32 count][T]…`.
pub fn encode_vec<T: Encode>(items: &[T], buf: &mut Vec<u8>) -> Result<(), EncodingError> {
    write_len_prefix(items.len(), buf)?;
    for item in items {
        item.encode_to(buf)?;
    }
    Ok(())
}

/// Read a typed `Vec<T>` back; the count is capped at
/// [`MAX_VEC_ELEMENTS`] before any allocation happens.
pub fn decode_vec<T: Decode>(buf: &[u8]) -> Result<(Vec<T>, usize), EncodingError> {
    let (count, mut offset) = u32::decode_from(buf)?;
    if count > MAX_VEC_ELEMENTS {
        return Err(EncodingError::LengthOverflow(format!(
            "sequence claims {count} elements but the cap is {MAX_VEC_ELEMENTS}"
        )));
    }
    let mut items = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let (item, consumed) = T::decode_from(&buf[offset..])?;
        offset += consumed;
        items.push(item);
    }
    Ok((items, offset))
}

/// Write a string map as `[u32 count][key][value]…`.
///
/// The map is a `BTreeMap`, so entries always emit in ascending key
/// order and the encoded form is deterministic.
pub fn encode_string_map(
    map: &BTreeMap<String, String>,
    buf: &mut Vec<u8>,
) -> Result<(), EncodingError> {
    write_len_prefix(map.len(), buf)?;
    for (key, value) in map {
        key.encode_to(buf)?;
        value.encode_to(buf)?;
    }
    Ok(())
}

/// Read a string map back from `[u32 count][key][value]…`.
pub fn decode_string_map(buf: &[u8]) -> Result<(BTreeMap<String, String>, usize), EncodingError> {
    let (count, mut offset) = u32::decode_from(buf)?;
    if count > MAX_VEC_ELEMENTS {
        return Err(EncodingError::LengthOverflow(format!(
            "map claims {count} entries but the cap is {MAX_VEC_ELEMENTS}"
        )));
    }
    let mut map = BTreeMap::new();
    for _ in 0..count {
        let (key, consumed) = String::decode_from(&buf[offset..])?;
        offset += consumed;
        let (value, consumed) = String::decode_from(&buf[offset..])?;
        offset += consumed;
        map.insert(key, value);
    }
    Ok((map, offset))
}
