use crate::encoding::{Decode, Encode, EncodingError, decode_from_slice, encode_to_vec};

fn roundtrip<T: Encode + Decode + PartialEq + std::fmt::Debug>(value: T, expected_len: usize) {
    let bytes = encode_to_vec(&value).unwrap();
    assert_eq!(bytes.len(), expected_len);
    let (decoded, consumed) = decode_from_slice::<T>(&bytes).unwrap();
    assert_eq!(decoded, value);
    assert_eq!(consumed, expected_len);
}

#[test]
fn test_u8_roundtrip() {
    roundtrip(0u8, 1);
    roundtrip(0x7Fu8, 1);
    roundtrip(u8::MAX, 1);
}

#[test]
fn test_u32_roundtrip_and_endianness() {
    roundtrip(0u32, 4);
    roundtrip(0xDEAD_BEEFu32, 4);
    roundtrip(u32::MAX, 4);

    let bytes = encode_to_vec(&0x0102_0304u32).unwrap();
    assert_eq!(bytes, vec![0x04, 0x03, 0x02, 0x01]);
}

#[test]
fn test_u64_roundtrip() {
    roundtrip(0u64, 8);
    roundtrip(1u64 << 63, 8);
    roundtrip(u64::MAX, 8);
}

#[test]
fn test_i64_roundtrip() {
    roundtrip(0i64, 8);
    roundtrip(-1i64, 8);
    roundtrip(i64::MIN, 8);
    roundtrip(i64::MAX, 8);
}

#[test]
fn test_f64_roundtrip_bit_exact() {
    roundtrip(0.0f64, 8);
    roundtrip(-1.5f64, 8);
    roundtrip(f64::MAX, 8);
    roundtrip(f64::INFINITY, 8);

    // NaN is not PartialEq-comparable; check the bit pattern instead.
    let bytes = encode_to_vec(&f64::NAN).unwrap();
    let (decoded, _) = decode_from_slice::<f64>(&bytes).unwrap();
    assert_eq!(decoded.to_bits(), f64::NAN.to_bits());
}

#[test]
fn test_bool_roundtrip() {
    roundtrip(true, 1);
    roundtrip(false, 1);
}

#[test]
fn test_bool_rejects_invalid_byte() {
    let err = decode_from_slice::<bool>(&[0x02]).unwrap_err();
    assert!(matches!(err, EncodingError::InvalidBool(0x02)));
}

#[test]
fn test_fixed_array_roundtrip() {
    roundtrip(*b"SSTB", 4);
    roundtrip([0u8; 16], 16);
}

#[test]
fn test_decode_empty_buffer_is_eof() {
    let err = decode_from_slice::<u64>(&[]).unwrap_err();
    assert!(matches!(
        err,
        EncodingError::UnexpectedEof {
            needed: 8,
            available: 0
        }
    ));
}

#[test]
fn test_decode_short_buffer_is_eof() {
    let err = decode_from_slice::<u32>(&[0x01, 0x02]).unwrap_err();
    assert!(matches!(err, EncodingError::UnexpectedEof { .. }));
}

#[test]
fn test_option_roundtrip() {
    roundtrip(Some(42u64), 9);
    roundtrip(None::<u64>, 1);
}

#[test]
fn test_option_rejects_bad_tag() {
    let err = decode_from_slice::<Option<u64>>(&[0x07]).unwrap_err();
    assert!(matches!(err, EncodingError::InvalidTag { tag: 7, .. }));
}
