//! Tests for primitive type encoding/decoding: integers, bool, fixed
//! arrays, byte vectors, strings.

use crate::encoding::*;

// ------------------------------------------------------------------------------------------------
// u8
// ------------------------------------------------------------------------------------------------

#[test]
fn roundtrip_u8() {
    let val: u8 = 0xAB;
    let bytes = encode_to_vec(&val).unwrap();
    assert_eq!(bytes, [0xAB]);
    let (decoded, consumed) = decode_from_slice::<u8>(&bytes).unwrap();
    assert_eq!(decoded, val);
    assert_eq!(consumed, 1);
}

// ------------------------------------------------------------------------------------------------
// u32
// ------------------------------------------------------------------------------------------------

#[test]
fn roundtrip_u32() {
    let val: u32 = 0xDEAD_BEEF;
    let bytes = encode_to_vec(&val).unwrap();
    assert_eq!(bytes, [0xEF, 0xBE, 0xAD, 0xDE]); // little-endian
    let (decoded, consumed) = decode_from_slice::<u32>(&bytes).unwrap();
    assert_eq!(decoded, val);
    assert_eq!(consumed, 4);
}

#[test]
fn decode_u32_short_buffer() {
    let err = decode_from_slice::<u32>(&[0x01, 0x02]).unwrap_err();
    assert!(matches!(
        err,
        EncodingError::UnexpectedEof {
            needed: 4,
            available: 2
        }
    ));
}

// ------------------------------------------------------------------------------------------------
// u64
// ------------------------------------------------------------------------------------------------

#[test]
fn roundtrip_u64() {
    let val: u64 = 0x0102_0304_0506_0708;
    let bytes = encode_to_vec(&val).unwrap();
    assert_eq!(bytes, [0x08, 0x07, 0x06, 0x05, 0x04, 0x03, 0x02, 0x01]);
    let (decoded, consumed) = decode_from_slice::<u64>(&bytes).unwrap();
    assert_eq!(decoded, val);
    assert_eq!(consumed, 8);
}

// ------------------------------------------------------------------------------------------------
// i64 (timestamps)
// ------------------------------------------------------------------------------------------------

#[test]
fn roundtrip_i64_extremes() {
    for val in [0i64, 1, -1, 1_000_000, i64::MIN, i64::MAX] {
        let bytes = encode_to_vec(&val).unwrap();
        let (decoded, consumed) = decode_from_slice::<i64>(&bytes).unwrap();
        assert_eq!(decoded, val);
        assert_eq!(consumed, 8);
    }
}

// ------------------------------------------------------------------------------------------------
// bool
// ------------------------------------------------------------------------------------------------

#[test]
fn roundtrip_bool() {
    for val in [true, false] {
        let bytes = encode_to_vec(&val).unwrap();
        let (decoded, consumed) = decode_from_slice::<bool>(&bytes).unwrap();
        assert_eq!(decoded, val);
        assert_eq!(consumed, 1);
    }
}

#[test]
fn decode_bool_invalid_byte() {
    let err = decode_from_slice::<bool>(&[0x02]).unwrap_err();
    assert!(matches!(err, EncodingError::InvalidBool(0x02)));
}

// ------------------------------------------------------------------------------------------------
// Fixed-size arrays
// ------------------------------------------------------------------------------------------------

#[test]
fn roundtrip_fixed_array() {
    let val: [u8; 4] = *b"TSDS";
    let bytes = encode_to_vec(&val).unwrap();
    assert_eq!(bytes, b"TSDS"); // no length prefix
    let (decoded, consumed) = decode_from_slice::<[u8; 4]>(&bytes).unwrap();
    assert_eq!(decoded, val);
    assert_eq!(consumed, 4);
}

// ------------------------------------------------------------------------------------------------
// Byte vectors
// ------------------------------------------------------------------------------------------------

#[test]
fn roundtrip_byte_vec() {
    let val: Vec<u8> = b"opaque blob payload".to_vec();
    let bytes = encode_to_vec(&val).unwrap();
    assert_eq!(bytes.len(), 4 + val.len()); // u32 prefix + raw bytes
    let (decoded, consumed) = decode_from_slice::<Vec<u8>>(&bytes).unwrap();
    assert_eq!(decoded, val);
    assert_eq!(consumed, bytes.len());
}

#[test]
fn roundtrip_empty_byte_vec() {
    let val: Vec<u8> = Vec::new();
    let bytes = encode_to_vec(&val).unwrap();
    assert_eq!(bytes, [0, 0, 0, 0]);
    let (decoded, _) = decode_from_slice::<Vec<u8>>(&bytes).unwrap();
    assert!(decoded.is_empty());
}

#[test]
fn byte_slice_matches_byte_vec_encoding() {
    let owned: Vec<u8> = vec![1, 2, 3];
    let borrowed: &[u8] = &[1, 2, 3];
    assert_eq!(
        encode_to_vec(&owned).unwrap(),
        encode_to_vec(&borrowed).unwrap()
    );
}

#[test]
fn decode_byte_vec_truncated_payload() {
    // Length says 10, only 3 bytes follow.
    let mut bytes = 10u32.to_le_bytes().to_vec();
    bytes.extend_from_slice(&[1, 2, 3]);
    let err = decode_from_slice::<Vec<u8>>(&bytes).unwrap_err();
    assert!(matches!(err, EncodingError::UnexpectedEof { .. }));
}

// ------------------------------------------------------------------------------------------------
// Strings
// ------------------------------------------------------------------------------------------------

#[test]
fn roundtrip_string() {
    let val = "entry-name_01".to_string();
    let bytes = encode_to_vec(&val).unwrap();
    let (decoded, consumed) = decode_from_slice::<String>(&bytes).unwrap();
    assert_eq!(decoded, val);
    assert_eq!(consumed, bytes.len());
}

#[test]
fn str_matches_string_encoding() {
    assert_eq!(
        encode_to_vec(&"bucket").unwrap(),
        encode_to_vec(&"bucket".to_string()).unwrap()
    );
}

#[test]
fn decode_string_invalid_utf8() {
    let mut bytes = 2u32.to_le_bytes().to_vec();
    bytes.extend_from_slice(&[0xFF, 0xFE]);
    let err = decode_from_slice::<String>(&bytes).unwrap_err();
    assert!(matches!(err, EncodingError::InvalidUtf8(_)));
}

// ------------------------------------------------------------------------------------------------
// Option<T>
// ------------------------------------------------------------------------------------------------

#[test]
fn roundtrip_option() {
    let some: Option<i64> = Some(1_000_000);
    let none: Option<i64> = None;

    let some_bytes = encode_to_vec(&some).unwrap();
    assert_eq!(some_bytes.len(), 9); // tag + i64
    let (decoded, _) = decode_from_slice::<Option<i64>>(&some_bytes).unwrap();
    assert_eq!(decoded, some);

    let none_bytes = encode_to_vec(&none).unwrap();
    assert_eq!(none_bytes, [0]);
    let (decoded, consumed) = decode_from_slice::<Option<i64>>(&none_bytes).unwrap();
    assert_eq!(decoded, none);
    assert_eq!(consumed, 1);
}

#[test]
fn decode_option_invalid_tag() {
    let err = decode_from_slice::<Option<i64>>(&[7]).unwrap_err();
    assert!(matches!(err, EncodingError::InvalidTag { tag: 7, .. }));
}
