//! Variable-length unsigned integers (LEB128) and fixed-width timestamps.
//!
//! Each byte carries 7 bits of the value, least significant group first;
//! the high bit is set on every byte except the last. Source ids and
//! payload lengths use this encoding, timestamps are 8 byte little-endian
//! `i64` values.

use std::io::{self, Read, Write};

/// Longest encoding of a `u64`.
pub const MAX_VARINT_LEN: usize = 10;

/// Number of bytes `value` occupies once encoded.
pub fn encoded_len(value: u64) -> usize {
    let bits = 64 - value.leading_zeros() as usize;
    bits.div_ceil(7).max(1)
}

/// Append the encoding of `value` to `buf`.
pub fn encode_uint(mut value: u64, buf: &mut Vec<u8>) {
    while value >= 0x80 {
        buf.push(0x80 | (value & 0x7F) as u8);
        value >>= 7;
    }
    buf.push(value as u8);
}

/// Decode a varint from the front of `data`, returning `(value, bytes_consumed)`.
///
/// Returns `None` when `data` ends before the final byte or the encoding
/// overflows a `u64`.
pub fn decode_uint(data: &[u8]) -> Option<(u64, usize)> {
    let mut value = 0u64;
    for (i, &byte) in data.iter().enumerate().take(MAX_VARINT_LEN) {
        let group = (byte & 0x7F) as u64;
        let shift = 7 * i as u32;
        if shift == 63 && group > 1 {
            return None;
        }
        value |= group << shift;
        if byte & 0x80 == 0 {
            return Some((value, i + 1));
        }
    }
    None
}

/// Write the encoding of `value`, returning the number of bytes written.
pub fn write_uint<W: Write + ?Sized>(writer: &mut W, value: u64) -> io::Result<usize> {
    let mut buf = Vec::with_capacity(MAX_VARINT_LEN);
    encode_uint(value, &mut buf);
    writer.write_all(&buf)?;
    Ok(buf.len())
}

/// Read one varint. `UnexpectedEof` on a short stream, `InvalidData` on overflow.
pub fn read_uint<R: Read + ?Sized>(reader: &mut R) -> io::Result<u64> {
    let mut value = 0u64;
    for i in 0..MAX_VARINT_LEN {
        let mut byte = [0u8; 1];
        reader.read_exact(&mut byte)?;
        let group = (byte[0] & 0x7F) as u64;
        let shift = 7 * i as u32;
        if shift == 63 && group > 1 {
            break;
        }
        value |= group << shift;
        if byte[0] & 0x80 == 0 {
            return Ok(value);
        }
    }
    Err(io::Error::new(io::ErrorKind::InvalidData, "varint overflows u64"))
}

/// Write an 8 byte little-endian timestamp.
pub fn write_timestamp<W: Write + ?Sized>(writer: &mut W, time_us: i64) -> io::Result<()> {
    writer.write_all(&time_us.to_le_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn decode_inverts_encode_below_2_pow_35(n in 0u64..(1u64 << 35)) {
            let mut buf = Vec::new();
            encode_uint(n, &mut buf);
            prop_assert_eq!(buf.len(), encoded_len(n));
            prop_assert_eq!(decode_uint(&buf), Some((n, buf.len())));
            prop_assert_eq!(read_uint(&mut buf.as_slice()).ok(), Some(n));
        }

        #[test]
        fn decode_inverts_encode_full_range(n in any::<u64>()) {
            let mut buf = Vec::new();
            encode_uint(n, &mut buf);
            prop_assert!(buf.len() <= MAX_VARINT_LEN);
            prop_assert_eq!(decode_uint(&buf), Some((n, buf.len())));
        }
    }

    #[test]
    fn length_is_ceil_bits_over_seven() {
        assert_eq!(encoded_len(0), 1);
        assert_eq!(encoded_len(0x7F), 1);
        assert_eq!(encoded_len(0x80), 2);
        assert_eq!(encoded_len(0x3FFF), 2);
        assert_eq!(encoded_len(0x4000), 3);
        assert_eq!(encoded_len(u64::MAX), 10);
    }

    #[test]
    fn known_encodings() {
        let mut buf = Vec::new();
        encode_uint(300, &mut buf);
        assert_eq!(buf, [0xAC, 0x02]);
    }

    #[test]
    fn truncated_and_overflowing_inputs() {
        assert_eq!(decode_uint(&[0x80, 0x80]), None);
        assert_eq!(decode_uint(&[0xFF; 11]), None);
        assert_eq!(decode_uint(&[0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x7F]), None);

        let err = read_uint(&mut [0x80u8].as_slice()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn timestamp_is_little_endian() {
        let mut buf = Vec::new();
        write_timestamp(&mut buf, 0x0102).unwrap();
        assert_eq!(buf, [0x02, 0x01, 0, 0, 0, 0, 0, 0]);
    }
}
