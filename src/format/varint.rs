//! Variable-length unsigned integers used for key and value sizes.
//!
//! Base-128, least significant group first. Every byte is read as an `i8`:
//! a non-negative byte is the final group, a negative byte `b` is a
//! continuation carrying the group value `-(b + 1)`.
//!
//! ```text
//! 0        -> [0x00]
//! 127      -> [0x7F]
//! 128      -> [0xFF, 0x01]   (group 0 continued, then 1)
//! 300      -> [0xD3, 0x02]   (-(0xD3 as i8 + 1) = 44; 44 + 2 * 128 = 300)
//! ```

/// Longest encoding of a u64.
pub const MAX_VARINT_LEN: usize = 10;

/// Why a varint could not be decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarIntError {
    /// Input ended before a terminating byte.
    Truncated,
    /// The encoded value does not fit in 64 bits.
    Overflow,
}

/// Decode one varint from the start of `bytes`.
///
/// Returns the value and the number of bytes consumed.
pub fn decode(bytes: &[u8]) -> Result<(u64, usize), VarIntError> {
    let mut value: u64 = 0;
    let mut multiplier: Option<u64> = Some(1);

    for (i, &byte) in bytes.iter().enumerate() {
        if i == MAX_VARINT_LEN {
            return Err(VarIntError::Overflow);
        }
        let signed = byte as i8;
        let (digit, last) = if signed >= 0 {
            (signed as u64, true)
        } else {
            ((-(signed as i16 + 1)) as u64, false)
        };

        if digit != 0 {
            let m = multiplier.ok_or(VarIntError::Overflow)?;
            value = digit
                .checked_mul(m)
                .and_then(|d| value.checked_add(d))
                .ok_or(VarIntError::Overflow)?;
        }

        if last {
            return Ok((value, i + 1));
        }
        multiplier = multiplier.and_then(|m| m.checked_mul(128));
    }

    Err(VarIntError::Truncated)
}

/// Encode `value`, appending to `out`. Returns the number of bytes written.
pub fn encode_into(mut value: u64, out: &mut Vec<u8>) -> usize {
    if value == 0 {
        out.push(0);
        return 1;
    }
    let start = out.len();
    while value > 0 {
        let rem = (value & 0x7F) as i16;
        value >>= 7;
        let byte = if value > 0 { -rem - 1 } else { rem };
        out.push(byte as i8 as u8);
    }
    out.len() - start
}

pub fn encode(value: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(MAX_VARINT_LEN);
    encode_into(value, &mut out);
    out
}

/// Number of bytes `value` occupies when encoded.
pub fn encoded_len(value: u64) -> usize {
    if value == 0 {
        return 1;
    }
    let bits = 64 - value.leading_zeros() as usize;
    bits.div_ceil(7)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_known_encodings() {
        assert_eq!(encode(0), vec![0x00]);
        assert_eq!(encode(127), vec![0x7F]);
        assert_eq!(encode(128), vec![0xFF, 0x01]);
        assert_eq!(encode(300), vec![0xD3, 0x02]);
    }

    #[test]
    fn test_decode_stops_at_terminator() {
        // trailing bytes belong to the next field
        assert_eq!(decode(&[0xD3, 0x02, 0x55]), Ok((300, 2)));
        assert_eq!(decode(&[0x05, 0xFF]), Ok((5, 1)));
    }

    #[test]
    fn test_decode_truncated() {
        assert_eq!(decode(&[]), Err(VarIntError::Truncated));
        assert_eq!(decode(&[0xFF, 0x80]), Err(VarIntError::Truncated));
    }

    #[test]
    fn test_decode_overflow() {
        let too_long = [0xFFu8; 12];
        assert_eq!(decode(&too_long), Err(VarIntError::Overflow));

        // 10 groups whose top group pushes past u64
        let mut big = vec![0x80u8; 9];
        big.push(0x7F);
        assert_eq!(decode(&big), Err(VarIntError::Overflow));
    }

    #[test]
    fn test_u64_max_roundtrip() {
        let bytes = encode(u64::MAX);
        assert_eq!(bytes.len(), MAX_VARINT_LEN);
        assert_eq!(decode(&bytes), Ok((u64::MAX, MAX_VARINT_LEN)));
    }

    proptest! {
        #[test]
        fn prop_roundtrip_consumes_encoded_len(v in any::<u64>()) {
            let bytes = encode(v);
            prop_assert_eq!(bytes.len(), encoded_len(v));
            prop_assert_eq!(decode(&bytes), Ok((v, bytes.len())));
        }
    }
}
