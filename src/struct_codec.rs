//! Binary values stored as text: uppercase hex digits followed by a one-byte additive checksum.
//!
//! The checksum only catches truncated writes and hand edits. It is not meant to resist tampering.

use crate::error::StructError;

#[must_use]
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0_u8, |sum, &b| sum.wrapping_add(b))
}

/// Encodes `bytes` as hex with the checksum appended.
#[must_use]
pub fn pack(bytes: &[u8]) -> String {
    let mut text = hex::encode_upper(bytes);
    text.push_str(&hex::encode_upper([checksum(bytes)]));
    text
}

/// Decodes text produced by [`pack`], expecting exactly `expected_len` bytes of payload.
pub fn unpack(text: &[u8], expected_len: usize) -> Result<Vec<u8>, StructError> {
    let actual = text.len().saturating_sub(2) / 2;
    if text.len() < 2 || actual != expected_len {
        return Err(StructError::Length {
            expected: expected_len,
            actual,
        });
    }

    let mut bytes = hex::decode(text)?;
    let Some(stored) = bytes.pop() else {
        return Err(StructError::Length {
            expected: expected_len,
            actual: 0,
        });
    };

    let computed = checksum(&bytes);
    if stored != computed {
        return Err(StructError::Checksum { stored, computed });
    }

    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_appends_checksum() {
        assert_eq!(pack(&[0x01, 0x02, 0xFF]), "0102FF02");
        assert_eq!(pack(&[]), "00");
    }

    #[test]
    fn unpack_recovers_bytes() {
        let bytes = [0xDE, 0xAD, 0xBE, 0xEF, 0x00, 0x7F];
        let packed = pack(&bytes);
        assert_eq!(unpack(packed.as_bytes(), bytes.len()).expect("valid struct"), bytes);
    }

    #[test]
    fn unpack_accepts_lowercase() {
        assert_eq!(unpack(b"0102ff02", 3).expect("valid struct"), [0x01, 0x02, 0xFF]);
    }

    #[test]
    fn unpack_rejects_wrong_length() {
        assert!(matches!(
            unpack(b"0102FF02", 4),
            Err(StructError::Length {
                expected: 4,
                actual: 3
            })
        ));
        assert!(matches!(unpack(b"0", 0), Err(StructError::Length { .. })));
    }

    #[test]
    fn unpack_rejects_odd_length() {
        assert!(matches!(
            unpack(b"0102FF020", 3),
            Err(StructError::InvalidHex(_))
        ));
    }

    #[test]
    fn unpack_rejects_non_hex() {
        assert!(matches!(
            unpack(b"01G2FF02", 3),
            Err(StructError::InvalidHex(_))
        ));
    }

    #[test]
    fn any_corrupted_digit_fails() {
        let bytes = [0x10, 0x20, 0x30, 0x40];
        let packed = pack(&bytes);

        for i in 0..packed.len() {
            let mut corrupted = packed.clone().into_bytes();
            corrupted[i] = if corrupted[i] == b'0' { b'1' } else { b'0' };
            assert!(
                unpack(&corrupted, bytes.len()).is_err(),
                "corruption at {i} went unnoticed"
            );
        }
    }
}
