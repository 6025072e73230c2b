//! Fixed-width UTF-16LE string fields

use crate::error::{FormatError, Result};

/// Decode a NUL-terminated UTF-16LE field
///
/// Decoding stops at the first NUL code unit or at the end of the field.
pub fn decode(bytes: &[u8]) -> Result<String> {
    let units = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .take_while(|&unit| unit != 0);

    char::decode_utf16(units)
        .collect::<std::result::Result<String, _>>()
        .map_err(|e| FormatError::InvalidUtf16(e.to_string()))
}

/// Encode a string into a zero-padded UTF-16LE field of `width` bytes
pub fn encode(value: &str, width: usize) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(width);
    for unit in value.encode_utf16() {
        out.extend_from_slice(&unit.to_le_bytes());
    }
    if out.len() > width {
        return Err(FormatError::InvalidUtf16(format!(
            "'{value}' needs {} bytes, field holds {width}",
            out.len()
        )));
    }
    out.resize(width, 0);
    Ok(out)
}

/// Encode into a fixed-size array field
pub fn encode_array<const N: usize>(value: &str) -> Result<[u8; N]> {
    let bytes = encode(value, N)?;
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes);
    Ok(out)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_stops_at_nul() {
        let mut field = encode("Content\\data.bin", 0x40).expect("fits");
        assert_eq!(field.len(), 0x40);
        assert_eq!(decode(&field).expect("decode"), "Content\\data.bin");

        // Garbage after the terminator is ignored
        let tail = field.len() - 2;
        field[tail] = 0x41;
        assert_eq!(decode(&field).expect("decode"), "Content\\data.bin");
    }

    #[test]
    fn test_decode_rejects_lone_surrogate() {
        let field = [0x00, 0xD8, 0x41, 0x00];
        assert!(matches!(decode(&field), Err(FormatError::InvalidUtf16(_))));
    }

    #[test]
    fn test_encode_too_long() {
        assert!(encode("abcdef", 4).is_err());
        let arr: [u8; 8] = encode_array("abcd").expect("exact fit");
        assert_eq!(decode(&arr).expect("decode"), "abcd");
    }
}
