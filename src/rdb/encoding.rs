//! Low-level snapshot decoding: a cursor over the raw bytes plus the
//! length-prefix and string encodings.
//!
//! The top two bits of the first length byte select the mode: 6-bit inline,
//! 14-bit two-byte, 32-bit big-endian, or "special", where the low six bits
//! select an integer-as-string encoding (8/16/32-bit unsigned,
//! little-endian) or an LZF-compressed string.

use crate::rdb::RdbError;

/// Cursor over the snapshot bytes.
pub struct Reader<'a> {
    bytes: &'a [u8],
    position: usize,
}

impl<'a> Reader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Reader { bytes, position: 0 }
    }

    pub fn read_u8(&mut self) -> Result<u8, RdbError> {
        let byte = *self
            .bytes
            .get(self.position)
            .ok_or_else(|| RdbError::InvalidFormat("unexpected end of snapshot".to_string()))?;
        self.position += 1;
        Ok(byte)
    }

    pub fn read_exact(&mut self, len: usize) -> Result<&'a [u8], RdbError> {
        if self.position + len > self.bytes.len() {
            return Err(RdbError::InvalidFormat(
                "unexpected end of snapshot".to_string(),
            ));
        }

        let slice = &self.bytes[self.position..self.position + len];
        self.position += len;
        Ok(slice)
    }

    pub fn read_u32_le(&mut self) -> Result<u32, RdbError> {
        let bytes: [u8; 4] = self.read_exact(4)?.try_into().unwrap();
        Ok(u32::from_le_bytes(bytes))
    }

    pub fn read_u64_le(&mut self) -> Result<u64, RdbError> {
        let bytes: [u8; 8] = self.read_exact(8)?.try_into().unwrap();
        Ok(u64::from_le_bytes(bytes))
    }
}

enum Length {
    Plain(usize),
    Int8,
    Int16,
    Int32,
    Lzf,
}

fn read_length(reader: &mut Reader) -> Result<Length, RdbError> {
    let first = reader.read_u8()?;

    match first >> 6 {
        0b00 => Ok(Length::Plain((first & 0b0011_1111) as usize)),
        0b01 => {
            let second = reader.read_u8()?;
            let length = (((first & 0b0011_1111) as usize) << 8) | second as usize;
            Ok(Length::Plain(length))
        }
        0b10 => {
            let bytes: [u8; 4] = reader.read_exact(4)?.try_into().unwrap();
            Ok(Length::Plain(u32::from_be_bytes(bytes) as usize))
        }
        _ => match first & 0b0011_1111 {
            0 => Ok(Length::Int8),
            1 => Ok(Length::Int16),
            2 => Ok(Length::Int32),
            3 => Ok(Length::Lzf),
            other => Err(RdbError::InvalidFormat(format!(
                "unknown special length encoding {}",
                other
            ))),
        },
    }
}

/// Reads a plain size (database index, hash-table hints). Special encodings
/// are not valid sizes.
pub fn read_size(reader: &mut Reader) -> Result<usize, RdbError> {
    match read_length(reader)? {
        Length::Plain(size) => Ok(size),
        _ => Err(RdbError::InvalidFormat(
            "expected a plain size, found a special encoding".to_string(),
        )),
    }
}

/// Reads a length-prefixed value as raw bytes. The integer specials are
/// unsigned little-endian and become their decimal renderings.
pub fn read_bytes(reader: &mut Reader) -> Result<Vec<u8>, RdbError> {
    match read_length(reader)? {
        Length::Plain(len) => Ok(reader.read_exact(len)?.to_vec()),
        Length::Int8 => Ok(reader.read_u8()?.to_string().into_bytes()),
        Length::Int16 => {
            let bytes: [u8; 2] = reader.read_exact(2)?.try_into().unwrap();
            Ok(u16::from_le_bytes(bytes).to_string().into_bytes())
        }
        Length::Int32 => {
            let bytes: [u8; 4] = reader.read_exact(4)?.try_into().unwrap();
            Ok(u32::from_le_bytes(bytes).to_string().into_bytes())
        }
        Length::Lzf => Err(RdbError::Unsupported("LZF-compressed strings")),
    }
}

/// Reads a length-prefixed string where the format calls for text: keys and
/// metadata names and values.
pub fn read_string(reader: &mut Reader) -> Result<String, RdbError> {
    String::from_utf8(read_bytes(reader)?)
        .map_err(|_| RdbError::InvalidFormat("invalid UTF-8 in string".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_size_modes() {
        let test_cases: Vec<(&[u8], usize, &str)> = vec![
            (&[0x0a], 10, "6-bit inline"),
            (&[0x2a], 42, "6-bit inline upper range"),
            (&[0x42, 0xbc], 700, "14-bit two-byte"),
            (&[0x80, 0x00, 0x01, 0x00, 0x00], 65536, "32-bit big-endian"),
        ];

        for (input, expected, description) in test_cases {
            let mut reader = Reader::new(input);
            assert_eq!(read_size(&mut reader).unwrap(), expected, "{}", description);
        }
    }

    #[test]
    fn test_read_string_plain_and_integer_specials() {
        let test_cases: Vec<(&[u8], &str, &str)> = vec![
            (b"\x05hello", "hello", "plain 6-bit length"),
            (&[0xc0, 0x40], "64", "8-bit integer"),
            (&[0xc0, 0x00], "0", "8-bit zero"),
            (&[0xc0, 0xff], "255", "8-bit integer with the high bit set"),
            (&[0xc1, 0x39, 0x30], "12345", "16-bit little-endian integer"),
            (
                &[0xc1, 0xff, 0xff],
                "65535",
                "16-bit integer with the high bit set",
            ),
            (
                &[0xc2, 0x87, 0xd6, 0x12, 0x00],
                "1234567",
                "32-bit little-endian integer",
            ),
            (
                &[0xc2, 0xff, 0xff, 0xff, 0xff],
                "4294967295",
                "32-bit integer with the high bit set",
            ),
        ];

        for (input, expected, description) in test_cases {
            let mut reader = Reader::new(input);
            assert_eq!(
                read_string(&mut reader).unwrap(),
                expected,
                "{}",
                description
            );
        }
    }

    #[test]
    fn test_read_bytes_keeps_binary_payloads() {
        let mut reader = Reader::new(b"\x04\xff\x00\xfe\x01");
        assert_eq!(read_bytes(&mut reader).unwrap(), b"\xff\x00\xfe\x01");
    }

    #[test]
    fn test_lzf_string_is_unsupported() {
        let mut reader = Reader::new(&[0xc3, 0x00]);
        assert!(matches!(
            read_string(&mut reader),
            Err(RdbError::Unsupported(_))
        ));
    }

    #[test]
    fn test_truncated_input_is_an_error() {
        let mut reader = Reader::new(b"\x05hel");
        assert!(read_string(&mut reader).is_err());
    }
}
