//! Bounds-checked cursor over a received buffer.
//!
//! Every read names its byte order. EtherNet/IP fields are little-endian,
//! socket addresses inside an identity item and all BootP fields are
//! big-endian, so callers pick the accessor per field.

use crate::error::DecodeError;

pub(crate) struct ByteReader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> ByteReader<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    pub(crate) fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }

    pub(crate) fn take(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        if self.remaining() < len {
            return Err(DecodeError::TooShort {
                expected: self.offset + len,
                actual: self.data.len(),
            });
        }
        let slice = &self.data[self.offset..self.offset + len];
        self.offset += len;
        Ok(slice)
    }

    pub(crate) fn rest(&mut self) -> &'a [u8] {
        let slice = &self.data[self.offset..];
        self.offset = self.data.len();
        slice
    }

    pub(crate) fn u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    pub(crate) fn u16_le(&mut self) -> Result<u16, DecodeError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub(crate) fn u16_be(&mut self) -> Result<u16, DecodeError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub(crate) fn u32_le(&mut self) -> Result<u32, DecodeError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub(crate) fn u32_be(&mut self) -> Result<u32, DecodeError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub(crate) fn array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mixed_byte_orders() {
        let data = [0x34, 0x12, 0x12, 0x34, 0x78, 0x56, 0x34, 0x12];
        let mut reader = ByteReader::new(&data);
        assert_eq!(reader.u16_le().unwrap(), 0x1234);
        assert_eq!(reader.u16_be().unwrap(), 0x1234);
        assert_eq!(reader.u32_le().unwrap(), 0x12345678);
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_short_read_is_error() {
        let data = [0x01, 0x02, 0x03];
        let mut reader = ByteReader::new(&data);
        assert_eq!(reader.u16_le().unwrap(), 0x0201);
        assert_eq!(
            reader.u32_be(),
            Err(DecodeError::TooShort {
                expected: 6,
                actual: 3
            })
        );
    }

    #[test]
    fn test_rest_consumes_everything() {
        let data = [1, 2, 3, 4];
        let mut reader = ByteReader::new(&data);
        reader.u8().unwrap();
        assert_eq!(reader.rest(), &[2, 3, 4]);
        assert_eq!(reader.remaining(), 0);
    }
}
