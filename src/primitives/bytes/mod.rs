#![forbid(unsafe_code)]
//! Varint and cursor utilities shared by the hash encoding and the node codec.

pub mod var {
    //! Unsigned varints and ZigZag signed integers.

    use crate::error::{IavlError, Result};

    /// Encodes a u64 as an unsigned varint.
    pub fn encode_u64(mut v: u64, out: &mut Vec<u8>) {
        loop {
            let byte = (v & 0x7f) as u8;
            v >>= 7;
            if v == 0 {
                out.push(byte);
                break;
            }
            out.push(byte | 0x80);
        }
    }

    /// Decodes a u64 varint from a slice, updating the offset.
    pub fn decode_u64(src: &[u8], off: &mut usize) -> Result<u64> {
        let mut result = 0u64;
        let mut shift = 0u32;
        for i in 0..10 {
            let byte = *src
                .get(*off)
                .ok_or_else(|| IavlError::Corruption(format!("varint truncated at byte {i}")))?;
            *off += 1;
            let payload = (byte & 0x7f) as u64;
            if i == 9 && payload > 1 {
                return Err(IavlError::Corruption("varint overflows u64".into()));
            }
            result |= payload << shift;
            if byte & 0x80 == 0 {
                return Ok(result);
            }
            shift += 7;
        }
        Err(IavlError::Corruption("varint longer than 10 bytes".into()))
    }

    /// Encodes an i64 as a ZigZag varint.
    pub fn encode_i64(v: i64, out: &mut Vec<u8>) {
        let zigzag = ((v << 1) ^ (v >> 63)) as u64;
        encode_u64(zigzag, out);
    }

    /// Decodes a ZigZag varint, updating the offset.
    pub fn decode_i64(src: &[u8], off: &mut usize) -> Result<i64> {
        let zigzag = decode_u64(src, off)?;
        Ok(((zigzag >> 1) as i64) ^ (-((zigzag & 1) as i64)))
    }

    /// Writes a varint length prefix followed by the bytes.
    pub fn encode_bytes(bytes: &[u8], out: &mut Vec<u8>) {
        encode_u64(bytes.len() as u64, out);
        out.extend_from_slice(bytes);
    }
}

pub mod buf {
    //! A slice-backed cursor for parsing persisted records.

    use core::fmt;

    use super::var;
    use crate::error::{IavlError, Result};

    /// A cursor for reading bytes from a slice with offset tracking.
    pub struct Cursor<'a> {
        buf: &'a [u8],
        off: usize,
    }

    impl<'a> Cursor<'a> {
        /// Creates a new cursor starting at offset 0.
        pub fn new(buf: &'a [u8]) -> Self {
            Self { buf, off: 0 }
        }

        /// Takes the next `n` bytes, advancing the offset.
        pub fn take(&mut self, n: usize) -> Result<&'a [u8]> {
            let end = self
                .off
                .checked_add(n)
                .filter(|end| *end <= self.buf.len())
                .ok_or_else(|| {
                    IavlError::Corruption(format!(
                        "cursor take beyond buffer: need {n}, remaining {}",
                        self.remaining()
                    ))
                })?;
            let slice = &self.buf[self.off..end];
            self.off = end;
            Ok(slice)
        }

        /// Reads a single byte.
        pub fn read_u8(&mut self) -> Result<u8> {
            Ok(self.take(1)?[0])
        }

        /// Reads an unsigned varint.
        pub fn read_uvarint(&mut self) -> Result<u64> {
            var::decode_u64(self.buf, &mut self.off)
        }

        /// Reads a ZigZag varint.
        pub fn read_varint(&mut self) -> Result<i64> {
            var::decode_i64(self.buf, &mut self.off)
        }

        /// Reads a varint length prefix followed by that many bytes.
        pub fn read_bytes(&mut self) -> Result<&'a [u8]> {
            let len = usize::try_from(self.read_uvarint()?)
                .map_err(|_| IavlError::Corruption("byte length exceeds usize".into()))?;
            self.take(len)
        }

        /// Returns the number of bytes remaining in the buffer.
        pub fn remaining(&self) -> usize {
            self.buf.len().saturating_sub(self.off)
        }
    }

    impl<'a> fmt::Debug for Cursor<'a> {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("Cursor")
                .field("off", &self.off)
                .field("remaining", &self.remaining())
                .finish()
        }
    }
}
