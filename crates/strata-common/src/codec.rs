//! Minimal MessagePack encoding primitives.
//!
//! Only the subset used by the collection payloads: array and map headers,
//! binary blobs, strings, and integers. The packer always emits the
//! smallest legal representation; the unpacker accepts every legal
//! representation of the requested type family and fails with a decode
//! error on anything else.

use crate::{Result, StrataError};
use bytes::{BufMut, Bytes, BytesMut};

/// Incremental MessagePack writer.
#[derive(Debug, Default)]
pub struct MsgPacker {
    buf: BytesMut,
}

impl MsgPacker {
    /// Creates an empty packer.
    pub fn new() -> Self {
        Self {
            buf: BytesMut::new(),
        }
    }

    /// Writes an array header announcing `n` elements.
    pub fn array_header(&mut self, n: usize) {
        if n <= 0x0f {
            self.buf.put_u8(0x90 | n as u8);
        } else if n <= 0xffff {
            self.buf.put_u8(0xdc);
            self.buf.put_u16(n as u16);
        } else {
            self.buf.put_u8(0xdd);
            self.buf.put_u32(n as u32);
        }
    }

    /// Writes a map header announcing `n` key-value pairs.
    pub fn map_header(&mut self, n: usize) {
        if n <= 0x0f {
            self.buf.put_u8(0x80 | n as u8);
        } else if n <= 0xffff {
            self.buf.put_u8(0xde);
            self.buf.put_u16(n as u16);
        } else {
            self.buf.put_u8(0xdf);
            self.buf.put_u32(n as u32);
        }
    }

    /// Writes a binary blob (header plus payload).
    pub fn bin(&mut self, data: &[u8]) {
        let n = data.len();
        if n <= 0xff {
            self.buf.put_u8(0xc4);
            self.buf.put_u8(n as u8);
        } else if n <= 0xffff {
            self.buf.put_u8(0xc5);
            self.buf.put_u16(n as u16);
        } else {
            self.buf.put_u8(0xc6);
            self.buf.put_u32(n as u32);
        }
        self.buf.put_slice(data);
    }

    /// Writes a UTF-8 string.
    pub fn str(&mut self, s: &str) {
        let n = s.len();
        if n <= 0x1f {
            self.buf.put_u8(0xa0 | n as u8);
        } else if n <= 0xff {
            self.buf.put_u8(0xd9);
            self.buf.put_u8(n as u8);
        } else if n <= 0xffff {
            self.buf.put_u8(0xda);
            self.buf.put_u16(n as u16);
        } else {
            self.buf.put_u8(0xdb);
            self.buf.put_u32(n as u32);
        }
        self.buf.put_slice(s.as_bytes());
    }

    /// Writes an unsigned integer.
    pub fn uint(&mut self, v: u64) {
        if v <= 0x7f {
            self.buf.put_u8(v as u8);
        } else if v <= 0xff {
            self.buf.put_u8(0xcc);
            self.buf.put_u8(v as u8);
        } else if v <= 0xffff {
            self.buf.put_u8(0xcd);
            self.buf.put_u16(v as u16);
        } else if v <= 0xffff_ffff {
            self.buf.put_u8(0xce);
            self.buf.put_u32(v as u32);
        } else {
            self.buf.put_u8(0xcf);
            self.buf.put_u64(v);
        }
    }

    /// Writes a signed integer.
    pub fn int(&mut self, v: i64) {
        if v >= 0 {
            self.uint(v as u64);
        } else if v >= -32 {
            self.buf.put_u8(v as u8);
        } else if v >= i8::MIN as i64 {
            self.buf.put_u8(0xd0);
            self.buf.put_i8(v as i8);
        } else if v >= i16::MIN as i64 {
            self.buf.put_u8(0xd1);
            self.buf.put_i16(v as i16);
        } else if v >= i32::MIN as i64 {
            self.buf.put_u8(0xd2);
            self.buf.put_i32(v as i32);
        } else {
            self.buf.put_u8(0xd3);
            self.buf.put_i64(v);
        }
    }

    /// Consumes the packer and returns the encoded bytes.
    pub fn into_bytes(self) -> Bytes {
        self.buf.freeze()
    }
}

enum Num {
    Unsigned(u64),
    Signed(i64),
}

/// Incremental MessagePack reader over a byte slice.
#[derive(Debug)]
pub struct MsgUnpacker<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> MsgUnpacker<'a> {
    /// Creates an unpacker over `buf`.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Returns true if any input remains.
    pub fn has_next(&self) -> bool {
        self.pos < self.buf.len()
    }

    /// Fails unless the whole input has been consumed.
    pub fn expect_end(&self) -> Result<()> {
        if self.has_next() {
            return Err(StrataError::Decode(format!(
                "{} trailing bytes after value",
                self.buf.len() - self.pos
            )));
        }
        Ok(())
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.buf.len() - self.pos < n {
            return Err(StrataError::Decode("unexpected end of input".to_string()));
        }
        let s = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }

    fn take_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn take_u16(&mut self) -> Result<u16> {
        let s = self.take(2)?;
        Ok(u16::from_be_bytes([s[0], s[1]]))
    }

    fn take_u32(&mut self) -> Result<u32> {
        let s = self.take(4)?;
        Ok(u32::from_be_bytes([s[0], s[1], s[2], s[3]]))
    }

    fn take_u64(&mut self) -> Result<u64> {
        let s = self.take(8)?;
        Ok(u64::from_be_bytes([
            s[0], s[1], s[2], s[3], s[4], s[5], s[6], s[7],
        ]))
    }

    /// Reads an array header, returning the element count.
    pub fn array_header(&mut self) -> Result<usize> {
        match self.take_u8()? {
            b if b & 0xf0 == 0x90 => Ok((b & 0x0f) as usize),
            0xdc => Ok(self.take_u16()? as usize),
            0xdd => Ok(self.take_u32()? as usize),
            b => Err(StrataError::Decode(format!(
                "expected array header, got 0x{b:02x}"
            ))),
        }
    }

    /// Reads a map header, returning the pair count.
    pub fn map_header(&mut self) -> Result<usize> {
        match self.take_u8()? {
            b if b & 0xf0 == 0x80 => Ok((b & 0x0f) as usize),
            0xde => Ok(self.take_u16()? as usize),
            0xdf => Ok(self.take_u32()? as usize),
            b => Err(StrataError::Decode(format!(
                "expected map header, got 0x{b:02x}"
            ))),
        }
    }

    /// Reads a binary blob.
    pub fn bin(&mut self) -> Result<&'a [u8]> {
        let n = match self.take_u8()? {
            0xc4 => self.take_u8()? as usize,
            0xc5 => self.take_u16()? as usize,
            0xc6 => self.take_u32()? as usize,
            b => {
                return Err(StrataError::Decode(format!(
                    "expected binary, got 0x{b:02x}"
                )))
            }
        };
        self.take(n)
    }

    /// Reads a UTF-8 string.
    pub fn str(&mut self) -> Result<&'a str> {
        let n = match self.take_u8()? {
            b if b & 0xe0 == 0xa0 => (b & 0x1f) as usize,
            0xd9 => self.take_u8()? as usize,
            0xda => self.take_u16()? as usize,
            0xdb => self.take_u32()? as usize,
            b => {
                return Err(StrataError::Decode(format!(
                    "expected string, got 0x{b:02x}"
                )))
            }
        };
        std::str::from_utf8(self.take(n)?)
            .map_err(|_| StrataError::Decode("invalid utf-8 in string".to_string()))
    }

    fn number(&mut self) -> Result<Num> {
        match self.take_u8()? {
            b @ 0x00..=0x7f => Ok(Num::Unsigned(b as u64)),
            b @ 0xe0..=0xff => Ok(Num::Signed((b as i8) as i64)),
            0xcc => Ok(Num::Unsigned(self.take_u8()? as u64)),
            0xcd => Ok(Num::Unsigned(self.take_u16()? as u64)),
            0xce => Ok(Num::Unsigned(self.take_u32()? as u64)),
            0xcf => Ok(Num::Unsigned(self.take_u64()?)),
            0xd0 => Ok(Num::Signed(self.take_u8()? as i8 as i64)),
            0xd1 => Ok(Num::Signed(self.take_u16()? as i16 as i64)),
            0xd2 => Ok(Num::Signed(self.take_u32()? as i32 as i64)),
            0xd3 => Ok(Num::Signed(self.take_u64()? as i64)),
            b => Err(StrataError::Decode(format!(
                "expected integer, got 0x{b:02x}"
            ))),
        }
    }

    /// Reads an unsigned integer, accepting any integer representation
    /// whose value is non-negative.
    pub fn uint(&mut self) -> Result<u64> {
        match self.number()? {
            Num::Unsigned(v) => Ok(v),
            Num::Signed(v) => u64::try_from(v)
                .map_err(|_| StrataError::Decode(format!("expected unsigned integer, got {v}"))),
        }
    }

    /// Reads a signed integer, accepting any integer representation that
    /// fits an i64.
    pub fn int(&mut self) -> Result<i64> {
        match self.number()? {
            Num::Unsigned(v) => i64::try_from(v)
                .map_err(|_| StrataError::Decode(format!("integer {v} out of range"))),
            Num::Signed(v) => Ok(v),
        }
    }
}
