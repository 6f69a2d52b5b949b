//! Read cursor

use crate::error::CodecError;

/// Sequential reader over an immutable byte slice.
///
/// Reads that run past the end fail with [`CodecError::Truncated`] instead
/// of returning a short slice, so a malformed frame can never yield
/// silently wrong field values.
#[derive(Debug, Clone)]
pub struct Readable<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Readable<'a> {
    /// Create a cursor positioned at the start of `buf`
    pub fn new(buf: &'a [u8]) -> Self {
        Readable { buf, pos: 0 }
    }

    /// Number of bytes consumed so far
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Number of bytes left to read
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Whether every byte has been consumed
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Unconsumed tail, without advancing
    pub fn rest(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }

    /// Read the next `n` bytes
    pub fn read(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        let out = self.cat(n)?;
        self.pos += n;
        Ok(out)
    }

    /// Read a single byte
    pub fn read_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.read(1)?[0])
    }

    /// Read a big-endian u16
    pub fn read_u16(&mut self) -> Result<u16, CodecError> {
        let b = self.read(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    /// Drain everything that is left
    pub fn read_rest(&mut self) -> &'a [u8] {
        let out = self.rest();
        self.pos = self.buf.len();
        out
    }

    /// Read up to, not including, the first occurrence of `delim`.
    ///
    /// The delimiter stays in the buffer.
    pub fn read_until(&mut self, delim: &[u8]) -> Result<&'a [u8], CodecError> {
        if delim.is_empty() {
            return Ok(&[]);
        }
        let rest = self.rest();
        let idx = rest
            .windows(delim.len())
            .position(|w| w == delim)
            .ok_or(CodecError::DelimiterNotFound)?;
        self.read(idx)
    }

    /// Read everything except the last `trailing` bytes of the buffer
    pub fn read_until_end(&mut self, trailing: usize) -> Result<&'a [u8], CodecError> {
        let available = self.remaining();
        if trailing > available {
            return Err(CodecError::Truncated {
                needed: trailing,
                available,
            });
        }
        self.read(available - trailing)
    }

    /// Peek at the next `n` bytes without consuming them
    pub fn cat(&self, n: usize) -> Result<&'a [u8], CodecError> {
        let available = self.remaining();
        if n > available {
            return Err(CodecError::Truncated {
                needed: n,
                available,
            });
        }
        Ok(&self.buf[self.pos..self.pos + n])
    }

    /// Skip `n` bytes
    pub fn skip(&mut self, n: usize) -> Result<(), CodecError> {
        self.read(n).map(|_| ())
    }
}
