//! Write accumulator

use bytes::{BufMut, Bytes, BytesMut};

/// A single pushed item: one byte or a run of bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// A single byte
    Byte(u8),
    /// A byte sequence
    Bytes(Bytes),
}

impl Segment {
    fn len(&self) -> usize {
        match self {
            Segment::Byte(_) => 1,
            Segment::Bytes(b) => b.len(),
        }
    }
}

impl From<u8> for Segment {
    fn from(b: u8) -> Self {
        Segment::Byte(b)
    }
}

impl From<&[u8]> for Segment {
    fn from(b: &[u8]) -> Self {
        Segment::Bytes(Bytes::copy_from_slice(b))
    }
}

impl<const N: usize> From<[u8; N]> for Segment {
    fn from(b: [u8; N]) -> Self {
        Segment::Bytes(Bytes::copy_from_slice(&b))
    }
}

impl From<Vec<u8>> for Segment {
    fn from(b: Vec<u8>) -> Self {
        Segment::Bytes(Bytes::from(b))
    }
}

impl From<Bytes> for Segment {
    fn from(b: Bytes) -> Self {
        Segment::Bytes(b)
    }
}

/// Ordered collection of segments, concatenated once by [`Writable::to_bytes`]
#[derive(Debug, Clone, Default)]
pub struct Writable {
    segments: Vec<Segment>,
}

impl Writable {
    /// Create an empty writer
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a byte or byte sequence
    pub fn push<T: Into<Segment>>(&mut self, item: T) -> &mut Self {
        self.segments.push(item.into());
        self
    }

    /// Append a big-endian u16
    pub fn push_u16(&mut self, value: u16) -> &mut Self {
        self.push(value.to_be_bytes())
    }

    /// Total number of bytes pushed
    pub fn len(&self) -> usize {
        self.segments.iter().map(Segment::len).sum()
    }

    /// Whether nothing has been pushed
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Concatenate every segment into one contiguous buffer
    pub fn to_bytes(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(self.len());
        for segment in &self.segments {
            match segment {
                Segment::Byte(b) => out.put_u8(*b),
                Segment::Bytes(b) => out.put_slice(b),
            }
        }
        out.freeze()
    }
}
