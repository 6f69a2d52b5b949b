//! Byte cursor primitives
//!
//! [`Readable`] is a bounds-checked read cursor over a borrowed slice and
//! [`Writable`] collects heterogeneous byte segments that are joined once,
//! at write time. Every wire message in the crate is built on these two.

mod readable;
mod writable;

pub use readable::Readable;
pub use writable::{Segment, Writable};
