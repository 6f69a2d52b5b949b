//! SOCKS5 UDP frame encapsulation
//!
//! ```text
//! +----+------+------+----------+----------+----------+
//! |RSV | FRAG | ATYP | DST.ADDR | DST.PORT |   DATA   |
//! +----+------+------+----------+----------+----------+
//! | 2  |  1   |  1   | Variable |    2     | Variable |
//! +----+------+------+----------+----------+----------+
//! ```

use super::Address;
use crate::codec::{Readable, Writable};
use crate::error::CodecError;
use bytes::Bytes;

/// A decoded UDP relay frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UdpFrame {
    /// Reserved field
    pub rsv: u16,
    /// Fragment number; only 0 (standalone) is relayed
    pub frag: u8,
    /// Destination (outbound) or source (inbound) address
    pub address: Address,
    /// Payload
    pub data: Bytes,
}

impl UdpFrame {
    /// Whether this frame is part of a fragment sequence
    pub fn is_fragmented(&self) -> bool {
        self.frag != 0
    }
}

/// Wrap `data` in a UDP relay frame addressed to `address`
pub fn create_udp_frame(address: &Address, data: &[u8], frag: u8) -> Result<Bytes, CodecError> {
    let mut out = Writable::new();
    out.push_u16(0).push(frag);
    address.encode(&mut out)?;
    out.push(data);
    Ok(out.to_bytes())
}

/// Unwrap a UDP relay frame
pub fn parse_udp_frame(buf: &[u8]) -> Result<UdpFrame, CodecError> {
    let mut input = Readable::new(buf);
    let rsv = input.read_u16()?;
    let frag = input.read_u8()?;
    let address = Address::decode(&mut input)?;
    let data = Bytes::copy_from_slice(input.read_rest());
    Ok(UdpFrame {
        rsv,
        frag,
        address,
        data,
    })
}
