//! SOCKS command requests
//!
//! ```text
//! SOCKS5:
//! +----+-----+-------+------+----------+----------+
//! |VER | CMD |  RSV  | ATYP | DST.ADDR | DST.PORT |
//! +----+-----+-------+------+----------+----------+
//! | 1  |  1  | X'00' |  1   | Variable |    2     |
//! +----+-----+-------+------+----------+----------+
//!
//! SOCKS4 (SOCKS4a when DSTIP is 0.0.0.x, x != 0):
//! +----+----+---------+-------+--------+------+-----------+------+
//! | VN | CD | DSTPORT | DSTIP | USERID | NULL | [DOMAIN]  |[NULL]|
//! +----+----+---------+-------+--------+------+-----------+------+
//! | 1  | 1  |    2    |   4   |  var   |  1   |    var    |  1   |
//! +----+----+---------+-------+--------+------+-----------+------+
//! ```

use super::consts::*;
use super::{Address, Command, Version};
use crate::codec::{Readable, Writable};
use crate::error::CodecError;
use bytes::Bytes;
use std::net::Ipv4Addr;

/// A parsed or outgoing SOCKS request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Protocol version
    pub version: Version,
    /// Requested command
    pub command: Command,
    /// Destination address
    pub address: Address,
    /// Reserved byte (SOCKS5 only)
    pub rsv: u8,
    /// Identification string (SOCKS4 only)
    pub user_id: Option<String>,
}

impl Request {
    /// Create a request with a zero reserved byte and no user id
    pub fn new(version: Version, command: Command, address: Address) -> Self {
        Request {
            version,
            command,
            address,
            rsv: SOCKS5_RESERVED,
            user_id: None,
        }
    }

    /// Attach a SOCKS4 user id. An empty id is the same as none on the wire and
    /// is stored as `None`.
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        let user_id = user_id.into();
        self.user_id = (!user_id.is_empty()).then_some(user_id);
        self
    }

    /// Decode a request of either version, chosen by the first byte
    pub fn decode(input: &mut Readable<'_>) -> Result<Self, CodecError> {
        match input.cat(1)?[0] {
            SOCKS5_VERSION => Self::decode_v5(input),
            SOCKS4_VERSION => Self::decode_v4(input),
            other => Err(CodecError::UnsupportedVersion(other)),
        }
    }

    /// Decode a SOCKS5 request
    pub fn decode_v5(input: &mut Readable<'_>) -> Result<Self, CodecError> {
        let ver = input.read_u8()?;
        if ver != SOCKS5_VERSION {
            return Err(CodecError::UnsupportedVersion(ver));
        }
        let cmd = input.read_u8()?;
        let rsv = input.read_u8()?;
        let atyp = input.cat(1)?[0];
        let command = Command::from_byte(cmd)?;
        // Reject an unknown ATYP before the address decode can report truncation
        super::AddressType::from_byte(atyp)?;
        let address = Address::decode(input)?;
        Ok(Request {
            version: Version::Socks5,
            command,
            address,
            rsv,
            user_id: None,
        })
    }

    /// Decode a SOCKS4 or SOCKS4a request
    pub fn decode_v4(input: &mut Readable<'_>) -> Result<Self, CodecError> {
        let ver = input.read_u8()?;
        if ver != SOCKS4_VERSION {
            return Err(CodecError::UnsupportedVersion(ver));
        }
        let cmd = input.read_u8()?;
        let port = input.read_u16()?;
        let ip = input.read(4)?;
        let user_id = input.read_until(&[0x00])?;
        input.skip(1)?;

        let command = Command::from_byte(cmd)?;
        let user_id = if user_id.is_empty() {
            None
        } else {
            Some(String::from_utf8_lossy(user_id).into_owned())
        };

        let address = if ip[0] == 0 && ip[1] == 0 && ip[2] == 0 && ip[3] != 0 {
            let name = input.read_until(&[0x00])?;
            input.skip(1)?;
            let name = std::str::from_utf8(name).map_err(|_| CodecError::InvalidDomain)?;
            Address::Domain(name.to_string(), port)
        } else {
            Address::Ipv4(Ipv4Addr::new(ip[0], ip[1], ip[2], ip[3]), port)
        };

        Ok(Request {
            version: Version::Socks4,
            command,
            address,
            rsv: SOCKS5_RESERVED,
            user_id,
        })
    }

    /// Encode to wire bytes
    pub fn encode(&self) -> Result<Bytes, CodecError> {
        let mut out = Writable::new();
        out.push(self.version.to_byte()).push(self.command.to_byte());
        match self.version {
            Version::Socks5 => {
                out.push(self.rsv);
                self.address.encode(&mut out)?;
            }
            Version::Socks4 => {
                out.push_u16(self.address.port());
                let domain = match &self.address {
                    Address::Ipv4(ip, _) => {
                        out.push(ip.octets());
                        None
                    }
                    Address::Domain(name, _) => {
                        out.push([0u8, 0, 0, 1]);
                        Some(name)
                    }
                    Address::Ipv6(..) => {
                        return Err(CodecError::UnsupportedAddressType(SOCKS5_ADDR_TYPE_IPV6))
                    }
                };
                if let Some(user_id) = &self.user_id {
                    out.push(user_id.as_bytes());
                }
                out.push(0x00u8);
                if let Some(name) = domain {
                    out.push(name.as_bytes()).push(0x00u8);
                }
            }
        }
        Ok(out.to_bytes())
    }
}
