//! SOCKS command replies
//!
//! ```text
//! SOCKS5:
//! +----+-----+-------+------+----------+----------+
//! |VER | REP |  RSV  | ATYP | BND.ADDR | BND.PORT |
//! +----+-----+-------+------+----------+----------+
//! | 1  |  1  | X'00' |  1   | Variable |    2     |
//! +----+-----+-------+------+----------+----------+
//!
//! SOCKS4:
//! +----+----+---------+-------+
//! | VN | CD | DSTPORT | DSTIP |
//! +----+----+---------+-------+
//! | 1  | 1  |    2    |   4   |
//! +----+----+---------+-------+
//! ```

use super::consts::*;
use super::{Address, Version};
use crate::codec::{Readable, Writable};
use crate::error::{CodecError, Socks4ReplyCode, Socks5ReplyCode};
use bytes::Bytes;
use std::io;
use std::net::Ipv4Addr;

/// A SOCKS reply frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Protocol version the reply answers
    pub version: Version,
    /// Raw reply code
    pub rep: u8,
    /// Bound or destination address
    pub address: Address,
    /// Reserved byte (SOCKS5 only)
    pub rsv: u8,
}

impl Reply {
    /// Create a reply with a zero reserved byte
    pub fn new(version: Version, rep: u8, address: Address) -> Self {
        Reply {
            version,
            rep,
            address,
            rsv: SOCKS5_RESERVED,
        }
    }

    /// Success reply for the given version
    pub fn success(version: Version, address: Address) -> Self {
        let rep = match version {
            Version::Socks5 => Socks5ReplyCode::Succeeded.into(),
            Version::Socks4 => Socks4ReplyCode::Granted.into(),
        };
        Self::new(version, rep, address)
    }

    /// Failure reply carrying the code that best matches `err`
    pub fn from_io_error(version: Version, err: &io::Error) -> Self {
        let rep = match version {
            Version::Socks5 => Socks5ReplyCode::from(err).into(),
            Version::Socks4 => Socks4ReplyCode::from(err).into(),
        };
        Self::new(version, rep, Address::unspecified())
    }

    /// Generic failure reply: generalFailure or rejected
    pub fn failure(version: Version) -> Self {
        let rep = match version {
            Version::Socks5 => Socks5ReplyCode::GeneralFailure.into(),
            Version::Socks4 => Socks4ReplyCode::Rejected.into(),
        };
        Self::new(version, rep, Address::unspecified())
    }

    /// Whether the code means success for this version
    pub fn is_success(&self) -> bool {
        match self.version {
            Version::Socks5 => self.rep == u8::from(Socks5ReplyCode::Succeeded),
            Version::Socks4 => self.rep == u8::from(Socks4ReplyCode::Granted),
        }
    }

    /// Human readable description of the reply code
    pub fn message(&self) -> String {
        let known = match self.version {
            Version::Socks5 => Socks5ReplyCode::try_from(self.rep).ok().map(|c| c.message()),
            Version::Socks4 => Socks4ReplyCode::try_from(self.rep).ok().map(|c| c.message()),
        };
        match known {
            Some(msg) => msg.to_string(),
            None => format!("Unknown reply code: {:#04x}", self.rep),
        }
    }

    /// Encode to wire bytes.
    ///
    /// SOCKS4 replies can only carry an IPv4 address; anything else is
    /// sent as `0.0.0.0` with the original port.
    pub fn encode(&self) -> Result<Bytes, CodecError> {
        let mut out = Writable::new();
        match self.version {
            Version::Socks5 => {
                out.push(SOCKS5_VERSION).push(self.rep).push(self.rsv);
                self.address.encode(&mut out)?;
            }
            Version::Socks4 => {
                let ip = match &self.address {
                    Address::Ipv4(ip, _) => *ip,
                    _ => Ipv4Addr::UNSPECIFIED,
                };
                out.push(SOCKS4_REPLY_VERSION)
                    .push(self.rep)
                    .push_u16(self.address.port())
                    .push(ip.octets());
            }
        }
        Ok(out.to_bytes())
    }

    /// Decode a reply to a request of `version`
    pub fn decode(input: &mut Readable<'_>, version: Version) -> Result<Self, CodecError> {
        let ver = input.read_u8()?;
        match version {
            Version::Socks5 => {
                if ver != SOCKS5_VERSION {
                    return Err(CodecError::UnsupportedVersion(ver));
                }
                let rep = input.read_u8()?;
                let rsv = input.read_u8()?;
                let address = Address::decode(input)?;
                Ok(Reply {
                    version,
                    rep,
                    address,
                    rsv,
                })
            }
            Version::Socks4 => {
                // Some servers echo the request version instead of 0
                if ver != SOCKS4_REPLY_VERSION && ver != SOCKS4_VERSION {
                    return Err(CodecError::UnsupportedVersion(ver));
                }
                let rep = input.read_u8()?;
                let port = input.read_u16()?;
                let ip = input.read(4)?;
                Ok(Reply::new(
                    version,
                    rep,
                    Address::Ipv4(Ipv4Addr::new(ip[0], ip[1], ip[2], ip[3]), port),
                ))
            }
        }
    }
}
