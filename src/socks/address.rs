//! SOCKS endpoint addresses
//!
//! An [`Address`] is an IPv4, IPv6 or domain endpoint plus a port. It
//! converts between a host string and the wire triple of type byte, host
//! bytes and big-endian port.

use super::consts::*;
use crate::codec::{Readable, Writable};
use crate::error::CodecError;
use bytes::Bytes;
use std::fmt;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

/// Address family of an [`Address`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressType {
    /// IPv4 address
    Ipv4,
    /// IPv6 address
    Ipv6,
    /// Domain name
    Domain,
}

impl AddressType {
    /// Parse an ATYP byte
    pub fn from_byte(byte: u8) -> Result<Self, CodecError> {
        match byte {
            SOCKS5_ADDR_TYPE_IPV4 => Ok(AddressType::Ipv4),
            SOCKS5_ADDR_TYPE_DOMAIN => Ok(AddressType::Domain),
            SOCKS5_ADDR_TYPE_IPV6 => Ok(AddressType::Ipv6),
            other => Err(CodecError::UnsupportedAddressType(other)),
        }
    }

    /// The ATYP byte
    pub fn to_byte(self) -> u8 {
        match self {
            AddressType::Ipv4 => SOCKS5_ADDR_TYPE_IPV4,
            AddressType::Domain => SOCKS5_ADDR_TYPE_DOMAIN,
            AddressType::Ipv6 => SOCKS5_ADDR_TYPE_IPV6,
        }
    }
}

/// Wire form of an address, without any length prefix on the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireAddress {
    /// ATYP byte
    pub atyp: u8,
    /// Raw host bytes: 4 or 16 octets, or the domain text
    pub host: Bytes,
    /// Big-endian port
    pub port: [u8; 2],
}

/// A SOCKS endpoint
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Address {
    /// IPv4 address with port
    Ipv4(Ipv4Addr, u16),
    /// IPv6 address with port
    Ipv6(Ipv6Addr, u16),
    /// Domain name with port
    Domain(String, u16),
}

impl Address {
    /// Classify `host` and build an address.
    ///
    /// Dotted quads become IPv4, colon-hex (optionally bracketed) becomes
    /// IPv6, anything else is taken as a domain name. Never fails: a
    /// malformed host surfaces later as a connect error.
    pub fn parse(host: &str, port: u16) -> Self {
        if let Ok(ip) = host.parse::<Ipv4Addr>() {
            return Address::Ipv4(ip, port);
        }
        let unbracketed = host.trim_start_matches('[').trim_end_matches(']');
        if let Ok(ip) = unbracketed.parse::<Ipv6Addr>() {
            return Address::Ipv6(ip, port);
        }
        Address::Domain(host.to_string(), port)
    }

    /// Build a domain address without classifying the host
    pub fn domain(host: impl Into<String>, port: u16) -> Self {
        Address::Domain(host.into(), port)
    }

    /// `0.0.0.0:0`, used in failure replies
    pub fn unspecified() -> Self {
        Address::Ipv4(Ipv4Addr::UNSPECIFIED, 0)
    }

    /// Rebuild an address from its wire parts
    pub fn from_wire(atyp: u8, host: &[u8], port: [u8; 2]) -> Result<Self, CodecError> {
        let port = u16::from_be_bytes(port);
        match AddressType::from_byte(atyp)? {
            AddressType::Ipv4 => {
                let octets: [u8; 4] = host.try_into().map_err(|_| CodecError::Truncated {
                    needed: 4,
                    available: host.len(),
                })?;
                Ok(Address::Ipv4(Ipv4Addr::from(octets), port))
            }
            AddressType::Ipv6 => {
                let octets: [u8; 16] = host.try_into().map_err(|_| CodecError::Truncated {
                    needed: 16,
                    available: host.len(),
                })?;
                Ok(Address::Ipv6(Ipv6Addr::from(octets), port))
            }
            AddressType::Domain => {
                let name = std::str::from_utf8(host).map_err(|_| CodecError::InvalidDomain)?;
                Ok(Address::Domain(name.to_string(), port))
            }
        }
    }

    /// Split into wire parts. The caller adds the domain length prefix.
    pub fn to_wire(&self) -> Result<WireAddress, CodecError> {
        let host = match self {
            Address::Ipv4(ip, _) => Bytes::copy_from_slice(&ip.octets()),
            Address::Ipv6(ip, _) => Bytes::copy_from_slice(&ip.octets()),
            Address::Domain(name, _) => {
                if name.len() > MAX_DOMAIN_LEN {
                    return Err(CodecError::DomainTooLong(name.len()));
                }
                Bytes::copy_from_slice(name.as_bytes())
            }
        };
        Ok(WireAddress {
            atyp: self.kind().to_byte(),
            host,
            port: self.port().to_be_bytes(),
        })
    }

    /// Read `ATYP | ADDR | PORT`, where a domain is length-prefixed
    pub fn decode(input: &mut Readable<'_>) -> Result<Self, CodecError> {
        let atyp = input.read_u8()?;
        let host = match AddressType::from_byte(atyp)? {
            AddressType::Ipv4 => input.read(4)?,
            AddressType::Ipv6 => input.read(16)?,
            AddressType::Domain => {
                let len = input.read_u8()? as usize;
                input.read(len)?
            }
        };
        let port = input.read(2)?;
        Self::from_wire(atyp, host, [port[0], port[1]])
    }

    /// Write `ATYP | ADDR | PORT`, where a domain is length-prefixed
    pub fn encode(&self, out: &mut Writable) -> Result<(), CodecError> {
        let wire = self.to_wire()?;
        out.push(wire.atyp);
        if let Address::Domain(name, _) = self {
            out.push(name.len() as u8);
        }
        out.push(wire.host).push(wire.port);
        Ok(())
    }

    /// Address family
    pub fn kind(&self) -> AddressType {
        match self {
            Address::Ipv4(..) => AddressType::Ipv4,
            Address::Ipv6(..) => AddressType::Ipv6,
            Address::Domain(..) => AddressType::Domain,
        }
    }

    /// Host as text
    pub fn host(&self) -> String {
        match self {
            Address::Ipv4(ip, _) => ip.to_string(),
            Address::Ipv6(ip, _) => ip.to_string(),
            Address::Domain(name, _) => name.clone(),
        }
    }

    /// Get the port number
    pub fn port(&self) -> u16 {
        match self {
            Address::Ipv4(_, port) | Address::Ipv6(_, port) | Address::Domain(_, port) => *port,
        }
    }

    /// The socket address, if this is not a domain
    pub fn to_socket_addr(&self) -> Option<SocketAddr> {
        match self {
            Address::Ipv4(ip, port) => Some(SocketAddr::new(IpAddr::V4(*ip), *port)),
            Address::Ipv6(ip, port) => Some(SocketAddr::new(IpAddr::V6(*ip), *port)),
            Address::Domain(..) => None,
        }
    }

    /// Resolve to a socket address, performing DNS for domains
    pub async fn resolve(&self) -> io::Result<SocketAddr> {
        match self {
            Address::Domain(name, port) => tokio::net::lookup_host((name.as_str(), *port))
                .await?
                .next()
                .ok_or_else(|| {
                    io::Error::new(
                        io::ErrorKind::NotFound,
                        format!("No addresses found for domain: {}", name),
                    )
                }),
            _ => self
                .to_socket_addr()
                .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "unresolvable address")),
        }
    }
}

impl From<SocketAddr> for Address {
    fn from(addr: SocketAddr) -> Self {
        match addr {
            SocketAddr::V4(a) => Address::Ipv4(*a.ip(), a.port()),
            SocketAddr::V6(a) => Address::Ipv6(*a.ip(), a.port()),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Ipv4(ip, port) => write!(f, "{}:{}", ip, port),
            Address::Ipv6(ip, port) => write!(f, "[{}]:{}", ip, port),
            Address::Domain(name, port) => write!(f, "{}:{}", name, port),
        }
    }
}
