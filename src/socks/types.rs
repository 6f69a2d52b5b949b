//! SOCKS type definitions
//!
//! Protocol versions and request commands shared by SOCKS4 and SOCKS5.

use super::consts::*;
use crate::error::CodecError;
use std::fmt;

/// SOCKS protocol version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Version {
    /// SOCKS4 (and SOCKS4a)
    Socks4,
    /// SOCKS5
    Socks5,
}

impl Version {
    /// Parse a version byte
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            SOCKS4_VERSION => Some(Version::Socks4),
            SOCKS5_VERSION => Some(Version::Socks5),
            _ => None,
        }
    }

    /// Version byte as it appears in requests
    pub fn to_byte(self) -> u8 {
        match self {
            Version::Socks4 => SOCKS4_VERSION,
            Version::Socks5 => SOCKS5_VERSION,
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Version::Socks4 => write!(f, "SOCKS4"),
            Version::Socks5 => write!(f, "SOCKS5"),
        }
    }
}

/// SOCKS command types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// TCP CONNECT - establish a TCP connection to target
    Connect,
    /// TCP BIND - wait for an incoming connection from target
    Bind,
    /// UDP ASSOCIATE - establish a UDP relay (SOCKS5 only)
    Associate,
}

impl Command {
    /// Parse a command byte
    pub fn from_byte(byte: u8) -> Result<Self, CodecError> {
        match byte {
            SOCKS_CMD_CONNECT => Ok(Command::Connect),
            SOCKS_CMD_BIND => Ok(Command::Bind),
            SOCKS_CMD_UDP_ASSOCIATE => Ok(Command::Associate),
            other => Err(CodecError::UnsupportedCommand(other)),
        }
    }

    /// Convert to the wire byte
    pub fn to_byte(self) -> u8 {
        match self {
            Command::Connect => SOCKS_CMD_CONNECT,
            Command::Bind => SOCKS_CMD_BIND,
            Command::Associate => SOCKS_CMD_UDP_ASSOCIATE,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Connect => write!(f, "CONNECT"),
            Command::Bind => write!(f, "BIND"),
            Command::Associate => write!(f, "UDP ASSOCIATE"),
        }
    }
}
