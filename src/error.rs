//! Error types for tsocks
//!
//! This module defines the error types shared by the codec, the protocol
//! state machine and the client/server front ends, plus the SOCKS4 and
//! SOCKS5 reply code enumerations.

use std::io;
use thiserror::Error;

/// Main error type for tsocks operations
#[derive(Error, Debug)]
pub enum SocksError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Protocol error
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Malformed or truncated frame
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// Obfuscation layer failure
    #[error("Obfuscation error: {0}")]
    Obfs(#[from] ObfsError),

    /// The server accepted none of the offered authentication methods
    #[error("No acceptable authentication method")]
    NoAcceptableMethod,

    /// The server picked a method the client never offered
    #[error("Unsupported authentication method selected: {0:#04x}")]
    UnsupportedMethod(u8),

    /// Credentials were rejected
    #[error("Authentication failed")]
    AuthFailed,

    /// The proxy answered the request with a failure code
    #[error("{message}")]
    Rejected {
        /// Raw reply code from the wire
        code: u8,
        /// Human readable description of the code
        message: String,
    },

    /// The peer closed the connection mid-handshake
    #[error("Connection closed")]
    ConnectionClosed,

    /// Timeout error
    #[error("Timeout: {0}")]
    Timeout(String),
}

/// Frame decoding and encoding errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// A read ran past the end of the buffered bytes
    #[error("Truncated frame: needed {needed} bytes, {available} available")]
    Truncated {
        /// Bytes the read required
        needed: usize,
        /// Bytes left in the buffer
        available: usize,
    },

    /// A delimiter search ran off the end of the buffer
    #[error("Delimiter not found")]
    DelimiterNotFound,

    /// Unsupported SOCKS version
    #[error("Unsupported SOCKS version: {0}")]
    UnsupportedVersion(u8),

    /// Command not supported
    #[error("Command not supported: {0}")]
    UnsupportedCommand(u8),

    /// Address type not supported
    #[error("Address type not supported: {0}")]
    UnsupportedAddressType(u8),

    /// Domain bytes were not valid UTF-8
    #[error("Invalid domain name")]
    InvalidDomain,

    /// Domain does not fit the one byte length prefix
    #[error("Domain name too long: {0} bytes")]
    DomainTooLong(usize),
}

/// Obfuscation framing errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ObfsError {
    /// Frame or handshake did not follow the expected format
    #[error("Malformed frame: {0}")]
    Malformed(String),

    /// Frame uses a feature the minimal framing does not implement
    #[error("Unsupported frame: {0}")]
    Unsupported(String),
}

/// Reply codes for SOCKS5 protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Socks5ReplyCode {
    /// Command succeeded
    Succeeded = 0x00,
    /// General SOCKS server failure
    GeneralFailure = 0x01,
    /// Connection not allowed by ruleset
    ConnectionNotAllowed = 0x02,
    /// Network unreachable
    NetworkUnreachable = 0x03,
    /// Host unreachable
    HostUnreachable = 0x04,
    /// Connection refused
    ConnectionRefused = 0x05,
    /// TTL expired
    TtlExpired = 0x06,
    /// Command not supported
    CommandNotSupported = 0x07,
    /// Address type not supported
    AddressTypeNotSupported = 0x08,
}

impl Socks5ReplyCode {
    /// Human readable description, as surfaced to client callers
    pub fn message(self) -> &'static str {
        match self {
            Socks5ReplyCode::Succeeded => "Succeeded",
            Socks5ReplyCode::GeneralFailure => "General SOCKS server failure",
            Socks5ReplyCode::ConnectionNotAllowed => "Connection not allowed by ruleset",
            Socks5ReplyCode::NetworkUnreachable => "Network unreachable",
            Socks5ReplyCode::HostUnreachable => "Host unreachable",
            Socks5ReplyCode::ConnectionRefused => "Connection refused",
            Socks5ReplyCode::TtlExpired => "TTL expired",
            Socks5ReplyCode::CommandNotSupported => "Command not supported",
            Socks5ReplyCode::AddressTypeNotSupported => "Address type not supported",
        }
    }
}

impl From<Socks5ReplyCode> for u8 {
    fn from(code: Socks5ReplyCode) -> Self {
        code as u8
    }
}

impl TryFrom<u8> for Socks5ReplyCode {
    type Error = SocksError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(Socks5ReplyCode::Succeeded),
            0x01 => Ok(Socks5ReplyCode::GeneralFailure),
            0x02 => Ok(Socks5ReplyCode::ConnectionNotAllowed),
            0x03 => Ok(Socks5ReplyCode::NetworkUnreachable),
            0x04 => Ok(Socks5ReplyCode::HostUnreachable),
            0x05 => Ok(Socks5ReplyCode::ConnectionRefused),
            0x06 => Ok(Socks5ReplyCode::TtlExpired),
            0x07 => Ok(Socks5ReplyCode::CommandNotSupported),
            0x08 => Ok(Socks5ReplyCode::AddressTypeNotSupported),
            other => Err(SocksError::Protocol(format!(
                "Unknown SOCKS5 reply code: {:#04x}",
                other
            ))),
        }
    }
}

impl From<&io::Error> for Socks5ReplyCode {
    fn from(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::ConnectionRefused => Socks5ReplyCode::ConnectionRefused,
            _ => Socks5ReplyCode::GeneralFailure,
        }
    }
}

/// Reply codes for SOCKS4 protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Socks4ReplyCode {
    /// Request granted
    Granted = 0x5A,
    /// Request rejected or failed
    Rejected = 0x5B,
    /// Server cannot reach identd on the client
    IdentFailed = 0x5C,
    /// identd reported a different user id
    DifferentUserId = 0x5D,
}

impl Socks4ReplyCode {
    /// Human readable description, as surfaced to client callers
    pub fn message(self) -> &'static str {
        match self {
            Socks4ReplyCode::Granted => "Request granted",
            Socks4ReplyCode::Rejected => "Request rejected or failed",
            Socks4ReplyCode::IdentFailed => {
                "Request rejected because SOCKS server cannot connect to identd on the client"
            }
            Socks4ReplyCode::DifferentUserId => {
                "Request rejected because the client program and identd report different user-ids"
            }
        }
    }
}

impl From<Socks4ReplyCode> for u8 {
    fn from(code: Socks4ReplyCode) -> Self {
        code as u8
    }
}

impl TryFrom<u8> for Socks4ReplyCode {
    type Error = SocksError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x5A => Ok(Socks4ReplyCode::Granted),
            0x5B => Ok(Socks4ReplyCode::Rejected),
            0x5C => Ok(Socks4ReplyCode::IdentFailed),
            0x5D => Ok(Socks4ReplyCode::DifferentUserId),
            other => Err(SocksError::Protocol(format!(
                "Unknown SOCKS4 reply code: {:#04x}",
                other
            ))),
        }
    }
}

impl From<&io::Error> for Socks4ReplyCode {
    fn from(_err: &io::Error) -> Self {
        Socks4ReplyCode::Rejected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_socks5_reply_code_from_u8_valid() {
        for code in 0x00..=0x08u8 {
            assert_eq!(u8::from(Socks5ReplyCode::try_from(code).unwrap()), code);
        }
        assert_eq!(
            Socks5ReplyCode::try_from(0x04).unwrap(),
            Socks5ReplyCode::HostUnreachable
        );
    }

    #[test]
    fn test_socks5_reply_code_from_u8_invalid() {
        assert!(Socks5ReplyCode::try_from(0xFF).is_err());
        assert!(Socks5ReplyCode::try_from(0x09).is_err());
    }

    #[test]
    fn test_socks4_reply_code_round_trip() {
        for code in 0x5A..=0x5Du8 {
            assert_eq!(u8::from(Socks4ReplyCode::try_from(code).unwrap()), code);
        }
        assert!(Socks4ReplyCode::try_from(0x00).is_err());
    }

    #[test]
    fn test_reply_code_from_io_error() {
        let err = io::Error::new(io::ErrorKind::ConnectionRefused, "refused");
        assert_eq!(
            Socks5ReplyCode::from(&err),
            Socks5ReplyCode::ConnectionRefused
        );
        assert_eq!(Socks4ReplyCode::from(&err), Socks4ReplyCode::Rejected);

        let err = io::Error::new(io::ErrorKind::TimedOut, "timeout");
        assert_eq!(Socks5ReplyCode::from(&err), Socks5ReplyCode::GeneralFailure);

        let err = io::Error::new(io::ErrorKind::PermissionDenied, "permission denied");
        assert_eq!(Socks5ReplyCode::from(&err), Socks5ReplyCode::GeneralFailure);
    }

    #[test]
    fn test_reply_code_messages() {
        assert_eq!(
            Socks5ReplyCode::ConnectionRefused.message(),
            "Connection refused"
        );
        assert_eq!(Socks4ReplyCode::Rejected.message(), "Request rejected or failed");
    }

    #[test]
    fn test_socks_error_display() {
        let err = SocksError::Config("invalid config".to_string());
        assert_eq!(format!("{}", err), "Configuration error: invalid config");

        let err = SocksError::UnsupportedMethod(0x02);
        assert_eq!(
            format!("{}", err),
            "Unsupported authentication method selected: 0x02"
        );

        let err = SocksError::Rejected {
            code: 0x05,
            message: "Connection refused".to_string(),
        };
        assert_eq!(format!("{}", err), "Connection refused");

        let err = SocksError::Timeout("handshake".to_string());
        assert_eq!(format!("{}", err), "Timeout: handshake");
    }

    #[test]
    fn test_codec_error_display() {
        let err = CodecError::Truncated {
            needed: 4,
            available: 1,
        };
        assert_eq!(
            format!("{}", err),
            "Truncated frame: needed 4 bytes, 1 available"
        );
        assert_eq!(
            format!("{}", CodecError::UnsupportedAddressType(0x99)),
            "Address type not supported: 153"
        );
    }

    #[test]
    fn test_socks_error_from_codec() {
        let err: SocksError = CodecError::InvalidDomain.into();
        assert!(matches!(err, SocksError::Codec(CodecError::InvalidDomain)));
    }

    #[test]
    fn test_socks_error_from_io() {
        let io_err = io::Error::new(io::ErrorKind::Other, "io error");
        let err: SocksError = io_err.into();
        assert!(matches!(err, SocksError::Io(_)));
    }
}
