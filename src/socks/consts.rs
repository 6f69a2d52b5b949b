//! SOCKS protocol constants
//!
//! Defines the constants used by the SOCKS4 and SOCKS5 wire formats.

/// SOCKS5 protocol version
pub const SOCKS5_VERSION: u8 = 0x05;

/// SOCKS4 protocol version
pub const SOCKS4_VERSION: u8 = 0x04;

/// Version byte of a SOCKS4 reply
pub const SOCKS4_REPLY_VERSION: u8 = 0x00;

/// Username/password sub-negotiation version
pub const SOCKS5_AUTH_VERSION: u8 = 0x01;

// Authentication methods
/// No authentication required
pub const SOCKS5_AUTH_METHOD_NONE: u8 = 0x00;
/// Username/password authentication
pub const SOCKS5_AUTH_METHOD_PASSWORD: u8 = 0x02;
/// No acceptable methods
pub const SOCKS5_AUTH_METHOD_NOT_ACCEPTABLE: u8 = 0xFF;

// Username/password status
/// Credentials accepted
pub const SOCKS5_AUTH_SUCCESS: u8 = 0x00;
/// Credentials rejected
pub const SOCKS5_AUTH_FAILURE: u8 = 0xFF;

// Commands
/// TCP CONNECT command
pub const SOCKS_CMD_CONNECT: u8 = 0x01;
/// TCP BIND command
pub const SOCKS_CMD_BIND: u8 = 0x02;
/// UDP ASSOCIATE command
pub const SOCKS_CMD_UDP_ASSOCIATE: u8 = 0x03;

// Address types
/// IPv4 address
pub const SOCKS5_ADDR_TYPE_IPV4: u8 = 0x01;
/// Domain name
pub const SOCKS5_ADDR_TYPE_DOMAIN: u8 = 0x03;
/// IPv6 address
pub const SOCKS5_ADDR_TYPE_IPV6: u8 = 0x04;

// Reserved byte
/// Reserved byte value (always 0x00)
pub const SOCKS5_RESERVED: u8 = 0x00;

/// Maximum domain name length
pub const MAX_DOMAIN_LEN: usize = 255;

/// Lowest port BIND picks at random
pub const BIND_PORT_MIN: u16 = 1024;
/// Highest port BIND picks at random
pub const BIND_PORT_MAX: u16 = 65535;
