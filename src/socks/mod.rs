//! SOCKS wire messages
//!
//! Typed SOCKS4/SOCKS5 messages built on the [`crate::codec`] cursors:
//! endpoint addresses, command requests, replies and the UDP relay frame.

pub mod consts;
mod address;
mod reply;
mod request;
mod types;
mod udp;

pub use address::{Address, AddressType, WireAddress};
pub use reply::Reply;
pub use request::Request;
pub use types::{Command, Version};
pub use udp::{create_udp_frame, parse_udp_frame, UdpFrame};
