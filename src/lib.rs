//! # tsocks - SOCKS4/SOCKS5 proxy engine
//!
//! tsocks implements both ends of the SOCKS protocol family: a server that
//! accepts SOCKS4, SOCKS4a and SOCKS5 clients and a client that talks to
//! any such proxy.
//!
//! ## Features
//!
//! - **Both roles**: server and client share one protocol state machine
//! - **All commands**: CONNECT, BIND and UDP ASSOCIATE
//! - **Authentication**: none and username/password (RFC 1929), pluggable
//! - **Obfuscation**: optional HTTP or WebSocket disguise, detected per
//!   connection on the server
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tsocks::{Client, Server};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let server = Server::new().bind("127.0.0.1:1080").await?;
//!
//!     let client = Client::new(server.local_addr().to_string());
//!     let mut channel = client.connect(80, "example.com").await?;
//!     channel.send(b"GET / HTTP/1.0\r\n\r\n").await?;
//!     let response = channel.recv().await?;
//!
//!     server.close().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! socket -> obfs (strip) -> Connection::feed -> Effect -> handler / reply
//!                                                  |
//!                                     TcpRelay / UdpRelay / outbound
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod auth;
pub mod client;
pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod helper;
pub mod obfs;
pub mod server;
pub mod socks;

// Re-export commonly used items
pub use client::{Client, Established};
pub use config::{load_config, Config};
pub use error::{CodecError, ObfsError, Socks4ReplyCode, Socks5ReplyCode, SocksError};
pub use server::{Server, ServerEvent, ServerHandle, ServerOptions};
pub use socks::{create_udp_frame, parse_udp_frame, Address, Command, Reply, Request, UdpFrame, Version};

/// Version of the tsocks library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Name of the application
pub const NAME: &str = env!("CARGO_PKG_NAME");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_name() {
        assert_eq!(NAME, "tsocks");
    }
}
