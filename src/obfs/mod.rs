//! Traffic obfuscation layer
//!
//! An [`ObfsMethod`] is a reversible transform applied to every byte a
//! connection exchanges. The server picks one per connection by sniffing
//! the first bytes it receives; the client is configured with one up front.
//!
//! Methods are registered as [`ObfsBuilder`] factories so that each
//! connection gets its own instance, and `check()` can be called on every
//! candidate without touching connection state.

mod http;
mod none;
#[cfg(feature = "websocket")]
mod websocket;

pub use http::HttpObfs;
pub use none::NoObfs;
#[cfg(feature = "websocket")]
pub use websocket::{accept_key, WebSocketObfs};

use crate::codec::Readable;
use crate::connection::Role;
use crate::error::ObfsError;
use bytes::{Bytes, BytesMut};
use std::sync::Arc;

/// Outcome of one handshake step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Handshake {
    /// More bytes are needed
    Pending,
    /// Handshake finished; `reply` is written to the peer verbatim
    Done {
        /// Bytes to send back, if any
        reply: Option<Bytes>,
    },
}

/// A pluggable obfuscation transform
pub trait ObfsMethod: Send + Sync {
    /// Short name used in logs and configuration
    fn name(&self) -> &'static str;

    /// Whether `input` (the first bytes of a connection) looks like this
    /// method's traffic. Must not mutate state.
    fn check(&self, input: &[u8]) -> bool;

    /// Whether `input` is too short for [`ObfsMethod::check`] to decide.
    /// Detection waits for more bytes while any method says so.
    fn needs_more(&self, _input: &[u8]) -> bool {
        false
    }

    /// Client only: bytes opening the handshake
    fn open(&mut self) -> Option<Bytes> {
        None
    }

    /// Consume handshake bytes from the peer.
    ///
    /// Server: parse the client's opening and produce the answer.
    /// Client: validate the server's answer to [`ObfsMethod::open`].
    fn handshake(&mut self, input: &mut Readable<'_>) -> Result<Handshake, ObfsError>;

    /// Wrap outbound payload
    fn obfuscate(&self, data: &[u8]) -> Bytes;

    /// Strip framing from the complete frames at the front of `input`,
    /// leaving any partial frame in place
    fn deobfuscate(&self, input: &mut BytesMut) -> Result<Bytes, ObfsError>;
}

/// Factory producing a fresh [`ObfsMethod`] for each connection
pub type ObfsBuilder = Arc<dyn Fn(Role) -> Box<dyn ObfsMethod> + Send + Sync>;

/// Passthrough: raw SOCKS on the wire
pub fn none() -> ObfsBuilder {
    Arc::new(|_role: Role| -> Box<dyn ObfsMethod> { Box::new(NoObfs) })
}

/// HTTP disguise: each write travels as an HTTP message body
pub fn http(path: impl Into<String>) -> ObfsBuilder {
    let path = path.into();
    Arc::new(move |role: Role| -> Box<dyn ObfsMethod> {
        Box::new(HttpObfs::new(role, path.clone()))
    })
}

/// WebSocket disguise: RFC 6455 upgrade, then minimal unmasked frames
#[cfg(feature = "websocket")]
pub fn websocket(path: impl Into<String>) -> ObfsBuilder {
    let path = path.into();
    Arc::new(move |role: Role| -> Box<dyn ObfsMethod> {
        Box::new(WebSocketObfs::new(role, path.clone()))
    })
}

/// Look up a builder by its configuration name
pub fn from_name(name: &str, path: &str) -> Option<ObfsBuilder> {
    match name {
        "none" => Some(none()),
        "http" => Some(http(path)),
        #[cfg(feature = "websocket")]
        "websocket" => Some(websocket(path)),
        _ => None,
    }
}

/// Longest HTTP head detection will wait for
pub(crate) const MAX_DETECT_HEAD: usize = 8192;

/// Whether `input` could still grow into an HTTP head starting with
/// `method` whose decisive part ends at `terminator`
pub(crate) fn partial_head(input: &[u8], method: &[u8], terminator: &[u8]) -> bool {
    let n = input.len().min(method.len());
    input[..n] == method[..n]
        && input.len() < MAX_DETECT_HEAD
        && !input.windows(terminator.len()).any(|w| w == terminator)
}

/// Find the end of an HTTP head, returning the offset just past `\r\n\r\n`
pub(crate) fn find_head_end(input: &[u8]) -> Option<usize> {
    input
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|idx| idx + 4)
}

/// Case-insensitive header lookup over an HTTP head
pub(crate) fn header_value<'a>(head: &'a str, name: &str) -> Option<&'a str> {
    head.split("\r\n").skip(1).find_map(|line| {
        let (key, value) = line.split_once(':')?;
        if key.trim().eq_ignore_ascii_case(name) {
            Some(value.trim())
        } else {
            None
        }
    })
}
