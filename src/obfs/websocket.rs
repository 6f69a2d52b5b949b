//! WebSocket disguise
//!
//! Performs the RFC 6455 upgrade handshake and then frames payload with a
//! minimal two byte header: `0x81` (FIN + text opcode) followed by a length
//! byte. Extended lengths and masking are not implemented, so a frame
//! carries at most 125 bytes; longer writes are split across frames and
//! inbound frames using either feature are rejected.

use super::{find_head_end, header_value, partial_head, Handshake, ObfsMethod};
use crate::codec::Readable;
use crate::connection::Role;
use crate::error::ObfsError;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::{Buf, Bytes, BytesMut};
use rand::RngCore;
use sha1::{Digest, Sha1};

/// GUID appended to the client key before hashing
const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Header byte: FIN + text frame
const WS_FRAME_HEADER: u8 = 0x81;

/// Largest payload the one byte length field can carry
pub const WS_MAX_PAYLOAD: usize = 125;

const WS_MASK_BIT: u8 = 0x80;
const WS_OPCODE_CLOSE: u8 = 0x08;

/// Compute `Sec-WebSocket-Accept` for a `Sec-WebSocket-Key`
pub fn accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    STANDARD.encode(hasher.finalize())
}

/// WebSocket upgrade + minimal framing
#[derive(Debug, Clone)]
pub struct WebSocketObfs {
    role: Role,
    path: String,
    /// Client: key sent in the upgrade request
    key: Option<String>,
}

impl WebSocketObfs {
    /// Create a WebSocket obfuscator for one side of a connection
    pub fn new(role: Role, path: impl Into<String>) -> Self {
        WebSocketObfs {
            role,
            path: path.into(),
            key: None,
        }
    }

    fn accept_upgrade(&self, head: &str) -> Result<Handshake, ObfsError> {
        let key = header_value(head, "sec-websocket-key")
            .ok_or_else(|| ObfsError::Malformed("missing Sec-WebSocket-Key".to_string()))?;
        let reply = format!(
            "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Accept: {}\r\n\r\n",
            accept_key(key)
        );
        Ok(Handshake::Done {
            reply: Some(Bytes::from(reply)),
        })
    }

    fn verify_switch(&self, head: &str) -> Result<Handshake, ObfsError> {
        if !head.starts_with("HTTP/1.1 101") {
            let status = head.lines().next().unwrap_or_default();
            return Err(ObfsError::Malformed(format!("upgrade refused: {}", status)));
        }
        let expected = self.key.as_deref().map(accept_key);
        let got = header_value(head, "sec-websocket-accept");
        if expected.as_deref() != got {
            return Err(ObfsError::Malformed(
                "Sec-WebSocket-Accept mismatch".to_string(),
            ));
        }
        Ok(Handshake::Done { reply: None })
    }
}

impl ObfsMethod for WebSocketObfs {
    fn name(&self) -> &'static str {
        "websocket"
    }

    fn check(&self, input: &[u8]) -> bool {
        input.starts_with(b"GET ")
            && input
                .to_ascii_lowercase()
                .windows(18)
                .any(|w| w == b"upgrade: websocket")
    }

    fn needs_more(&self, input: &[u8]) -> bool {
        partial_head(input, b"GET ", b"\r\n\r\n")
    }

    fn open(&mut self) -> Option<Bytes> {
        let mut nonce = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut nonce);
        let key = STANDARD.encode(nonce);
        let request = format!(
            "GET {} HTTP/1.1\r\nHost: localhost\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Key: {}\r\nSec-WebSocket-Version: 13\r\n\r\n",
            self.path, key
        );
        self.key = Some(key);
        Some(Bytes::from(request))
    }

    fn handshake(&mut self, input: &mut Readable<'_>) -> Result<Handshake, ObfsError> {
        let head_end = match find_head_end(input.rest()) {
            Some(end) => end,
            None => return Ok(Handshake::Pending),
        };
        let head = input
            .read(head_end)
            .map_err(|e| ObfsError::Malformed(e.to_string()))?;
        let head = std::str::from_utf8(head)
            .map_err(|_| ObfsError::Malformed("non-UTF-8 upgrade head".to_string()))?;
        match self.role {
            Role::Server => self.accept_upgrade(head),
            Role::Client => self.verify_switch(head),
        }
    }

    fn obfuscate(&self, data: &[u8]) -> Bytes {
        let frames = data.len().div_ceil(WS_MAX_PAYLOAD);
        let mut out = BytesMut::with_capacity(data.len() + frames * 2);
        for chunk in data.chunks(WS_MAX_PAYLOAD) {
            out.extend_from_slice(&[WS_FRAME_HEADER, chunk.len() as u8]);
            out.extend_from_slice(chunk);
        }
        out.freeze()
    }

    fn deobfuscate(&self, input: &mut BytesMut) -> Result<Bytes, ObfsError> {
        let mut out = BytesMut::new();
        while input.len() >= 2 {
            let opcode = input[0] & 0x0F;
            let second = input[1];
            if opcode == WS_OPCODE_CLOSE {
                return Err(ObfsError::Malformed("close frame".to_string()));
            }
            if second & WS_MASK_BIT != 0 {
                return Err(ObfsError::Unsupported("masked frame".to_string()));
            }
            let len = second as usize;
            if len > WS_MAX_PAYLOAD {
                return Err(ObfsError::Unsupported("extended payload length".to_string()));
            }
            if input.len() < 2 + len {
                break;
            }
            input.advance(2);
            out.extend_from_slice(&input.split_to(len));
        }
        Ok(out.freeze())
    }
}
