//! HTTP disguise
//!
//! Every write becomes one complete HTTP message: the client sends
//! `POST <path>` requests and the server answers with `200 OK` responses,
//! each carrying the payload as a `Content-Length` body.

use super::{find_head_end, header_value, partial_head, Handshake, ObfsMethod};
use crate::codec::Readable;
use crate::connection::Role;
use crate::error::ObfsError;
use bytes::{Buf, Bytes, BytesMut};

/// HTTP message framing
#[derive(Debug, Clone)]
pub struct HttpObfs {
    role: Role,
    path: String,
}

impl HttpObfs {
    /// Create an HTTP obfuscator for one side of a connection
    pub fn new(role: Role, path: impl Into<String>) -> Self {
        HttpObfs {
            role,
            path: path.into(),
        }
    }

    fn head(&self, len: usize) -> String {
        match self.role {
            Role::Client => format!(
                "POST {} HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/octet-stream\r\nContent-Length: {}\r\n\r\n",
                self.path, len
            ),
            Role::Server => format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/octet-stream\r\nContent-Length: {}\r\n\r\n",
                len
            ),
        }
    }
}

impl ObfsMethod for HttpObfs {
    fn name(&self) -> &'static str {
        "http"
    }

    fn check(&self, input: &[u8]) -> bool {
        let line_end = input
            .windows(2)
            .position(|w| w == b"\r\n")
            .unwrap_or(input.len());
        let line = &input[..line_end];
        line.starts_with(b"POST ") && line.windows(5).any(|w| w == b"HTTP/")
    }

    fn needs_more(&self, input: &[u8]) -> bool {
        partial_head(input, b"POST ", b"\r\n")
    }

    fn handshake(&mut self, _input: &mut Readable<'_>) -> Result<Handshake, ObfsError> {
        // The first message already carries payload
        Ok(Handshake::Done { reply: None })
    }

    fn obfuscate(&self, data: &[u8]) -> Bytes {
        if data.is_empty() {
            return Bytes::new();
        }
        let head = self.head(data.len());
        let mut out = BytesMut::with_capacity(head.len() + data.len());
        out.extend_from_slice(head.as_bytes());
        out.extend_from_slice(data);
        out.freeze()
    }

    fn deobfuscate(&self, input: &mut BytesMut) -> Result<Bytes, ObfsError> {
        let mut out = BytesMut::new();
        while let Some(head_end) = find_head_end(input) {
            let head = std::str::from_utf8(&input[..head_end])
                .map_err(|_| ObfsError::Malformed("non-UTF-8 HTTP head".to_string()))?;
            let len: usize = header_value(head, "content-length")
                .ok_or_else(|| ObfsError::Malformed("missing Content-Length".to_string()))?
                .parse()
                .map_err(|_| ObfsError::Malformed("invalid Content-Length".to_string()))?;
            if input.len() < head_end + len {
                break;
            }
            input.advance(head_end);
            out.extend_from_slice(&input.split_to(len));
        }
        Ok(out.freeze())
    }
}
