//! Client-side authentication methods

use super::ClientAuthMethod;
use crate::codec::{Readable, Writable};
use crate::error::CodecError;
use crate::socks::consts::*;
use bytes::Bytes;
use std::fmt;

/// No authentication
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAuth;

impl ClientAuthMethod for NoAuth {
    fn method(&self) -> u8 {
        SOCKS5_AUTH_METHOD_NONE
    }

    fn has_subnegotiation(&self) -> bool {
        false
    }

    fn verify(&self, _input: &mut Readable<'_>) -> Result<bool, CodecError> {
        Ok(true)
    }
}

/// Username/password authentication (RFC 1929)
#[derive(Clone)]
pub struct UserPass {
    username: String,
    password: String,
}

impl UserPass {
    /// Create with credentials; each is truncated to 255 bytes on the wire
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        UserPass {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for UserPass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserPass")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

fn field(value: &str) -> &[u8] {
    let bytes = value.as_bytes();
    &bytes[..bytes.len().min(MAX_DOMAIN_LEN)]
}

impl ClientAuthMethod for UserPass {
    fn method(&self) -> u8 {
        SOCKS5_AUTH_METHOD_PASSWORD
    }

    fn begin(&self) -> Option<Bytes> {
        let username = field(&self.username);
        let password = field(&self.password);
        let mut out = Writable::new();
        out.push(SOCKS5_AUTH_VERSION)
            .push(username.len() as u8)
            .push(username)
            .push(password.len() as u8)
            .push(password);
        Some(out.to_bytes())
    }

    fn verify(&self, input: &mut Readable<'_>) -> Result<bool, CodecError> {
        let _version = input.read_u8()?;
        let status = input.read_u8()?;
        Ok(status == SOCKS5_AUTH_SUCCESS)
    }
}
