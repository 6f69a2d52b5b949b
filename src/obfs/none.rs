//! Passthrough obfuscation

use super::{Handshake, ObfsMethod};
use crate::codec::Readable;
use crate::error::ObfsError;
use crate::socks::consts::{SOCKS4_VERSION, SOCKS5_VERSION};
use bytes::{Bytes, BytesMut};

/// Identity transform; matches raw SOCKS4/SOCKS5 traffic
#[derive(Debug, Clone, Copy, Default)]
pub struct NoObfs;

impl ObfsMethod for NoObfs {
    fn name(&self) -> &'static str {
        "none"
    }

    fn check(&self, input: &[u8]) -> bool {
        matches!(input.first(), Some(&SOCKS5_VERSION) | Some(&SOCKS4_VERSION))
    }

    fn handshake(&mut self, _input: &mut Readable<'_>) -> Result<Handshake, ObfsError> {
        Ok(Handshake::Done { reply: None })
    }

    fn obfuscate(&self, data: &[u8]) -> Bytes {
        Bytes::copy_from_slice(data)
    }

    fn deobfuscate(&self, input: &mut BytesMut) -> Result<Bytes, ObfsError> {
        Ok(input.split().freeze())
    }
}
