//! Helper utilities for tsocks
//!
//! Shared constants, socket tuning and the relay pump used once a
//! connection leaves the handshake.

use crate::obfs::ObfsMethod;
use bytes::{Bytes, BytesMut};
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

/// Default buffer size for IO operations
pub const DEFAULT_BUFFER_SIZE: usize = 8192;

/// Default outbound connect timeout in seconds
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default handshake timeout in seconds
pub const DEFAULT_HANDSHAKE_TIMEOUT_SECS: u64 = 30;

/// Largest UDP datagram the relay will read
pub const MAX_DATAGRAM_SIZE: usize = 65535;

/// Socket options applied to accepted and dialed connections
#[derive(Debug, Clone)]
pub struct SocketOpts {
    /// Enable TCP_NODELAY
    pub nodelay: bool,
    /// TCP keepalive timeout
    pub keepalive_secs: Option<u64>,
    /// TCP keepalive interval
    pub keepalive_interval: Option<u64>,
}

impl Default for SocketOpts {
    fn default() -> Self {
        SocketOpts {
            nodelay: true,
            keepalive_secs: Some(20),
            keepalive_interval: Some(8),
        }
    }
}

impl SocketOpts {
    /// Apply socket options to a TCP stream
    pub fn apply(&self, stream: &TcpStream) -> io::Result<()> {
        stream.set_nodelay(self.nodelay)?;

        if let (Some(timeout), Some(interval)) = (self.keepalive_secs, self.keepalive_interval) {
            let socket = socket2::SockRef::from(stream);
            let keepalive = socket2::TcpKeepalive::new()
                .with_time(Duration::from_secs(timeout))
                .with_interval(Duration::from_secs(interval));
            socket.set_tcp_keepalive(&keepalive)?;
        }

        Ok(())
    }
}

/// Relay between a proxied client and a third-party stream.
///
/// Bytes from `client` are deobfuscated before reaching `target`; bytes
/// from `target` are obfuscated on the way back. `pending` (already
/// decoded) and `raw` (not yet decoded) carry whatever the handshake left
/// unconsumed. Returns when either direction reaches EOF.
pub async fn relay<C, T>(
    client: C,
    target: T,
    obfs: &dyn ObfsMethod,
    pending: Bytes,
    mut raw: BytesMut,
) -> io::Result<()>
where
    C: AsyncRead + AsyncWrite + Unpin,
    T: AsyncRead + AsyncWrite + Unpin,
{
    let (mut client_read, mut client_write) = tokio::io::split(client);
    let (mut target_read, mut target_write) = tokio::io::split(target);

    if !pending.is_empty() {
        target_write.write_all(&pending).await?;
    }

    tokio::select! {
        result = pump_inbound(&mut client_read, &mut target_write, obfs, &mut raw) => {
            match result {
                Ok(bytes) => debug!("client -> target finished: {} bytes", bytes),
                Err(e) => debug!("client -> target error: {}", e),
            }
        }
        result = pump_outbound(&mut target_read, &mut client_write, obfs) => {
            match result {
                Ok(bytes) => debug!("target -> client finished: {} bytes", bytes),
                Err(e) => debug!("target -> client error: {}", e),
            }
        }
    }

    Ok(())
}

/// Deobfuscating copy, flushing complete frames as they arrive
async fn pump_inbound<R, W>(
    reader: &mut R,
    writer: &mut W,
    obfs: &dyn ObfsMethod,
    raw: &mut BytesMut,
) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut total = 0u64;
    let mut buf = vec![0u8; DEFAULT_BUFFER_SIZE];
    loop {
        if !raw.is_empty() {
            let plain = obfs
                .deobfuscate(raw)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            if !plain.is_empty() {
                writer.write_all(&plain).await?;
                total += plain.len() as u64;
            }
        }
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            let _ = writer.shutdown().await;
            return Ok(total);
        }
        raw.extend_from_slice(&buf[..n]);
    }
}

/// Obfuscating copy
async fn pump_outbound<R, W>(reader: &mut R, writer: &mut W, obfs: &dyn ObfsMethod) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut total = 0u64;
    let mut buf = vec![0u8; DEFAULT_BUFFER_SIZE];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            let _ = writer.shutdown().await;
            return Ok(total);
        }
        writer.write_all(&obfs.obfuscate(&buf[..n])).await?;
        total += n as u64;
    }
}
