//! Listening socket for the BIND command

use crate::socks::consts::{BIND_PORT_MAX, BIND_PORT_MIN};
use rand::Rng;
use std::io;
use std::net::{IpAddr, SocketAddr};
use tokio::net::{TcpListener, TcpStream};
use tracing::debug;

/// A one-shot listener that waits for the third party of a BIND.
///
/// The listening socket lives until the first inbound connection is
/// accepted or the relay is dropped, whichever comes first.
#[derive(Debug)]
pub struct TcpRelay {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl TcpRelay {
    /// Bind on `ip`, using `port` when nonzero and random ports in the
    /// unprivileged range otherwise. A port already in use is retried with
    /// a fresh random port, up to `max_attempts` tries in total.
    pub async fn bind(ip: IpAddr, port: u16, max_attempts: u32) -> io::Result<Self> {
        let mut last_err = io::Error::new(io::ErrorKind::AddrInUse, "no free port for BIND");
        for attempt in 0..max_attempts.max(1) {
            let candidate = if attempt == 0 && port != 0 {
                port
            } else {
                rand::thread_rng().gen_range(BIND_PORT_MIN..=BIND_PORT_MAX)
            };
            match TcpListener::bind(SocketAddr::new(ip, candidate)).await {
                Ok(listener) => {
                    let local_addr = listener.local_addr()?;
                    debug!("BIND relay bound to {}", local_addr);
                    return Ok(TcpRelay {
                        listener,
                        local_addr,
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
                    debug!("BIND port {} in use, retrying", candidate);
                    last_err = e;
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err)
    }

    /// Bound address of the listening socket
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Wait for the single inbound connection, then stop listening
    pub async fn accept(self) -> io::Result<(TcpStream, SocketAddr)> {
        let (stream, peer) = self.listener.accept().await?;
        debug!("BIND relay {} accepted {}", self.local_addr, peer);
        Ok((stream, peer))
    }
}
