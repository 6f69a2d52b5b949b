//! UDP relay for the ASSOCIATE command
//!
//! One relay socket per bound port. Every datagram it receives is a SOCKS
//! UDP frame; the frame is unwrapped and its payload sent to the embedded
//! destination from an outbound socket dedicated to the sending client.
//! Datagrams coming back on that outbound socket are wrapped in a frame
//! carrying their source and returned to the client.

use crate::helper::MAX_DATAGRAM_SIZE;
use crate::socks::{create_udp_frame, parse_udp_frame, Address};
use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

/// Outbound sessions idle for this long are dropped
pub const SESSION_IDLE_TIMEOUT: Duration = Duration::from_secs(120);

/// A running UDP relay. Dropping it stops the relay and all its sessions.
#[derive(Debug)]
pub struct UdpRelay {
    local_addr: SocketAddr,
    task: JoinHandle<()>,
}

impl UdpRelay {
    /// Bind a relay socket on `addr` and start forwarding
    pub async fn bind(addr: SocketAddr) -> io::Result<Self> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        let local_addr = socket.local_addr()?;
        info!("UDP relay listening on {}", local_addr);
        let task = tokio::spawn(run_relay(socket));
        Ok(UdpRelay { local_addr, task })
    }

    /// Bound address of the relay socket
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl Drop for UdpRelay {
    fn drop(&mut self) {
        self.task.abort();
        info!("UDP relay on {} closed", self.local_addr);
    }
}

async fn run_relay(socket: Arc<UdpSocket>) {
    let mut sessions: HashMap<SocketAddr, Arc<UdpSocket>> = HashMap::new();
    let mut pumps: JoinSet<SocketAddr> = JoinSet::new();
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
    let unspecified = match socket.local_addr() {
        Ok(addr) if addr.is_ipv6() => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        _ => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
    };

    loop {
        tokio::select! {
            received = socket.recv_from(&mut buf) => {
                let (n, client) = match received {
                    Ok(received) => received,
                    Err(e) => {
                        debug!("UDP relay receive error: {}", e);
                        continue;
                    }
                };
                let frame = match parse_udp_frame(&buf[..n]) {
                    Ok(frame) => frame,
                    Err(e) => {
                        debug!("Dropping malformed UDP frame from {}: {}", client, e);
                        continue;
                    }
                };
                if frame.is_fragmented() {
                    debug!("Dropping fragmented UDP frame from {}", client);
                    continue;
                }

                let outbound = match sessions.get(&client) {
                    Some(outbound) => outbound.clone(),
                    None => match UdpSocket::bind(SocketAddr::new(unspecified, 0)).await {
                        Ok(outbound) => {
                            let outbound = Arc::new(outbound);
                            debug!("New UDP session for {}", client);
                            sessions.insert(client, outbound.clone());
                            pumps.spawn(return_pump(socket.clone(), outbound.clone(), client));
                            outbound
                        }
                        Err(e) => {
                            warn!("Failed to open UDP session for {}: {}", client, e);
                            continue;
                        }
                    },
                };

                match frame.address.to_socket_addr() {
                    Some(target) => forward(&outbound, &frame.data, target).await,
                    // Name lookups stay off the receive loop
                    None => {
                        tokio::spawn(async move {
                            match frame.address.resolve().await {
                                Ok(target) => forward(&outbound, &frame.data, target).await,
                                Err(e) => debug!("Failed to resolve {}: {}", frame.address, e),
                            }
                        });
                    }
                }
            }
            Some(finished) = pumps.join_next() => {
                if let Ok(client) = finished {
                    debug!("UDP session for {} expired", client);
                    sessions.remove(&client);
                }
            }
        }
    }
}

async fn forward(outbound: &UdpSocket, data: &[u8], target: SocketAddr) {
    if let Err(e) = outbound.send_to(data, target).await {
        debug!("Failed to forward datagram to {}: {}", target, e);
    }
}

/// Wrap datagrams arriving on `outbound` and send them back to `client`
async fn return_pump(relay: Arc<UdpSocket>, outbound: Arc<UdpSocket>, client: SocketAddr) -> SocketAddr {
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
    loop {
        let (n, from) = match tokio::time::timeout(SESSION_IDLE_TIMEOUT, outbound.recv_from(&mut buf)).await {
            Ok(Ok(received)) => received,
            Ok(Err(e)) => {
                debug!("UDP session for {} failed: {}", client, e);
                break;
            }
            Err(_) => break,
        };
        let frame = match create_udp_frame(&Address::from(from), &buf[..n], 0) {
            Ok(frame) => frame,
            Err(e) => {
                debug!("Failed to frame datagram from {}: {}", from, e);
                continue;
            }
        };
        if let Err(e) = relay.send_to(&frame, client).await {
            debug!("Failed to return datagram to {}: {}", client, e);
        }
    }
    client
}

/// Relays keyed by bound port, shared by every ASSOCIATE on a server.
///
/// Entries are weak: a relay lives as long as some association holds it.
#[derive(Debug, Default)]
pub struct UdpRelayRegistry {
    relays: Mutex<HashMap<u16, Weak<UdpRelay>>>,
}

impl UdpRelayRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the live relay on `addr`'s port, binding one if needed
    pub async fn acquire(&self, addr: SocketAddr) -> io::Result<Arc<UdpRelay>> {
        let mut relays = self.relays.lock().await;
        relays.retain(|_, relay| relay.strong_count() > 0);
        if let Some(relay) = relays.get(&addr.port()).and_then(Weak::upgrade) {
            return Ok(relay);
        }
        let relay = Arc::new(UdpRelay::bind(addr).await?);
        relays.insert(relay.local_addr().port(), Arc::downgrade(&relay));
        Ok(relay)
    }

    /// Number of live relays
    pub async fn len(&self) -> usize {
        let relays = self.relays.lock().await;
        relays.values().filter(|relay| relay.strong_count() > 0).count()
    }

    /// Whether no relay is live
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
