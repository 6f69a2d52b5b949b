//! Common test utilities for tsocks integration tests

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tsocks::socks::consts::*;
use tsocks::{Server, ServerHandle};

/// Upper bound for any single step of a test
pub const STEP_TIMEOUT: Duration = Duration::from_secs(5);

/// Create a test TCP listener on a random port
pub async fn create_test_listener() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

/// TCP server echoing every connection back to itself
pub async fn spawn_echo_server() -> SocketAddr {
    let (listener, addr) = create_test_listener().await;
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                loop {
                    match stream.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if stream.write_all(&buf[..n]).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            });
        }
    });
    addr
}

/// UDP socket echoing every datagram to its sender
pub async fn spawn_udp_echo_server() -> SocketAddr {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();
    tokio::spawn(async move {
        let mut buf = [0u8; 65535];
        while let Ok((n, from)) = socket.recv_from(&mut buf).await {
            let _ = socket.send_to(&buf[..n], from).await;
        }
    });
    addr
}

/// Address with nothing listening on it
pub async fn closed_port() -> SocketAddr {
    let (listener, addr) = create_test_listener().await;
    drop(listener);
    addr
}

/// Bind `server` to a loopback port
pub async fn spawn_server(server: Server) -> ServerHandle {
    server.bind("127.0.0.1:0").await.unwrap()
}

/// Connect a raw TCP stream to the server
pub async fn connect_raw(handle: &ServerHandle) -> TcpStream {
    TcpStream::connect(handle.local_addr()).await.unwrap()
}

/// Read exactly `n` bytes, failing the test on timeout
pub async fn read_n(stream: &mut TcpStream, n: usize) -> Vec<u8> {
    let mut buf = vec![0u8; n];
    tokio::time::timeout(STEP_TIMEOUT, stream.read_exact(&mut buf))
        .await
        .expect("read timed out")
        .unwrap();
    buf
}

/// Assert the peer closes the stream
pub async fn expect_eof(stream: &mut TcpStream) {
    let mut buf = [0u8; 64];
    let n = tokio::time::timeout(STEP_TIMEOUT, stream.read(&mut buf))
        .await
        .expect("close timed out")
        .unwrap_or(0);
    assert_eq!(n, 0, "expected end of stream, got {:?}", &buf[..n]);
}

/// Raw SOCKS messages
pub mod socks5_mock {
    use super::*;

    /// Method selection request offering `methods`
    pub fn greeting(methods: &[u8]) -> Vec<u8> {
        let mut msg = vec![SOCKS5_VERSION, methods.len() as u8];
        msg.extend_from_slice(methods);
        msg
    }

    /// RFC 1929 credentials
    pub fn credentials(username: &str, password: &str) -> Vec<u8> {
        let mut msg = vec![SOCKS5_AUTH_VERSION, username.len() as u8];
        msg.extend_from_slice(username.as_bytes());
        msg.push(password.len() as u8);
        msg.extend_from_slice(password.as_bytes());
        msg
    }

    /// SOCKS5 request for an IPv4 socket address
    pub fn request(command: u8, addr: SocketAddr) -> Vec<u8> {
        let ip = match addr {
            SocketAddr::V4(v4) => v4.ip().octets(),
            SocketAddr::V6(_) => panic!("IPv4 only"),
        };
        let mut msg = vec![SOCKS5_VERSION, command, SOCKS5_RESERVED, SOCKS5_ADDR_TYPE_IPV4];
        msg.extend_from_slice(&ip);
        msg.extend_from_slice(&addr.port().to_be_bytes());
        msg
    }

    /// SOCKS5 request for a domain name
    pub fn request_domain(command: u8, domain: &str, port: u16) -> Vec<u8> {
        let mut msg = vec![
            SOCKS5_VERSION,
            command,
            SOCKS5_RESERVED,
            SOCKS5_ADDR_TYPE_DOMAIN,
            domain.len() as u8,
        ];
        msg.extend_from_slice(domain.as_bytes());
        msg.extend_from_slice(&port.to_be_bytes());
        msg
    }

    /// SOCKS4 request; `user_id` is NUL-terminated
    pub fn request_v4(command: u8, addr: SocketAddr, user_id: &str) -> Vec<u8> {
        let ip = match addr {
            SocketAddr::V4(v4) => v4.ip().octets(),
            SocketAddr::V6(_) => panic!("IPv4 only"),
        };
        let mut msg = vec![SOCKS4_VERSION, command];
        msg.extend_from_slice(&addr.port().to_be_bytes());
        msg.extend_from_slice(&ip);
        msg.extend_from_slice(user_id.as_bytes());
        msg.push(0);
        msg
    }

    /// Split an IPv4 SOCKS5 reply into (rep, bound address)
    pub fn parse_reply_v4addr(reply: &[u8]) -> (u8, SocketAddr) {
        assert_eq!(reply.len(), 10);
        assert_eq!(reply[0], SOCKS5_VERSION);
        assert_eq!(reply[3], SOCKS5_ADDR_TYPE_IPV4);
        let ip = std::net::Ipv4Addr::new(reply[4], reply[5], reply[6], reply[7]);
        let port = u16::from_be_bytes([reply[8], reply[9]]);
        (reply[1], SocketAddr::from((ip, port)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_greeting() {
        assert_eq!(socks5_mock::greeting(&[0x00, 0x02]), vec![5, 2, 0, 2]);
    }

    #[test]
    fn test_request_v4() {
        let addr: SocketAddr = "10.0.0.1:80".parse().unwrap();
        let msg = socks5_mock::request_v4(1, addr, "bob");
        assert_eq!(msg, vec![4, 1, 0, 80, 10, 0, 0, 1, b'b', b'o', b'b', 0]);
    }
}
