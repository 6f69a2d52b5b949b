//! Server integration tests driven with raw SOCKS bytes

mod common;

use common::socks5_mock::*;
use common::*;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpStream, UdpSocket};
use tsocks::auth::server::{NoAuth, UserPass};
use tsocks::socks::consts::*;
use tsocks::{create_udp_frame, parse_udp_frame, Address, Server, ServerEvent};

fn users() -> UserPass {
    let mut table = HashMap::new();
    table.insert("alice".to_string(), "secret".to_string());
    UserPass::with_users(table)
}

#[tokio::test]
async fn test_socks5_connect_echo() {
    let echo = spawn_echo_server().await;
    let handle = spawn_server(Server::new()).await;
    let mut stream = connect_raw(&handle).await;

    stream.write_all(&greeting(&[SOCKS5_AUTH_METHOD_NONE])).await.unwrap();
    assert_eq!(read_n(&mut stream, 2).await, vec![0x05, 0x00]);

    stream.write_all(&request(SOCKS_CMD_CONNECT, echo)).await.unwrap();
    let (rep, bound) = parse_reply_v4addr(&read_n(&mut stream, 10).await);
    assert_eq!(rep, 0x00);
    assert_ne!(bound.port(), 0);

    stream.write_all(b"hello through the proxy").await.unwrap();
    assert_eq!(read_n(&mut stream, 23).await, b"hello through the proxy");

    drop(stream);
    handle.close().await;
}

#[tokio::test]
async fn test_greeting_and_request_in_one_write() {
    let echo = spawn_echo_server().await;
    let handle = spawn_server(Server::new()).await;
    let mut stream = connect_raw(&handle).await;

    let mut burst = greeting(&[SOCKS5_AUTH_METHOD_NONE]);
    burst.extend(request(SOCKS_CMD_CONNECT, echo));
    burst.extend_from_slice(b"early");
    stream.write_all(&burst).await.unwrap();

    assert_eq!(read_n(&mut stream, 2).await, vec![0x05, 0x00]);
    let (rep, _) = parse_reply_v4addr(&read_n(&mut stream, 10).await);
    assert_eq!(rep, 0x00);
    assert_eq!(read_n(&mut stream, 5).await, b"early");

    handle.close().await;
}

#[tokio::test]
async fn test_method_preference_follows_server_order() {
    let handle = spawn_server(Server::new().use_auth(users()).use_auth(NoAuth)).await;
    let mut stream = connect_raw(&handle).await;

    stream
        .write_all(&greeting(&[SOCKS5_AUTH_METHOD_NONE, SOCKS5_AUTH_METHOD_PASSWORD]))
        .await
        .unwrap();
    assert_eq!(read_n(&mut stream, 2).await, vec![0x05, 0x02]);

    handle.close().await;
}

#[tokio::test]
async fn test_no_acceptable_method() {
    let handle = spawn_server(Server::new().use_auth(users())).await;
    let mut stream = connect_raw(&handle).await;

    stream.write_all(&greeting(&[SOCKS5_AUTH_METHOD_NONE])).await.unwrap();
    assert_eq!(read_n(&mut stream, 2).await, vec![0x05, 0xFF]);
    expect_eof(&mut stream).await;

    handle.close().await;
}

#[tokio::test]
async fn test_userpass_failure() {
    let handle = spawn_server(Server::new().use_auth(users())).await;
    let mut stream = connect_raw(&handle).await;

    stream.write_all(&greeting(&[SOCKS5_AUTH_METHOD_PASSWORD])).await.unwrap();
    assert_eq!(read_n(&mut stream, 2).await, vec![0x05, 0x02]);

    stream.write_all(&credentials("alice", "wrong")).await.unwrap();
    assert_eq!(read_n(&mut stream, 2).await, vec![0x01, 0xFF]);
    expect_eof(&mut stream).await;

    handle.close().await;
}

#[tokio::test]
async fn test_userpass_then_connect() {
    let echo = spawn_echo_server().await;
    let handle = spawn_server(Server::new().use_auth(users())).await;
    let mut stream = connect_raw(&handle).await;

    stream.write_all(&greeting(&[SOCKS5_AUTH_METHOD_PASSWORD])).await.unwrap();
    assert_eq!(read_n(&mut stream, 2).await, vec![0x05, 0x02]);
    stream.write_all(&credentials("alice", "secret")).await.unwrap();
    assert_eq!(read_n(&mut stream, 2).await, vec![0x01, 0x00]);

    stream.write_all(&request(SOCKS_CMD_CONNECT, echo)).await.unwrap();
    let (rep, _) = parse_reply_v4addr(&read_n(&mut stream, 10).await);
    assert_eq!(rep, 0x00);

    stream.write_all(b"ping").await.unwrap();
    assert_eq!(read_n(&mut stream, 4).await, b"ping");

    handle.close().await;
}

#[tokio::test]
async fn test_unknown_command() {
    let handle = spawn_server(Server::new()).await;
    let mut stream = connect_raw(&handle).await;

    stream.write_all(&greeting(&[SOCKS5_AUTH_METHOD_NONE])).await.unwrap();
    read_n(&mut stream, 2).await;

    let target = "127.0.0.1:80".parse().unwrap();
    stream.write_all(&request(0x09, target)).await.unwrap();
    let reply = read_n(&mut stream, 10).await;
    assert_eq!(reply[0], 0x05);
    assert_eq!(reply[1], 0x07);
    expect_eof(&mut stream).await;

    handle.close().await;
}

#[tokio::test]
async fn test_connect_refused() {
    let closed = closed_port().await;
    let handle = spawn_server(Server::new()).await;
    let mut events = handle.subscribe();
    let mut stream = connect_raw(&handle).await;

    stream.write_all(&greeting(&[SOCKS5_AUTH_METHOD_NONE])).await.unwrap();
    read_n(&mut stream, 2).await;
    stream.write_all(&request(SOCKS_CMD_CONNECT, closed)).await.unwrap();

    let (rep, bound) = parse_reply_v4addr(&read_n(&mut stream, 10).await);
    assert_eq!(rep, 0x05);
    assert_eq!(bound.port(), 0);
    expect_eof(&mut stream).await;

    // Connected, Dispatched, Error
    let mut saw_error = false;
    while let Ok(Ok(event)) = tokio::time::timeout(STEP_TIMEOUT, events.recv()).await {
        if let ServerEvent::Error { .. } = event {
            saw_error = true;
            break;
        }
    }
    assert!(saw_error);

    handle.close().await;
}

#[tokio::test]
async fn test_connect_domain() {
    let echo = spawn_echo_server().await;
    let handle = spawn_server(Server::new()).await;
    let mut stream = connect_raw(&handle).await;

    stream.write_all(&greeting(&[SOCKS5_AUTH_METHOD_NONE])).await.unwrap();
    read_n(&mut stream, 2).await;
    stream
        .write_all(&request_domain(SOCKS_CMD_CONNECT, "127.0.0.1", echo.port()))
        .await
        .unwrap();
    let (rep, _) = parse_reply_v4addr(&read_n(&mut stream, 10).await);
    assert_eq!(rep, 0x00);

    stream.write_all(b"named").await.unwrap();
    assert_eq!(read_n(&mut stream, 5).await, b"named");

    handle.close().await;
}

#[tokio::test]
async fn test_socks4_connect() {
    let echo = spawn_echo_server().await;
    let handle = spawn_server(Server::new()).await;
    let mut stream = connect_raw(&handle).await;

    stream.write_all(&request_v4(SOCKS_CMD_CONNECT, echo, "bob")).await.unwrap();
    let reply = read_n(&mut stream, 8).await;
    assert_eq!(reply[0], 0x00);
    assert_eq!(reply[1], 0x5A);

    stream.write_all(b"v4").await.unwrap();
    assert_eq!(read_n(&mut stream, 2).await, b"v4");

    handle.close().await;
}

#[tokio::test]
async fn test_socks4_ident_failure_still_connects() {
    let echo = spawn_echo_server().await;
    let server = Server::new().use_ident(|user_id| user_id == "bob");
    let handle = spawn_server(server).await;
    let mut stream = connect_raw(&handle).await;

    stream.write_all(&request_v4(SOCKS_CMD_CONNECT, echo, "alice")).await.unwrap();
    let first = read_n(&mut stream, 8).await;
    assert_eq!(first[1], 0x5C);
    let second = read_n(&mut stream, 8).await;
    assert_eq!(second[1], 0x5A);

    stream.write_all(b"open").await.unwrap();
    assert_eq!(read_n(&mut stream, 4).await, b"open");

    handle.close().await;
}

#[tokio::test]
async fn test_socks4_ident_failure_closes_when_configured() {
    let echo = spawn_echo_server().await;
    let server = Server::new()
        .use_ident(|user_id| user_id == "bob")
        .ident_failure_closes(true);
    let handle = spawn_server(server).await;
    let mut stream = connect_raw(&handle).await;

    stream.write_all(&request_v4(SOCKS_CMD_CONNECT, echo, "alice")).await.unwrap();
    let reply = read_n(&mut stream, 8).await;
    assert_eq!(reply[1], 0x5C);
    expect_eof(&mut stream).await;

    handle.close().await;
}

#[tokio::test]
async fn test_disabled_version_closes_silently() {
    let handle = spawn_server(Server::new().versions(true, false)).await;
    let mut stream = connect_raw(&handle).await;

    let target = "127.0.0.1:80".parse().unwrap();
    stream.write_all(&request_v4(SOCKS_CMD_CONNECT, target, "")).await.unwrap();
    expect_eof(&mut stream).await;

    handle.close().await;
}

#[tokio::test]
async fn test_bind_two_replies() {
    let handle = spawn_server(Server::new()).await;
    let mut stream = connect_raw(&handle).await;

    stream.write_all(&greeting(&[SOCKS5_AUTH_METHOD_NONE])).await.unwrap();
    read_n(&mut stream, 2).await;
    let expected_peer = "127.0.0.1:0".parse().unwrap();
    stream.write_all(&request(SOCKS_CMD_BIND, expected_peer)).await.unwrap();

    let (rep, relay_addr) = parse_reply_v4addr(&read_n(&mut stream, 10).await);
    assert_eq!(rep, 0x00);
    assert!(relay_addr.port() >= BIND_PORT_MIN);

    let mut peer = TcpStream::connect(relay_addr).await.unwrap();
    let peer_addr = peer.local_addr().unwrap();
    let (rep, remote) = parse_reply_v4addr(&read_n(&mut stream, 10).await);
    assert_eq!(rep, 0x00);
    assert_eq!(remote, peer_addr);

    peer.write_all(b"from peer").await.unwrap();
    assert_eq!(read_n(&mut stream, 9).await, b"from peer");
    stream.write_all(b"to peer").await.unwrap();
    assert_eq!(read_n(&mut peer, 7).await, b"to peer");

    handle.close().await;
}

#[tokio::test]
async fn test_udp_associate_round_trip() {
    let echo = spawn_udp_echo_server().await;
    let handle = spawn_server(Server::new()).await;
    let mut stream = connect_raw(&handle).await;

    stream.write_all(&greeting(&[SOCKS5_AUTH_METHOD_NONE])).await.unwrap();
    read_n(&mut stream, 2).await;
    let any = "0.0.0.0:0".parse().unwrap();
    stream.write_all(&request(SOCKS_CMD_UDP_ASSOCIATE, any)).await.unwrap();
    let (rep, relay_addr) = parse_reply_v4addr(&read_n(&mut stream, 10).await);
    assert_eq!(rep, 0x00);
    assert_eq!(relay_addr.port(), handle.local_addr().port());

    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let frame = create_udp_frame(&Address::from(echo), b"datagram", 0).unwrap();
    socket.send_to(&frame, relay_addr).await.unwrap();

    let mut buf = [0u8; 1024];
    let (n, from) = tokio::time::timeout(STEP_TIMEOUT, socket.recv_from(&mut buf))
        .await
        .expect("no datagram returned")
        .unwrap();
    assert_eq!(from, relay_addr);
    let reply = parse_udp_frame(&buf[..n]).unwrap();
    assert_eq!(reply.frag, 0);
    assert_eq!(reply.address, Address::from(echo));
    assert_eq!(&reply.data[..], b"datagram");

    handle.close().await;
}

#[tokio::test]
async fn test_socks4_associate() {
    let echo = spawn_udp_echo_server().await;
    let handle = spawn_server(Server::new()).await;
    let mut stream = connect_raw(&handle).await;

    let any = "0.0.0.0:0".parse().unwrap();
    stream.write_all(&request_v4(SOCKS_CMD_UDP_ASSOCIATE, any, "")).await.unwrap();
    let reply = read_n(&mut stream, 8).await;
    assert_eq!(reply[0], 0x00);
    assert_eq!(reply[1], 0x5A);
    let port = u16::from_be_bytes([reply[2], reply[3]]);
    assert_eq!(port, handle.local_addr().port());

    let relay_addr = std::net::SocketAddr::from(([127, 0, 0, 1], port));
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let frame = create_udp_frame(&Address::from(echo), b"v4 datagram", 0).unwrap();
    socket.send_to(&frame, relay_addr).await.unwrap();

    let mut buf = [0u8; 1024];
    let (n, _) = tokio::time::timeout(STEP_TIMEOUT, socket.recv_from(&mut buf))
        .await
        .expect("no datagram returned")
        .unwrap();
    assert_eq!(&parse_udp_frame(&buf[..n]).unwrap().data[..], b"v4 datagram");

    handle.close().await;
}

#[tokio::test]
async fn test_connection_callback_and_count() {
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = seen.clone();
    let server = Server::new().on_connection(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    let handle = spawn_server(server).await;

    let mut stream = connect_raw(&handle).await;
    stream.write_all(&greeting(&[SOCKS5_AUTH_METHOD_NONE])).await.unwrap();
    read_n(&mut stream, 2).await;
    assert_eq!(seen.load(Ordering::SeqCst), 1);
    assert_eq!(handle.connection_count(), 1);

    drop(stream);
    handle.close().await;
}
