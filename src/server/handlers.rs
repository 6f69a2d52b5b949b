//! Command handlers
//!
//! A handler receives the control connection once negotiation has produced
//! a request and owns it from then on: it writes the reply (or replies)
//! and runs whatever relay the command needs. When the handler returns,
//! the connection and any relay it created are closed.

use super::tcp_relay::TcpRelay;
use super::{ServerOptions, Shared};
use crate::helper::{self, DEFAULT_BUFFER_SIZE};
use crate::obfs::ObfsMethod;
use crate::socks::{Address, Reply, Request, Version};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, error, info};

/// Executes one SOCKS command
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// Serve the request carried by `ctx`
    async fn handle(&self, ctx: CommandContext) -> Result<()>;
}

/// A negotiated connection handed to a [`CommandHandler`]
pub struct CommandContext {
    /// The negotiated request
    pub request: Request,
    /// Control connection to the proxied client
    pub stream: TcpStream,
    /// Obfuscation in effect on `stream`
    pub obfs: Box<dyn ObfsMethod>,
    /// Decoded bytes received after the request
    pub pending: Bytes,
    /// Received bytes not yet decoded
    pub raw: BytesMut,
    /// Client address
    pub peer: SocketAddr,
    pub(crate) shared: Arc<Shared>,
}

impl CommandContext {
    /// Protocol version of the request
    pub fn version(&self) -> Version {
        self.request.version
    }

    /// Server runtime options
    pub fn options(&self) -> &ServerOptions {
        &self.shared.options
    }

    /// Address the server is listening on
    pub fn listen_addr(&self) -> SocketAddr {
        self.shared.listen_addr
    }

    /// Encode, obfuscate and write a reply
    pub async fn send_reply(&mut self, reply: &Reply) -> Result<()> {
        let bytes = reply.encode()?;
        self.stream
            .write_all(&self.obfs.obfuscate(&bytes))
            .await
            .context("Failed to send reply")?;
        Ok(())
    }

    /// Reply with success, carrying `address`
    pub async fn reply_success(&mut self, address: Address) -> Result<()> {
        let reply = Reply::success(self.version(), address);
        self.send_reply(&reply).await
    }

    /// Reply with the failure code matching `err`
    pub async fn reply_error(&mut self, err: &io::Error) -> Result<()> {
        let reply = Reply::from_io_error(self.version(), err);
        debug!("Replying {} to {}", reply.message(), self.peer);
        self.send_reply(&reply).await
    }

    /// Splice the client connection with `target` until either side closes
    pub async fn relay<T>(self, target: T) -> Result<()>
    where
        T: AsyncRead + AsyncWrite + Unpin,
    {
        let CommandContext {
            stream,
            obfs,
            pending,
            raw,
            ..
        } = self;
        helper::relay(stream, target, &*obfs, pending, raw)
            .await
            .context("Relay failed")
    }
}

/// CONNECT: dial the destination and splice
#[derive(Debug, Default, Clone, Copy)]
pub struct ConnectHandler;

async fn dial(address: &Address) -> io::Result<TcpStream> {
    let target = address.resolve().await?;
    TcpStream::connect(target).await
}

#[async_trait]
impl CommandHandler for ConnectHandler {
    async fn handle(&self, mut ctx: CommandContext) -> Result<()> {
        let address = ctx.request.address.clone();
        let timeout = ctx.options().connect_timeout;

        let target = match tokio::time::timeout(timeout, dial(&address)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                error!("Failed to connect to {}: {}", address, e);
                ctx.reply_error(&e).await?;
                return Err(e).with_context(|| format!("Failed to connect to {}", address));
            }
            Err(_) => {
                error!("Connection timeout to {}", address);
                ctx.reply_error(&io::Error::from(io::ErrorKind::TimedOut))
                    .await?;
                bail!("Connection timeout to {}", address);
            }
        };

        let local_addr = target.local_addr()?;
        ctx.reply_success(Address::from(local_addr)).await?;
        info!("{} connected to {}", ctx.peer, address);

        ctx.relay(target).await
    }
}

/// BIND: listen for one inbound connection and splice it to the client
#[derive(Debug, Default, Clone, Copy)]
pub struct BindHandler;

#[async_trait]
impl CommandHandler for BindHandler {
    async fn handle(&self, mut ctx: CommandContext) -> Result<()> {
        let ip = ctx.stream.local_addr()?.ip();
        let port = ctx.request.address.port();
        let attempts = ctx.options().bind_max_attempts;

        let relay = match TcpRelay::bind(ip, port, attempts).await {
            Ok(relay) => relay,
            Err(e) => {
                error!("Failed to bind relay for {}: {}", ctx.peer, e);
                ctx.reply_error(&e).await?;
                return Err(e).context("Failed to bind relay");
            }
        };
        let relay_addr = relay.local_addr();
        ctx.reply_success(Address::from(relay_addr)).await?;
        info!("BIND relay for {} listening on {}", ctx.peer, relay_addr);

        let mut buf = vec![0u8; DEFAULT_BUFFER_SIZE];
        let accept = relay.accept();
        tokio::pin!(accept);
        let (inbound, remote) = loop {
            tokio::select! {
                accepted = &mut accept => {
                    break accepted.context("BIND relay accept failed")?;
                }
                read = ctx.stream.read(&mut buf) => match read {
                    Ok(0) | Err(_) => {
                        debug!("{} closed before the BIND peer arrived", ctx.peer);
                        return Ok(());
                    }
                    Ok(n) => ctx.raw.extend_from_slice(&buf[..n]),
                }
            }
        };

        ctx.reply_success(Address::from(remote)).await?;
        info!("BIND relay {} accepted {}", relay_addr, remote);

        ctx.relay(inbound).await
    }
}

/// ASSOCIATE: hand out the UDP relay and hold it while the control
/// connection stays open
#[derive(Debug, Default, Clone, Copy)]
pub struct AssociateHandler;

#[async_trait]
impl CommandHandler for AssociateHandler {
    async fn handle(&self, mut ctx: CommandContext) -> Result<()> {
        let listen_addr = ctx.listen_addr();
        let port = ctx.options().udp_relay_port.unwrap_or(listen_addr.port());
        let bind_addr = SocketAddr::new(listen_addr.ip(), port);

        let relay = match ctx.shared.udp_relays.acquire(bind_addr).await {
            Ok(relay) => relay,
            Err(e) => {
                error!("Failed to start UDP relay on {}: {}", bind_addr, e);
                ctx.reply_error(&e).await?;
                return Err(e).context("Failed to start UDP relay");
            }
        };

        let local_ip = ctx.stream.local_addr()?.ip();
        let relay_addr = SocketAddr::new(local_ip, relay.local_addr().port());
        ctx.reply_success(Address::from(relay_addr)).await?;
        info!("UDP association for {} via {}", ctx.peer, relay_addr);

        let mut buf = [0u8; 512];
        loop {
            match ctx.stream.read(&mut buf).await {
                Ok(0) => break,
                Ok(_) => debug!("Ignoring data on UDP control connection"),
                Err(e) => {
                    debug!("UDP control connection error: {}", e);
                    break;
                }
            }
        }

        info!("UDP association for {} ended", ctx.peer);
        drop(relay);
        Ok(())
    }
}
