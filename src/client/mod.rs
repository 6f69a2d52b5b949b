//! SOCKS client
//!
//! [`Client`] dials a proxy, runs the handshake through a client-side
//! [`Connection`] and returns an [`Established`] channel once the proxy
//! accepts the request.

use crate::auth::client::{NoAuth, UserPass};
use crate::auth::ClientAuthMethod;
use crate::codec::Readable;
use crate::config::ClientConfig;
use crate::connection::{negotiate, ClientHandlers, Connection, Outcome, Role};
use crate::error::{CodecError, SocksError};
use crate::helper::DEFAULT_BUFFER_SIZE;
use crate::obfs::{self, NoObfs, ObfsBuilder, ObfsMethod};
use crate::socks::{Address, Command, Reply, Request, Version};
use bytes::{Buf, Bytes, BytesMut};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

/// Default handshake timeout in seconds
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

/// Proxy client
#[derive(Clone)]
pub struct Client {
    proxy_addr: String,
    version: Version,
    user_id: Option<String>,
    auth: Vec<Arc<dyn ClientAuthMethod>>,
    obfs: Option<ObfsBuilder>,
    timeout: Duration,
}

impl Client {
    /// SOCKS5 client without authentication or obfuscation
    pub fn new(proxy_addr: impl Into<String>) -> Self {
        Client {
            proxy_addr: proxy_addr.into(),
            version: Version::Socks5,
            user_id: None,
            auth: Vec::new(),
            obfs: None,
            timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }

    /// Build a client from configuration
    pub fn from_config(config: &ClientConfig) -> Result<Self, SocksError> {
        config.validate().map_err(SocksError::Config)?;
        let version = Version::from_byte(config.version).ok_or_else(|| {
            SocksError::Config(format!("Unsupported SOCKS version: {}", config.version))
        })?;

        let mut client = Client::new(config.proxy_addr.clone())
            .version(version)
            .timeout(Duration::from_secs(config.request_timeout));

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            client = client
                .use_auth(UserPass::new(username.clone(), password.clone()))
                .use_auth(NoAuth);
        }
        if let Some(user_id) = &config.user_id {
            client = client.user_id(user_id.clone());
        }
        if let Some(entry) = &config.obfs {
            let builder = obfs::from_name(&entry.obfs_type, &entry.path).ok_or_else(|| {
                SocksError::Config(format!("Unknown obfuscation method: {}", entry.obfs_type))
            })?;
            client = client.use_obfs(builder);
        }

        Ok(client)
    }

    /// Protocol version to speak
    pub fn version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    /// SOCKS4 user id
    pub fn user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Bound on dialing the proxy and on the handshake
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Offer an authentication method, in order
    pub fn use_auth<M>(mut self, method: M) -> Self
    where
        M: ClientAuthMethod + 'static,
    {
        self.auth.push(Arc::new(method));
        self
    }

    /// Wrap the connection in an obfuscation method
    pub fn use_obfs(mut self, builder: ObfsBuilder) -> Self {
        self.obfs = Some(builder);
        self
    }

    /// CONNECT to `host:port` through the proxy
    pub async fn connect(&self, port: u16, host: &str) -> Result<Established, SocksError> {
        self.request(Command::Connect, Address::parse(host, port)).await
    }

    /// BIND: ask the proxy to accept one connection from `host:port`.
    /// The returned address is where that peer should connect.
    pub async fn bind(&self, port: u16, host: &str) -> Result<Established, SocksError> {
        self.request(Command::Bind, Address::parse(host, port)).await
    }

    /// UDP ASSOCIATE; `host:port` is where the client will send from.
    /// The returned address is the proxy's UDP relay.
    pub async fn associate(&self, port: u16, host: &str) -> Result<Established, SocksError> {
        self.request(Command::Associate, Address::parse(host, port)).await
    }

    /// Issue `command` for `address`
    pub async fn request(&self, command: Command, address: Address) -> Result<Established, SocksError> {
        let dial = TcpStream::connect(self.proxy_addr.as_str());
        let mut stream = match tokio::time::timeout(self.timeout, dial).await {
            Ok(stream) => stream?,
            Err(_) => {
                return Err(SocksError::Timeout(format!(
                    "connecting to {}",
                    self.proxy_addr
                )))
            }
        };
        let _ = stream.set_nodelay(true);

        let obfs: Box<dyn ObfsMethod> = match &self.obfs {
            Some(builder) => builder(Role::Client),
            None => Box::new(NoObfs),
        };
        let mut request = Request::new(self.version, command, address);
        if let Some(user_id) = &self.user_id {
            request = request.with_user_id(user_id.clone());
        }
        debug!("{} {} via {}", command, request.address, self.proxy_addr);

        let handlers = Arc::new(ClientHandlers {
            version: self.version,
            auth: self.auth.clone(),
        });
        let mut conn = Connection::client(handlers, obfs, request);
        let reply = match negotiate(&mut conn, &mut stream, self.timeout).await? {
            Outcome::Resolve(reply) => reply,
            _ => return Err(SocksError::ConnectionClosed),
        };

        let parts = conn.into_parts();
        Ok(Established {
            stream,
            reply,
            obfs: parts.obfs,
            pending: BytesMut::from(&parts.pending[..]),
            raw: parts.raw,
        })
    }
}

/// A proxied channel the server accepted
pub struct Established {
    stream: TcpStream,
    reply: Reply,
    obfs: Box<dyn ObfsMethod>,
    /// Decoded bytes not yet handed out
    pending: BytesMut,
    /// Received bytes not yet decoded
    raw: BytesMut,
}

impl Established {
    /// Address from the proxy's reply: the outbound socket for CONNECT,
    /// the relay listener for BIND, the UDP relay for ASSOCIATE
    pub fn address(&self) -> &Address {
        &self.reply.address
    }

    /// Reserved byte of the reply
    pub fn rsv(&self) -> u8 {
        self.reply.rsv
    }

    /// The proxy's reply
    pub fn reply(&self) -> &Reply {
        &self.reply
    }

    /// Negotiated protocol version
    pub fn version(&self) -> Version {
        self.reply.version
    }

    /// Obfuscation in effect on the channel
    pub fn obfs(&self) -> &dyn ObfsMethod {
        &*self.obfs
    }

    /// The underlying connection to the proxy
    pub fn stream(&self) -> &TcpStream {
        &self.stream
    }

    /// Send payload through the proxy
    pub async fn send(&mut self, data: &[u8]) -> Result<(), SocksError> {
        self.stream.write_all(&self.obfs.obfuscate(data)).await?;
        Ok(())
    }

    /// Receive the next payload chunk; empty at end of stream
    pub async fn recv(&mut self) -> Result<Bytes, SocksError> {
        loop {
            if !self.pending.is_empty() {
                return Ok(self.pending.split().freeze());
            }
            if !self.fill().await? {
                return Ok(Bytes::new());
            }
        }
    }

    /// Wait for a second reply, as sent by BIND once its peer connects
    pub async fn wait_reply(&mut self) -> Result<Reply, SocksError> {
        loop {
            let mut input = Readable::new(&self.pending);
            match Reply::decode(&mut input, self.reply.version) {
                Ok(reply) => {
                    let consumed = input.position();
                    self.pending.advance(consumed);
                    if !reply.is_success() {
                        return Err(SocksError::Rejected {
                            code: reply.rep,
                            message: reply.message(),
                        });
                    }
                    return Ok(reply);
                }
                Err(CodecError::Truncated { .. }) => {
                    if !self.fill().await? {
                        return Err(SocksError::ConnectionClosed);
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Take back the connection, its obfuscator and any unread input
    pub fn into_inner(self) -> (TcpStream, Box<dyn ObfsMethod>, Bytes, BytesMut) {
        (self.stream, self.obfs, self.pending.freeze(), self.raw)
    }

    /// Read once from the proxy; `false` at end of stream
    async fn fill(&mut self) -> Result<bool, SocksError> {
        let mut buf = vec![0u8; DEFAULT_BUFFER_SIZE];
        let n = self.stream.read(&mut buf).await?;
        if n == 0 {
            return Ok(false);
        }
        self.raw.extend_from_slice(&buf[..n]);
        let plain = self.obfs.deobfuscate(&mut self.raw)?;
        self.pending.extend_from_slice(&plain);
        Ok(true)
    }
}
