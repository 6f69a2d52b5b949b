//! SOCKS server
//!
//! [`Server`] collects the negotiation settings and command handlers,
//! [`Server::bind`] starts the accept loop and returns a [`ServerHandle`]
//! for observing and stopping it.
//!
//! Each accepted connection runs in its own task: the handshake is driven
//! through a [`Connection`] under the handshake timeout, then the request
//! goes to the [`CommandHandler`] registered for its command.

pub mod handlers;
mod tcp_relay;
mod udp_relay;

pub use handlers::{AssociateHandler, BindHandler, CommandContext, CommandHandler, ConnectHandler};
pub use tcp_relay::TcpRelay;
pub use udp_relay::{UdpRelay, UdpRelayRegistry, SESSION_IDLE_TIMEOUT};

use crate::auth::server::{NoAuth, UserPass};
use crate::auth::ServerAuthMethod;
use crate::config::ServerConfig;
use crate::connection::{negotiate, Connection, IdentCheck, Outcome, ServerHandlers};
use crate::error::SocksError;
use crate::helper::{SocketOpts, DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_HANDSHAKE_TIMEOUT_SECS};
use crate::obfs::{self, ObfsBuilder};
use crate::socks::{Command, Reply};
use anyhow::{Context, Result};
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

/// Capacity of the server event channel
const EVENT_CAPACITY: usize = 256;

/// Runtime settings for a server
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Bound on the whole pre-dispatch handshake
    pub handshake_timeout: Duration,
    /// Bound on CONNECT's outbound dial
    pub connect_timeout: Duration,
    /// Port allocation attempts for BIND
    pub bind_max_attempts: u32,
    /// Dedicated UDP relay port; `None` shares the listener's port
    pub udp_relay_port: Option<u16>,
    /// Options applied to accepted sockets
    pub socket_opts: SocketOpts,
}

impl Default for ServerOptions {
    fn default() -> Self {
        ServerOptions {
            handshake_timeout: Duration::from_secs(DEFAULT_HANDSHAKE_TIMEOUT_SECS),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            bind_max_attempts: 16,
            udp_relay_port: None,
            socket_opts: SocketOpts::default(),
        }
    }
}

impl From<&ServerConfig> for ServerOptions {
    fn from(config: &ServerConfig) -> Self {
        ServerOptions {
            handshake_timeout: Duration::from_secs(config.handshake_timeout),
            connect_timeout: Duration::from_secs(config.connect_timeout),
            bind_max_attempts: config.bind_max_attempts,
            udp_relay_port: config.udp_relay_port,
            socket_opts: SocketOpts::from(&config.tcp),
        }
    }
}

/// Server lifecycle notifications
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// A connection was accepted
    Connected(SocketAddr),
    /// A request was handed to its command handler
    Dispatched {
        /// Client address
        peer: SocketAddr,
        /// Requested command
        command: Command,
    },
    /// A command handler failed
    Error {
        /// Client address
        peer: SocketAddr,
        /// Failure description
        message: String,
    },
    /// A connection ended
    Closed(SocketAddr),
}

/// Called with the peer address of every accepted connection
pub type ConnectionCallback = Arc<dyn Fn(SocketAddr) + Send + Sync>;

/// State shared by the accept loop and every connection task
pub(crate) struct Shared {
    handlers: Arc<ServerHandlers>,
    commands: HashMap<Command, Arc<dyn CommandHandler>>,
    pub(crate) options: ServerOptions,
    pub(crate) listen_addr: SocketAddr,
    connections: Mutex<HashSet<SocketAddr>>,
    events: broadcast::Sender<ServerEvent>,
    pub(crate) udp_relays: UdpRelayRegistry,
    on_connection: Option<ConnectionCallback>,
}

impl Shared {
    fn emit(&self, event: ServerEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

/// Keeps a connection in the live registry for as long as it is held
struct Registration {
    shared: Arc<Shared>,
    peer: SocketAddr,
}

impl Registration {
    fn new(shared: Arc<Shared>, peer: SocketAddr) -> Self {
        shared
            .connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(peer);
        shared.emit(ServerEvent::Connected(peer));
        Registration { shared, peer }
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.shared
            .connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.peer);
        self.shared.emit(ServerEvent::Closed(self.peer));
        debug!("Connection from {} closed", self.peer);
    }
}

/// SOCKS server builder
pub struct Server {
    handlers: ServerHandlers,
    commands: HashMap<Command, Arc<dyn CommandHandler>>,
    options: ServerOptions,
    on_connection: Option<ConnectionCallback>,
}

impl Default for Server {
    fn default() -> Self {
        Self::new()
    }
}

impl Server {
    /// Server accepting SOCKS4 and SOCKS5 without authentication, with the
    /// built-in CONNECT, BIND and ASSOCIATE handlers
    pub fn new() -> Self {
        let mut commands: HashMap<Command, Arc<dyn CommandHandler>> = HashMap::new();
        commands.insert(Command::Connect, Arc::new(ConnectHandler));
        commands.insert(Command::Bind, Arc::new(BindHandler));
        commands.insert(Command::Associate, Arc::new(AssociateHandler));
        Server {
            handlers: ServerHandlers::default(),
            commands,
            options: ServerOptions::default(),
            on_connection: None,
        }
    }

    /// Build a server from configuration
    pub fn from_config(config: &ServerConfig) -> Result<Self> {
        config.validate().map_err(SocksError::Config)?;

        let mut server = Server::new()
            .with_options(ServerOptions::from(config))
            .versions(config.socks5, config.socks4)
            .ident_failure_closes(config.ident_failure_closes);

        if !config.users.is_empty() {
            let users: HashMap<String, String> = config
                .users
                .iter()
                .map(|u| (u.username.clone(), u.password.clone()))
                .collect();
            server = server.use_auth(UserPass::with_users(users));
            if !config.auth_required {
                server = server.use_auth(NoAuth);
            }
        }

        if !config.allowed_user_ids.is_empty() {
            let allowed: HashSet<String> = config.allowed_user_ids.iter().cloned().collect();
            server = server.use_ident(move |user_id| allowed.contains(user_id));
        }

        for entry in &config.obfs {
            let builder = obfs::from_name(&entry.obfs_type, &entry.path).ok_or_else(|| {
                SocksError::Config(format!("Unknown obfuscation method: {}", entry.obfs_type))
            })?;
            // Plain SOCKS is always tried first
            if entry.obfs_type != "none" {
                server = server.use_obfs(builder);
            }
        }

        Ok(server)
    }

    /// Replace the runtime options
    pub fn with_options(mut self, options: ServerOptions) -> Self {
        self.options = options;
        self
    }

    /// Choose which protocol versions are accepted
    pub fn versions(mut self, socks5: bool, socks4: bool) -> Self {
        self.handlers.socks5 = socks5;
        self.handlers.socks4 = socks4;
        self
    }

    /// Append an authentication method; earlier methods are preferred
    pub fn use_auth<M>(mut self, method: M) -> Self
    where
        M: ServerAuthMethod + 'static,
    {
        self.handlers.auth.push(Arc::new(method));
        self
    }

    /// Replace the handler for `command`
    pub fn use_req<H>(mut self, command: Command, handler: H) -> Self
    where
        H: CommandHandler + 'static,
    {
        self.commands.insert(command, Arc::new(handler));
        self
    }

    /// Check SOCKS4 user ids with `check`
    pub fn use_ident<F>(mut self, check: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        let check: IdentCheck = Arc::new(check);
        self.handlers.ident = Some(check);
        self
    }

    /// Close, rather than serve, SOCKS4 clients whose user id is refused
    pub fn ident_failure_closes(mut self, closes: bool) -> Self {
        self.handlers.ident_failure_closes = closes;
        self
    }

    /// Offer an obfuscation method
    pub fn use_obfs(mut self, builder: ObfsBuilder) -> Self {
        self.handlers.obfs.push(builder);
        self
    }

    /// Call `callback` for every accepted connection
    pub fn on_connection<F>(mut self, callback: F) -> Self
    where
        F: Fn(SocketAddr) + Send + Sync + 'static,
    {
        self.on_connection = Some(Arc::new(callback));
        self
    }

    /// Start listening on `addr`
    pub async fn bind(self, addr: &str) -> Result<ServerHandle> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind {}", addr))?;
        let local_addr = listener.local_addr()?;

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let shared = Arc::new(Shared {
            handlers: Arc::new(self.handlers),
            commands: self.commands,
            options: self.options,
            listen_addr: local_addr,
            connections: Mutex::new(HashSet::new()),
            events,
            udp_relays: UdpRelayRegistry::new(),
            on_connection: self.on_connection,
        });

        info!("Listening on {}", local_addr);
        let task = tokio::spawn(accept_loop(listener, shared.clone(), shutdown_rx));

        Ok(ServerHandle {
            local_addr,
            shared,
            shutdown_tx,
            task,
        })
    }
}

/// A running server
pub struct ServerHandle {
    local_addr: SocketAddr,
    shared: Arc<Shared>,
    shutdown_tx: broadcast::Sender<bool>,
    task: JoinHandle<()>,
}

impl ServerHandle {
    /// Address the server is listening on
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of live connections
    pub fn connection_count(&self) -> usize {
        self.shared
            .connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Subscribe to server events
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.shared.events.subscribe()
    }

    /// Stop accepting and close every live connection
    pub async fn close(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.task.await {
            warn!("Accept loop ended abnormally: {}", e);
        }
        info!("Server on {} closed", self.local_addr);
    }
}

async fn accept_loop(
    listener: TcpListener,
    shared: Arc<Shared>,
    mut shutdown_rx: broadcast::Receiver<bool>,
) {
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    if let Err(e) = shared.options.socket_opts.apply(&stream) {
                        warn!("Failed to apply socket options: {}", e);
                    }
                    connections.spawn(handle_connection(stream, peer, shared.clone()));
                }
                Err(e) => warn!("Failed to accept connection: {}", e),
            },
            Some(_) = connections.join_next() => {}
            _ = shutdown_rx.recv() => {
                debug!("Shutting down accept loop");
                break;
            }
        }
    }
    connections.shutdown().await;
}

async fn handle_connection(mut stream: TcpStream, peer: SocketAddr, shared: Arc<Shared>) {
    let _registration = Registration::new(shared.clone(), peer);
    info!("Accepted connection from {}", peer);
    if let Some(callback) = &shared.on_connection {
        callback(peer);
    }

    let mut conn = Connection::server(shared.handlers.clone());
    let request = match negotiate(&mut conn, &mut stream, shared.options.handshake_timeout).await {
        Ok(Outcome::Dispatch(request)) => request,
        Ok(_) => {
            debug!("{} closed during handshake", peer);
            return;
        }
        Err(e) => {
            debug!("Handshake with {} failed: {}", peer, e);
            return;
        }
    };

    let parts = conn.into_parts();
    let handler = match shared.commands.get(&request.command) {
        Some(handler) => handler.clone(),
        None => {
            warn!("No handler for {} from {}", request.command, peer);
            if let Ok(reply) = Reply::failure(request.version).encode() {
                let _ = stream.write_all(&parts.obfs.obfuscate(&reply)).await;
            }
            return;
        }
    };
    shared.emit(ServerEvent::Dispatched {
        peer,
        command: request.command,
    });

    let ctx = CommandContext {
        request,
        stream,
        obfs: parts.obfs,
        pending: parts.pending,
        raw: parts.raw,
        peer,
        shared: shared.clone(),
    };
    if let Err(e) = handler.handle(ctx).await {
        warn!("Request from {} failed: {:#}", peer, e);
        shared.emit(ServerEvent::Error {
            peer,
            message: format!("{:#}", e),
        });
    }
}
