//! Per-connection protocol state machine
//!
//! A [`Connection`] owns everything one SOCKS conversation needs up to the
//! point where a command is dispatched (server) or a reply is received
//! (client): the active state, the raw and decoded byte buffers, the
//! negotiated version and the selected obfuscator.
//!
//! It performs no I/O. Bytes go in through [`Connection::feed`] and the
//! resulting side effects come back as a list of [`Effect`]s, in order.
//! Within one call the machine keeps stepping until no state can make
//! progress on the buffered bytes, so a transition that completes
//! mid-buffer (an obfuscation upgrade followed by pipelined SOCKS bytes)
//! is processed immediately without recursion.
//!
//! [`negotiate`] drives a connection over any async stream.

mod client;
mod server;

use crate::auth::{self, ClientAuthMethod, ServerAuthMethod};
use crate::error::SocksError;
use crate::helper::DEFAULT_BUFFER_SIZE;
use crate::obfs::{NoObfs, ObfsBuilder, ObfsMethod};
use crate::socks::{Reply, Request, Version};
use bytes::{Bytes, BytesMut};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// Which end of the SOCKS conversation a connection plays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Proxy consumer
    Client,
    /// Proxy listener
    Server,
}

/// A side effect requested by the state machine
#[derive(Debug)]
pub enum Effect {
    /// Send these bytes (already obfuscated)
    Write(Bytes),
    /// Server: a request was negotiated and should go to its command handler
    Dispatch(Request),
    /// Client: the proxy accepted the request
    Resolve(Reply),
    /// Client: the operation failed
    Reject(SocksError),
    /// Close the connection after the preceding writes
    Close,
}

/// SOCKS4 user id predicate
pub type IdentCheck = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Negotiation settings shared by every server-side connection
#[derive(Clone)]
pub struct ServerHandlers {
    /// Accept SOCKS5
    pub socks5: bool,
    /// Accept SOCKS4
    pub socks4: bool,
    /// Authentication methods in preference order; empty means `[none]`
    pub auth: Vec<Arc<dyn ServerAuthMethod>>,
    /// Obfuscation methods tried after `none`, in order
    pub obfs: Vec<ObfsBuilder>,
    /// SOCKS4 user id check
    pub ident: Option<IdentCheck>,
    /// Close instead of dispatching when the user id check fails
    pub ident_failure_closes: bool,
}

impl Default for ServerHandlers {
    fn default() -> Self {
        ServerHandlers {
            socks5: true,
            socks4: true,
            auth: Vec::new(),
            obfs: Vec::new(),
            ident: None,
            ident_failure_closes: false,
        }
    }
}

impl ServerHandlers {
    fn auth_methods(&self) -> Vec<Arc<dyn ServerAuthMethod>> {
        if self.auth.is_empty() {
            vec![Arc::new(auth::server::NoAuth)]
        } else {
            self.auth.clone()
        }
    }
}

/// Negotiation settings for one client-side operation
#[derive(Clone)]
pub struct ClientHandlers {
    /// Protocol version to speak
    pub version: Version,
    /// Authentication methods to offer; empty means `[none]`
    pub auth: Vec<Arc<dyn ClientAuthMethod>>,
}

impl ClientHandlers {
    fn auth_methods(&self) -> Vec<Arc<dyn ClientAuthMethod>> {
        if self.auth.is_empty() {
            vec![Arc::new(auth::client::NoAuth)]
        } else {
            self.auth.clone()
        }
    }
}

#[derive(Clone)]
enum Handlers {
    Server(Arc<ServerHandlers>),
    Client(Arc<ClientHandlers>),
}

/// Protocol states
#[derive(Clone)]
pub enum State {
    /// Server: sniffing the first bytes for an obfuscation method
    ObfsDetect,
    /// Running the obfuscation upgrade
    ObfsHandshake,
    /// Server: reading the SOCKS version byte
    ProtocolIdentify,
    /// Server: reading the SOCKS5 method list
    MethodSelection,
    /// Server: running the selected method's sub-negotiation
    Authenticating(Arc<dyn ServerAuthMethod>),
    /// Server: reading a SOCKS4 request
    Socks4Request,
    /// Server: reading a SOCKS5 request
    Socks5Request,
    /// Server: request handed to a command handler
    Dispatched,
    /// Client: waiting for the server's method choice
    AwaitMethod,
    /// Client: waiting for the sub-negotiation status
    Credentials(Arc<dyn ClientAuthMethod>),
    /// Client: waiting for the command reply
    AwaitReply,
    /// Client: reply received
    Established,
    /// Terminated
    Closed,
}

impl State {
    /// State name for logs
    pub fn name(&self) -> &'static str {
        match self {
            State::ObfsDetect => "obfs-detect",
            State::ObfsHandshake => "obfs-handshake",
            State::ProtocolIdentify => "protocol-identify",
            State::MethodSelection => "method-selection",
            State::Authenticating(_) => "authenticating",
            State::Socks4Request => "socks4-request",
            State::Socks5Request => "socks5-request",
            State::Dispatched => "dispatched",
            State::AwaitMethod => "await-method",
            State::Credentials(_) => "credentials",
            State::AwaitReply => "await-reply",
            State::Established => "established",
            State::Closed => "closed",
        }
    }

    fn in_obfs_phase(&self) -> bool {
        matches!(self, State::ObfsDetect | State::ObfsHandshake)
    }
}

impl fmt::Debug for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

enum Step {
    Progress,
    NeedInput,
}

/// What is left of a connection once negotiation is over
pub struct Parts {
    /// The connection's obfuscator, for the relay phase
    pub obfs: Box<dyn ObfsMethod>,
    /// Decoded bytes received after the last handshake message
    pub pending: Bytes,
    /// Received bytes not yet decoded (a partial obfuscation frame)
    pub raw: BytesMut,
}

/// One SOCKS conversation
pub struct Connection {
    role: Role,
    state: State,
    /// Bytes as received from the wire
    raw: BytesMut,
    /// Bytes after obfuscation was stripped
    buffer: BytesMut,
    version: Option<Version>,
    obfs: Box<dyn ObfsMethod>,
    handlers: Handlers,
    request: Option<Request>,
    started: bool,
}

impl Connection {
    /// New server-side connection, waiting for the first bytes
    pub fn server(handlers: Arc<ServerHandlers>) -> Self {
        Connection {
            role: Role::Server,
            state: State::ObfsDetect,
            raw: BytesMut::new(),
            buffer: BytesMut::new(),
            version: None,
            obfs: Box::new(NoObfs),
            handlers: Handlers::Server(handlers),
            request: None,
            started: false,
        }
    }

    /// New client-side connection that will issue `request`
    pub fn client(
        handlers: Arc<ClientHandlers>,
        obfs: Box<dyn ObfsMethod>,
        request: Request,
    ) -> Self {
        Connection {
            role: Role::Client,
            state: State::ObfsHandshake,
            raw: BytesMut::new(),
            buffer: BytesMut::new(),
            version: Some(handlers.version),
            obfs,
            handlers: Handlers::Client(handlers),
            request: Some(request),
            started: false,
        }
    }

    /// Which end this connection plays
    pub fn role(&self) -> Role {
        self.role
    }

    /// Current state
    pub fn state(&self) -> &State {
        &self.state
    }

    /// Negotiated protocol version
    pub fn version(&self) -> Option<Version> {
        self.version
    }

    /// The dispatched (server) or issued (client) request
    pub fn request(&self) -> Option<&Request> {
        self.request.as_ref()
    }

    /// Name of the active obfuscation method
    pub fn obfs_name(&self) -> &'static str {
        self.obfs.name()
    }

    /// Whether the connection has terminated
    pub fn is_closed(&self) -> bool {
        matches!(self.state, State::Closed)
    }

    /// Produce the opening effects. The client sends its obfuscation
    /// upgrade or SOCKS greeting; the server has nothing to say first.
    pub fn start(&mut self) -> Vec<Effect> {
        let mut effects = Vec::new();
        if self.started {
            return effects;
        }
        self.started = true;
        if self.role == Role::Client {
            if let Some(open) = self.obfs.open() {
                effects.push(Effect::Write(open));
            }
            self.run(&mut effects);
        }
        effects
    }

    /// Process bytes received from the peer
    pub fn feed(&mut self, data: &[u8]) -> Vec<Effect> {
        let mut effects = self.start();
        if self.is_closed() {
            return effects;
        }
        self.raw.extend_from_slice(data);
        self.run(&mut effects);
        effects
    }

    /// Split off the obfuscator and any unconsumed input
    pub fn into_parts(self) -> Parts {
        Parts {
            obfs: self.obfs,
            pending: self.buffer.freeze(),
            raw: self.raw,
        }
    }

    fn run(&mut self, effects: &mut Vec<Effect>) {
        loop {
            if self.is_closed() {
                return;
            }
            if !self.state.in_obfs_phase() && !self.raw.is_empty() {
                match self.obfs.deobfuscate(&mut self.raw) {
                    Ok(plain) => self.buffer.extend_from_slice(&plain),
                    Err(e) => {
                        self.fail(effects, SocksError::Obfs(e));
                        return;
                    }
                }
            }
            let step = match self.role {
                Role::Server => self.step_server(effects),
                Role::Client => self.step_client(effects),
            };
            if let Step::NeedInput = step {
                return;
            }
        }
    }

    fn transition(&mut self, next: State) {
        debug!("{} -> {}", self.state.name(), next.name());
        self.state = next;
    }

    /// Obfuscate and queue a write
    fn write(&self, effects: &mut Vec<Effect>, data: &[u8]) {
        effects.push(Effect::Write(self.obfs.obfuscate(data)));
    }

    fn write_reply(&self, effects: &mut Vec<Effect>, reply: &Reply) {
        match reply.encode() {
            Ok(bytes) => self.write(effects, &bytes),
            Err(e) => debug!("Failed to encode reply: {}", e),
        }
    }

    /// Close after the queued writes
    fn close(&mut self, effects: &mut Vec<Effect>) -> Step {
        self.transition(State::Closed);
        effects.push(Effect::Close);
        Step::NeedInput
    }

    /// Terminate on an unrecoverable condition. The server drops the
    /// connection silently; the client also rejects the pending operation.
    fn fail(&mut self, effects: &mut Vec<Effect>, err: SocksError) -> Step {
        debug!("Terminating in state {}: {}", self.state.name(), err);
        if self.role == Role::Client {
            effects.push(Effect::Reject(err));
        }
        self.close(effects)
    }

    /// Advance the obfuscation handshake, shared by both roles
    fn obfs_handshake(&mut self, effects: &mut Vec<Effect>) -> Step {
        let mut input = crate::codec::Readable::new(&self.raw);
        let result = self.obfs.handshake(&mut input);
        let consumed = input.position();
        match result {
            Ok(crate::obfs::Handshake::Pending) => Step::NeedInput,
            Ok(crate::obfs::Handshake::Done { reply }) => {
                let _ = self.raw.split_to(consumed);
                if let Some(reply) = reply {
                    effects.push(Effect::Write(reply));
                }
                match self.role {
                    Role::Server => {
                        self.transition(State::ProtocolIdentify);
                        Step::Progress
                    }
                    Role::Client => self.send_greeting(effects),
                }
            }
            Err(e) => self.fail(effects, SocksError::Obfs(e)),
        }
    }
}

/// How a negotiation ended
#[derive(Debug)]
pub enum Outcome {
    /// Server: hand this request to its command handler
    Dispatch(Request),
    /// Client: the proxy accepted the request
    Resolve(Reply),
    /// The connection was closed
    Closed,
}

/// Drive `conn` over `stream` until it dispatches, resolves or closes.
///
/// The whole exchange is bounded by `deadline`.
pub async fn negotiate<S>(
    conn: &mut Connection,
    stream: &mut S,
    deadline: Duration,
) -> Result<Outcome, SocksError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let work = async {
        let mut effects = conn.start();
        let mut buf = vec![0u8; DEFAULT_BUFFER_SIZE];
        loop {
            if let Some(outcome) = apply_effects(stream, effects).await? {
                return Ok(outcome);
            }
            let n = stream.read(&mut buf).await?;
            if n == 0 {
                return match conn.role() {
                    Role::Client => Err(SocksError::ConnectionClosed),
                    Role::Server => Ok(Outcome::Closed),
                };
            }
            effects = conn.feed(&buf[..n]);
        }
    };

    match tokio::time::timeout(deadline, work).await {
        Ok(result) => result,
        Err(_) => Err(SocksError::Timeout(format!(
            "handshake not completed within {:?}",
            deadline
        ))),
    }
}

async fn apply_effects<S>(stream: &mut S, effects: Vec<Effect>) -> Result<Option<Outcome>, SocksError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut outcome = None;
    for effect in effects {
        match effect {
            Effect::Write(bytes) => stream.write_all(&bytes).await?,
            Effect::Dispatch(request) => outcome = Some(Outcome::Dispatch(request)),
            Effect::Resolve(reply) => outcome = Some(Outcome::Resolve(reply)),
            Effect::Reject(err) => {
                let _ = stream.shutdown().await;
                return Err(err);
            }
            Effect::Close => {
                let _ = stream.shutdown().await;
                return Ok(Some(outcome.unwrap_or(Outcome::Closed)));
            }
        }
    }
    Ok(outcome)
}
