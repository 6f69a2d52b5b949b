use super::{ClientHandlers, Connection, Effect, Handlers, State, Step};
use crate::auth::{self, ClientAuthMethod};
use crate::codec::{Readable, Writable};
use crate::error::{CodecError, SocksError};
use crate::socks::consts::*;
use crate::socks::{Reply, Version};
use bytes::Buf;
use std::sync::Arc;
use tracing::debug;

fn read_choice(input: &mut Readable<'_>) -> Result<(u8, u8), CodecError> {
    Ok((input.read_u8()?, input.read_u8()?))
}

impl Connection {
    pub(super) fn step_client(&mut self, effects: &mut Vec<Effect>) -> Step {
        let handlers = match &self.handlers {
            Handlers::Client(h) => h.clone(),
            Handlers::Server(_) => return Step::NeedInput,
        };
        match self.state.clone() {
            State::ObfsHandshake => self.obfs_handshake(effects),
            State::AwaitMethod => self.await_method(&handlers, effects),
            State::Credentials(method) => self.credentials(method, effects),
            State::AwaitReply => self.await_reply(effects),
            _ => Step::NeedInput,
        }
    }

    /// Open the SOCKS exchange once the obfuscation layer is up
    pub(super) fn send_greeting(&mut self, effects: &mut Vec<Effect>) -> Step {
        let handlers = match &self.handlers {
            Handlers::Client(h) => h.clone(),
            Handlers::Server(_) => return Step::NeedInput,
        };
        match handlers.version {
            Version::Socks5 => {
                let methods: Vec<u8> = handlers.auth_methods().iter().map(|m| m.method()).collect();
                let mut out = Writable::new();
                out.push(SOCKS5_VERSION)
                    .push(methods.len() as u8)
                    .push(methods);
                self.write(effects, &out.to_bytes());
                self.transition(State::AwaitMethod);
                Step::Progress
            }
            Version::Socks4 => self.send_request(effects),
        }
    }

    fn send_request(&mut self, effects: &mut Vec<Effect>) -> Step {
        let encoded = match &self.request {
            Some(request) => request.encode(),
            None => {
                return self.fail(effects, SocksError::Protocol("no request to send".to_string()))
            }
        };
        match encoded {
            Ok(bytes) => {
                self.write(effects, &bytes);
                self.transition(State::AwaitReply);
                Step::Progress
            }
            Err(e) => self.fail(effects, e.into()),
        }
    }

    fn await_method(&mut self, handlers: &ClientHandlers, effects: &mut Vec<Effect>) -> Step {
        if self.buffer.is_empty() {
            return Step::NeedInput;
        }
        let mut input = Readable::new(&self.buffer);
        let parsed = read_choice(&mut input);
        let consumed = input.position();
        let (ver, chosen) = match parsed {
            Ok(parsed) => parsed,
            Err(e) => return self.fail(effects, e.into()),
        };
        self.buffer.advance(consumed);

        if ver != SOCKS5_VERSION {
            return self.fail(effects, CodecError::UnsupportedVersion(ver).into());
        }
        if chosen == SOCKS5_AUTH_METHOD_NOT_ACCEPTABLE {
            return self.fail(effects, SocksError::NoAcceptableMethod);
        }
        let method = match auth::find_method(&handlers.auth_methods(), chosen) {
            Some(method) => method,
            None => return self.fail(effects, SocksError::UnsupportedMethod(chosen)),
        };
        debug!("Server selected auth method {:#04x}", chosen);

        if let Some(msg) = method.begin() {
            self.write(effects, &msg);
        }
        if method.has_subnegotiation() {
            self.transition(State::Credentials(method));
            Step::Progress
        } else {
            self.send_request(effects)
        }
    }

    fn credentials(&mut self, method: Arc<dyn ClientAuthMethod>, effects: &mut Vec<Effect>) -> Step {
        if self.buffer.is_empty() {
            return Step::NeedInput;
        }
        let mut input = Readable::new(&self.buffer);
        let verified = method.verify(&mut input);
        let consumed = input.position();
        match verified {
            Ok(true) => {
                self.buffer.advance(consumed);
                self.send_request(effects)
            }
            Ok(false) => self.fail(effects, SocksError::AuthFailed),
            Err(e) => self.fail(effects, e.into()),
        }
    }

    fn await_reply(&mut self, effects: &mut Vec<Effect>) -> Step {
        if self.buffer.is_empty() {
            return Step::NeedInput;
        }
        let version = self.version.unwrap_or(Version::Socks5);
        let mut input = Readable::new(&self.buffer);
        let decoded = Reply::decode(&mut input, version);
        let consumed = input.position();
        let reply = match decoded {
            Ok(reply) => reply,
            Err(e) => return self.fail(effects, e.into()),
        };
        self.buffer.advance(consumed);

        if reply.is_success() {
            effects.push(Effect::Resolve(reply));
            self.transition(State::Established);
            Step::NeedInput
        } else {
            let message = reply.message();
            self.fail(
                effects,
                SocksError::Rejected {
                    code: reply.rep,
                    message,
                },
            )
        }
    }
}
