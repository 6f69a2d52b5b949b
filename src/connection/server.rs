use super::{Connection, Effect, Handlers, Role, ServerHandlers, State, Step};
use crate::auth::{self, AuthDecision, ServerAuthMethod};
use crate::codec::Readable;
use crate::error::{CodecError, Socks4ReplyCode, Socks5ReplyCode, SocksError};
use crate::obfs;
use crate::socks::consts::*;
use crate::socks::{Address, Reply, Request, Version};
use bytes::Buf;
use std::sync::Arc;
use tracing::{debug, warn};

fn read_methods(input: &mut Readable<'_>) -> Result<(u8, Vec<u8>), CodecError> {
    let ver = input.read_u8()?;
    let nmethods = input.read_u8()? as usize;
    let methods = input.read(nmethods)?;
    Ok((ver, methods.to_vec()))
}

impl Connection {
    pub(super) fn step_server(&mut self, effects: &mut Vec<Effect>) -> Step {
        let handlers = match &self.handlers {
            Handlers::Server(h) => h.clone(),
            Handlers::Client(_) => return Step::NeedInput,
        };
        let state = self.state.clone();
        let parses_buffer = matches!(
            state,
            State::MethodSelection
                | State::Authenticating(_)
                | State::Socks4Request
                | State::Socks5Request
        );
        // Wait for the peer's next message
        if parses_buffer && self.buffer.is_empty() {
            return Step::NeedInput;
        }
        match state {
            State::ObfsDetect => self.detect_obfs(&handlers, effects),
            State::ObfsHandshake => self.obfs_handshake(effects),
            State::ProtocolIdentify => self.identify(&handlers, effects),
            State::MethodSelection => self.select_method(&handlers, effects),
            State::Authenticating(method) => self.authenticate(method, effects),
            State::Socks4Request => self.socks4_request(&handlers, effects),
            State::Socks5Request => self.socks5_request(effects),
            _ => Step::NeedInput,
        }
    }

    fn detect_obfs(&mut self, handlers: &ServerHandlers, effects: &mut Vec<Effect>) -> Step {
        if self.raw.is_empty() {
            return Step::NeedInput;
        }
        let candidates = std::iter::once(obfs::none()).chain(handlers.obfs.iter().cloned());
        for builder in candidates {
            let method = builder(Role::Server);
            if method.check(&self.raw) {
                debug!("Obfuscation method: {}", method.name());
                self.obfs = method;
                self.transition(State::ObfsHandshake);
                return Step::Progress;
            }
        }
        let undecided = std::iter::once(obfs::none())
            .chain(handlers.obfs.iter().cloned())
            .any(|builder| builder(Role::Server).needs_more(&self.raw));
        if undecided {
            return Step::NeedInput;
        }
        self.fail(
            effects,
            SocksError::Protocol("no obfuscation method matched".to_string()),
        )
    }

    fn identify(&mut self, handlers: &ServerHandlers, effects: &mut Vec<Effect>) -> Step {
        let first = match self.buffer.first() {
            Some(b) => *b,
            None => return Step::NeedInput,
        };
        match first {
            SOCKS5_VERSION if handlers.socks5 => {
                self.version = Some(Version::Socks5);
                self.transition(State::MethodSelection);
                Step::Progress
            }
            SOCKS4_VERSION if handlers.socks4 => {
                self.version = Some(Version::Socks4);
                self.transition(State::Socks4Request);
                Step::Progress
            }
            other => self.fail(
                effects,
                SocksError::Protocol(format!("unsupported SOCKS version {:#04x}", other)),
            ),
        }
    }

    fn select_method(&mut self, handlers: &ServerHandlers, effects: &mut Vec<Effect>) -> Step {
        let mut input = Readable::new(&self.buffer);
        let parsed = read_methods(&mut input);
        let consumed = input.position();
        let (ver, offered) = match parsed {
            Ok(parsed) => parsed,
            Err(e) => return self.fail(effects, e.into()),
        };
        self.buffer.advance(consumed);
        if ver != SOCKS5_VERSION {
            return self.fail(effects, CodecError::UnsupportedVersion(ver).into());
        }

        match auth::select_method(&handlers.auth_methods(), &offered) {
            Some(method) => {
                debug!("Selected auth method {:#04x}", method.method());
                self.write(effects, &[SOCKS5_VERSION, method.method()]);
                if method.has_subnegotiation() {
                    self.transition(State::Authenticating(method));
                } else {
                    self.transition(State::Socks5Request);
                }
                Step::Progress
            }
            None => {
                debug!("No acceptable auth method in {:02x?}", offered);
                self.write(effects, &[SOCKS5_VERSION, SOCKS5_AUTH_METHOD_NOT_ACCEPTABLE]);
                self.close(effects)
            }
        }
    }

    fn authenticate(&mut self, method: Arc<dyn ServerAuthMethod>, effects: &mut Vec<Effect>) -> Step {
        let mut input = Readable::new(&self.buffer);
        let decision = method.authenticate(&mut input);
        let consumed = input.position();
        match decision {
            Ok(AuthDecision::Granted { reply }) => {
                self.buffer.advance(consumed);
                if let Some(reply) = reply {
                    self.write(effects, &reply);
                }
                self.transition(State::Socks5Request);
                Step::Progress
            }
            Ok(AuthDecision::Denied { reply }) => {
                self.buffer.advance(consumed);
                warn!("Authentication failed");
                self.write(effects, &reply);
                self.close(effects)
            }
            Err(e) => self.fail(effects, e.into()),
        }
    }

    fn socks4_request(&mut self, handlers: &ServerHandlers, effects: &mut Vec<Effect>) -> Step {
        let mut input = Readable::new(&self.buffer);
        let parsed = Request::decode_v4(&mut input);
        let consumed = input.position();
        match parsed {
            Ok(request) => {
                self.buffer.advance(consumed);
                if let Some(ident) = &handlers.ident {
                    let user_id = request.user_id.as_deref().unwrap_or("");
                    if !ident(user_id) {
                        warn!("SOCKS4 user id check failed for {:?}", user_id);
                        let reply = Reply::new(
                            Version::Socks4,
                            Socks4ReplyCode::IdentFailed.into(),
                            request.address.clone(),
                        );
                        self.write_reply(effects, &reply);
                        if handlers.ident_failure_closes {
                            return self.close(effects);
                        }
                    }
                }
                self.dispatch(request, effects)
            }
            Err(CodecError::UnsupportedCommand(cmd)) => {
                debug!("Unsupported SOCKS4 command {:#04x}", cmd);
                self.write_reply(effects, &Reply::failure(Version::Socks4));
                self.close(effects)
            }
            Err(e) => self.fail(effects, e.into()),
        }
    }

    fn socks5_request(&mut self, effects: &mut Vec<Effect>) -> Step {
        let mut input = Readable::new(&self.buffer);
        let parsed = Request::decode_v5(&mut input);
        let consumed = input.position();
        let code = match parsed {
            Ok(request) => {
                self.buffer.advance(consumed);
                return self.dispatch(request, effects);
            }
            Err(CodecError::UnsupportedCommand(_)) => Socks5ReplyCode::CommandNotSupported,
            Err(CodecError::UnsupportedAddressType(_)) => Socks5ReplyCode::AddressTypeNotSupported,
            Err(e) => return self.fail(effects, e.into()),
        };
        debug!("Rejecting request: {}", code.message());
        let reply = Reply::new(Version::Socks5, code.into(), Address::unspecified());
        self.write_reply(effects, &reply);
        self.close(effects)
    }

    fn dispatch(&mut self, request: Request, effects: &mut Vec<Effect>) -> Step {
        debug!("Dispatching {} {}", request.command, request.address);
        effects.push(Effect::Dispatch(request.clone()));
        self.request = Some(request);
        self.transition(State::Dispatched);
        Step::NeedInput
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::server::{NoAuth, UserPass};
    use crate::connection::Connection;
    use crate::socks::Command;
    use bytes::Bytes;
    use std::net::Ipv4Addr;

    fn writes(effects: &[Effect]) -> Vec<u8> {
        effects
            .iter()
            .filter_map(|e| match e {
                Effect::Write(b) => Some(b.to_vec()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    fn dispatched(effects: &[Effect]) -> Option<&Request> {
        effects.iter().find_map(|e| match e {
            Effect::Dispatch(r) => Some(r),
            _ => None,
        })
    }

    fn closed(effects: &[Effect]) -> bool {
        effects.iter().any(|e| matches!(e, Effect::Close))
    }

    fn server(handlers: ServerHandlers) -> Connection {
        Connection::server(Arc::new(handlers))
    }

    const CONNECT_LOCAL_80: [u8; 10] = [0x05, 0x01, 0x00, 0x01, 127, 0, 0, 1, 0x00, 0x50];

    #[test]
    fn test_socks5_no_auth_flow() {
        let mut conn = server(ServerHandlers::default());
        let effects = conn.feed(&[0x05, 0x01, 0x00]);
        assert_eq!(writes(&effects), vec![0x05, 0x00]);
        assert_eq!(conn.state().name(), "socks5-request");

        let effects = conn.feed(&CONNECT_LOCAL_80);
        let req = dispatched(&effects).unwrap();
        assert_eq!(req.command, Command::Connect);
        assert_eq!(req.address, Address::Ipv4(Ipv4Addr::LOCALHOST, 80));
        assert_eq!(conn.version(), Some(Version::Socks5));
    }

    #[test]
    fn test_pipelined_greeting_and_request() {
        let mut conn = server(ServerHandlers::default());
        let mut data = vec![0x05, 0x01, 0x00];
        data.extend_from_slice(&CONNECT_LOCAL_80);
        data.extend_from_slice(b"payload");

        let effects = conn.feed(&data);
        assert_eq!(writes(&effects), vec![0x05, 0x00]);
        assert!(dispatched(&effects).is_some());

        let parts = conn.into_parts();
        assert_eq!(parts.pending, Bytes::from_static(b"payload"));
    }

    #[test]
    fn test_method_preference_is_servers() {
        let mut conn = server(ServerHandlers {
            auth: vec![
                Arc::new(UserPass::new(|_, _| true)),
                Arc::new(NoAuth),
            ],
            ..Default::default()
        });
        let effects = conn.feed(&[0x05, 0x02, 0x00, 0x02]);
        assert_eq!(writes(&effects), vec![0x05, 0x02]);
        assert_eq!(conn.state().name(), "authenticating");
    }

    #[test]
    fn test_no_acceptable_method() {
        let mut conn = server(ServerHandlers {
            auth: vec![Arc::new(UserPass::new(|_, _| true))],
            ..Default::default()
        });
        let effects = conn.feed(&[0x05, 0x01, 0x00]);
        assert_eq!(writes(&effects), vec![0x05, 0xFF]);
        assert!(closed(&effects));
        assert!(conn.is_closed());
    }

    #[test]
    fn test_userpass_denied() {
        let mut conn = server(ServerHandlers {
            auth: vec![Arc::new(UserPass::new(|u, p| u == "a" && p == "b"))],
            ..Default::default()
        });
        conn.feed(&[0x05, 0x01, 0x02]);
        let effects = conn.feed(&[0x01, 0x01, b'a', 0x01, b'x']);
        assert_eq!(writes(&effects), vec![0x01, 0xFF]);
        assert!(closed(&effects));
        assert!(dispatched(&effects).is_none());
    }

    #[test]
    fn test_userpass_granted_then_request() {
        let mut conn = server(ServerHandlers {
            auth: vec![Arc::new(UserPass::new(|u, p| u == "a" && p == "b"))],
            ..Default::default()
        });
        conn.feed(&[0x05, 0x01, 0x02]);
        let mut data = vec![0x01, 0x01, b'a', 0x01, b'b'];
        data.extend_from_slice(&CONNECT_LOCAL_80);
        let effects = conn.feed(&data);
        assert_eq!(writes(&effects), vec![0x01, 0x00]);
        assert!(dispatched(&effects).is_some());
    }

    #[test]
    fn test_unknown_command_reply() {
        let mut conn = server(ServerHandlers::default());
        conn.feed(&[0x05, 0x01, 0x00]);
        let effects = conn.feed(&[0x05, 0x09, 0x00, 0x01, 127, 0, 0, 1, 0, 80]);
        let out = writes(&effects);
        assert_eq!(&out[..2], &[0x05, 0x07]);
        assert!(closed(&effects));
    }

    #[test]
    fn test_unknown_address_type_reply() {
        let mut conn = server(ServerHandlers::default());
        conn.feed(&[0x05, 0x01, 0x00]);
        let effects = conn.feed(&[0x05, 0x01, 0x00, 0x09, 0, 0]);
        assert_eq!(&writes(&effects)[..2], &[0x05, 0x08]);
        assert!(closed(&effects));
    }

    #[test]
    fn test_truncated_request_closes_silently() {
        let mut conn = server(ServerHandlers::default());
        conn.feed(&[0x05, 0x01, 0x00]);
        let effects = conn.feed(&[0x05, 0x01, 0x00, 0x01, 127]);
        assert!(writes(&effects).is_empty());
        assert!(closed(&effects));
    }

    #[test]
    fn test_disabled_version_closes() {
        let mut conn = server(ServerHandlers {
            socks4: false,
            ..Default::default()
        });
        let effects = conn.feed(b"\x04\x01\x00\x50\x7f\x00\x00\x01\x00");
        assert!(writes(&effects).is_empty());
        assert!(closed(&effects));
    }

    #[test]
    fn test_socks4_dispatch() {
        let mut conn = server(ServerHandlers::default());
        let effects = conn.feed(b"\x04\x01\x00\x50\x7f\x00\x00\x01alice\x00");
        let req = dispatched(&effects).unwrap();
        assert_eq!(req.version, Version::Socks4);
        assert_eq!(req.user_id.as_deref(), Some("alice"));
    }

    #[test]
    fn test_socks4_ident_fail_open() {
        let mut conn = server(ServerHandlers {
            ident: Some(Arc::new(|user: &str| user == "alice")),
            ..Default::default()
        });
        let effects = conn.feed(b"\x04\x01\x00\x50\x7f\x00\x00\x01mallory\x00");
        assert_eq!(&writes(&effects)[..2], &[0x00, 0x5C]);
        assert!(dispatched(&effects).is_some());
        assert!(!closed(&effects));
    }

    #[test]
    fn test_socks4_ident_failure_closes_when_configured() {
        let mut conn = server(ServerHandlers {
            ident: Some(Arc::new(|user: &str| user == "alice")),
            ident_failure_closes: true,
            ..Default::default()
        });
        let effects = conn.feed(b"\x04\x01\x00\x50\x7f\x00\x00\x01mallory\x00");
        assert_eq!(&writes(&effects)[..2], &[0x00, 0x5C]);
        assert!(dispatched(&effects).is_none());
        assert!(closed(&effects));
    }

    #[test]
    fn test_socks4_associate_is_dispatched() {
        let mut conn = server(ServerHandlers::default());
        let effects = conn.feed(b"\x04\x03\x00\x50\x7f\x00\x00\x01\x00");
        let req = dispatched(&effects).unwrap();
        assert_eq!(req.command, Command::Associate);
        assert_eq!(req.version, Version::Socks4);
        assert!(writes(&effects).is_empty());
        assert!(!closed(&effects));
    }

    #[test]
    fn test_socks4_unknown_command_rejected() {
        let mut conn = server(ServerHandlers::default());
        let effects = conn.feed(b"\x04\x09\x00\x50\x7f\x00\x00\x01\x00");
        assert_eq!(&writes(&effects)[..2], &[0x00, 0x5B]);
        assert!(closed(&effects));
    }

    #[test]
    fn test_greeting_alone_waits_for_request() {
        let mut conn = server(ServerHandlers::default());
        let effects = conn.feed(&[0x05, 0x01, 0x00]);
        assert_eq!(writes(&effects), vec![0x05, 0x00]);
        assert!(!closed(&effects));
        assert!(!conn.is_closed());
        assert_eq!(conn.state().name(), "socks5-request");

        let effects = conn.feed(&CONNECT_LOCAL_80);
        assert!(dispatched(&effects).is_some());
        assert!(writes(&effects).is_empty());
        assert_eq!(conn.state().name(), "dispatched");
    }

    #[test]
    fn test_userpass_in_separate_reads() {
        let mut conn = server(ServerHandlers {
            auth: vec![Arc::new(UserPass::new(|u, p| u == "a" && p == "b"))],
            ..Default::default()
        });
        let effects = conn.feed(&[0x05, 0x01, 0x02]);
        assert_eq!(writes(&effects), vec![0x05, 0x02]);
        assert!(!closed(&effects));
        assert_eq!(conn.state().name(), "authenticating");

        let effects = conn.feed(&[0x01, 0x01, b'a', 0x01, b'b']);
        assert_eq!(writes(&effects), vec![0x01, 0x00]);
        assert!(!closed(&effects));
        assert_eq!(conn.state().name(), "socks5-request");

        let effects = conn.feed(&CONNECT_LOCAL_80);
        let req = dispatched(&effects).unwrap();
        assert_eq!(req.address, Address::Ipv4(Ipv4Addr::LOCALHOST, 80));
    }

    #[test]
    fn test_partial_http_request_line_waits() {
        let mut conn = server(ServerHandlers {
            obfs: vec![obfs::http("/")],
            ..Default::default()
        });
        let wire = obfs::http("/")(Role::Client).obfuscate(&[0x05, 0x01, 0x00]);
        let effects = conn.feed(&wire[..6]);
        assert!(!closed(&effects));
        assert_eq!(conn.state().name(), "obfs-detect");

        let effects = conn.feed(&wire[6..]);
        assert_eq!(conn.obfs_name(), "http");
        assert!(writes(&effects).ends_with(&[0x05, 0x00]));
    }

    #[test]
    fn test_http_obfs_detected() {
        let mut conn = server(ServerHandlers {
            obfs: vec![obfs::http("/")],
            ..Default::default()
        });
        let client = obfs::http("/")(Role::Client);
        let effects = conn.feed(&client.obfuscate(&[0x05, 0x01, 0x00]));
        assert_eq!(conn.obfs_name(), "http");
        let out = writes(&effects);
        assert!(out.starts_with(b"HTTP/1.1 200 OK\r\n"));
        assert!(out.ends_with(&[0x05, 0x00]));
    }

    #[test]
    fn test_unmatched_obfs_terminates() {
        let mut conn = server(ServerHandlers::default());
        let effects = conn.feed(b"GET / HTTP/1.1\r\n\r\n");
        assert!(closed(&effects));
        assert!(writes(&effects).is_empty());
    }
}
