//! Server-side authentication methods

use super::{AuthDecision, ServerAuthMethod};
use crate::codec::Readable;
use crate::error::CodecError;
use crate::socks::consts::*;
use bytes::Bytes;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// No authentication required
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAuth;

impl ServerAuthMethod for NoAuth {
    fn method(&self) -> u8 {
        SOCKS5_AUTH_METHOD_NONE
    }

    fn has_subnegotiation(&self) -> bool {
        false
    }

    fn authenticate(&self, _input: &mut Readable<'_>) -> Result<AuthDecision, CodecError> {
        Ok(AuthDecision::Granted { reply: None })
    }
}

/// Credential predicate for [`UserPass`]
pub type CredentialCheck = Arc<dyn Fn(&str, &str) -> bool + Send + Sync>;

/// Username/password authentication (RFC 1929)
///
/// Client sends:
/// ```text
/// +----+------+----------+------+----------+
/// |VER | ULEN |  UNAME   | PLEN |  PASSWD  |
/// +----+------+----------+------+----------+
/// | 1  |  1   | 1 to 255 |  1   | 1 to 255 |
/// +----+------+----------+------+----------+
/// ```
///
/// Server responds with `VER | STATUS`, `0x00` meaning success.
#[derive(Clone)]
pub struct UserPass {
    check: CredentialCheck,
}

impl UserPass {
    /// Authenticate with an arbitrary predicate
    pub fn new<F>(check: F) -> Self
    where
        F: Fn(&str, &str) -> bool + Send + Sync + 'static,
    {
        UserPass {
            check: Arc::new(check),
        }
    }

    /// Authenticate against a fixed username -> password table
    pub fn with_users(users: HashMap<String, String>) -> Self {
        Self::new(move |user, pass| users.get(user).is_some_and(|p| p == pass))
    }

    fn status(status: u8) -> Bytes {
        Bytes::copy_from_slice(&[SOCKS5_AUTH_VERSION, status])
    }
}

impl fmt::Debug for UserPass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserPass").finish_non_exhaustive()
    }
}

impl ServerAuthMethod for UserPass {
    fn method(&self) -> u8 {
        SOCKS5_AUTH_METHOD_PASSWORD
    }

    fn authenticate(&self, input: &mut Readable<'_>) -> Result<AuthDecision, CodecError> {
        let version = input.read_u8()?;
        let ulen = input.read_u8()? as usize;
        let username = input.read(ulen)?;
        let plen = input.read_u8()? as usize;
        let password = input.read(plen)?;

        if version != SOCKS5_AUTH_VERSION {
            return Ok(AuthDecision::Denied {
                reply: Self::status(SOCKS5_AUTH_FAILURE),
            });
        }

        let username = String::from_utf8_lossy(username);
        let password = String::from_utf8_lossy(password);
        if (self.check)(&username, &password) {
            Ok(AuthDecision::Granted {
                reply: Some(Self::status(SOCKS5_AUTH_SUCCESS)),
            })
        } else {
            Ok(AuthDecision::Denied {
                reply: Self::status(SOCKS5_AUTH_FAILURE),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credentials(user: &str, pass: &str) -> Vec<u8> {
        let mut buf = vec![SOCKS5_AUTH_VERSION, user.len() as u8];
        buf.extend_from_slice(user.as_bytes());
        buf.push(pass.len() as u8);
        buf.extend_from_slice(pass.as_bytes());
        buf
    }

    #[test]
    fn test_no_auth() {
        let mut r = Readable::new(b"");
        assert!(!NoAuth.has_subnegotiation());
        assert_eq!(
            NoAuth.authenticate(&mut r).unwrap(),
            AuthDecision::Granted { reply: None }
        );
    }

    #[test]
    fn test_userpass_success() {
        let auth = UserPass::new(|u, p| u == "tsocks" && p == "tsocks");
        let buf = credentials("tsocks", "tsocks");
        let mut r = Readable::new(&buf);
        assert_eq!(
            auth.authenticate(&mut r).unwrap(),
            AuthDecision::Granted {
                reply: Some(Bytes::from_static(&[0x01, 0x00]))
            }
        );
        assert!(r.is_empty());
    }

    #[test]
    fn test_userpass_failure() {
        let mut users = HashMap::new();
        users.insert("alice".to_string(), "secret".to_string());
        let auth = UserPass::with_users(users);
        let buf = credentials("alice", "wrong");
        let mut r = Readable::new(&buf);
        assert_eq!(
            auth.authenticate(&mut r).unwrap(),
            AuthDecision::Denied {
                reply: Bytes::from_static(&[0x01, 0xFF])
            }
        );
    }

    #[test]
    fn test_userpass_truncated() {
        let auth = UserPass::new(|_, _| true);
        let mut r = Readable::new(&[0x01, 0x05, b'a']);
        assert!(matches!(
            auth.authenticate(&mut r),
            Err(CodecError::Truncated { .. })
        ));
    }
}
