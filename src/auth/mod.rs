//! SOCKS5 authentication
//!
//! Authentication methods for both ends of the method-negotiation
//! sub-protocol. Methods are plain trait objects held in an ordered list;
//! the server walks its own list in preference order and picks the first
//! entry the client offered, the client runs whichever of its methods the
//! server chose.
//!
//! Methods never touch the socket: they read from a [`Readable`] over the
//! buffered bytes and hand back what to write, so the connection state
//! machine stays free of I/O.

pub mod client;
pub mod server;

use crate::codec::Readable;
use crate::error::CodecError;
use bytes::Bytes;
use std::sync::Arc;

/// Result of a server-side credential check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthDecision {
    /// Proceed to the request phase after writing `reply`
    Granted {
        /// Status message, if the method has one
        reply: Option<Bytes>,
    },
    /// Write `reply` and close
    Denied {
        /// Failure status message
        reply: Bytes,
    },
}

/// Server side of an authentication method
pub trait ServerAuthMethod: Send + Sync {
    /// Method id advertised during negotiation
    fn method(&self) -> u8;

    /// Whether the method exchanges messages after being selected
    fn has_subnegotiation(&self) -> bool {
        true
    }

    /// Parse the client's credentials and decide
    fn authenticate(&self, input: &mut Readable<'_>) -> Result<AuthDecision, CodecError>;
}

/// Client side of an authentication method
pub trait ClientAuthMethod: Send + Sync {
    /// Method id offered during negotiation
    fn method(&self) -> u8;

    /// Whether the method exchanges messages after being selected
    fn has_subnegotiation(&self) -> bool {
        true
    }

    /// First sub-negotiation message, sent once the server picks this method
    fn begin(&self) -> Option<Bytes> {
        None
    }

    /// Parse the server's status message; `true` means authenticated
    fn verify(&self, input: &mut Readable<'_>) -> Result<bool, CodecError>;
}

/// Pick the first server method the client also offered
pub fn select_method(
    server: &[Arc<dyn ServerAuthMethod>],
    offered: &[u8],
) -> Option<Arc<dyn ServerAuthMethod>> {
    server
        .iter()
        .find(|m| offered.contains(&m.method()))
        .cloned()
}

/// Find the client method matching the server's choice
pub fn find_method(
    client: &[Arc<dyn ClientAuthMethod>],
    chosen: u8,
) -> Option<Arc<dyn ClientAuthMethod>> {
    client.iter().find(|m| m.method() == chosen).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(u8);

    impl ServerAuthMethod for Fixed {
        fn method(&self) -> u8 {
            self.0
        }

        fn authenticate(&self, _input: &mut Readable<'_>) -> Result<AuthDecision, CodecError> {
            Ok(AuthDecision::Granted { reply: None })
        }
    }

    #[test]
    fn test_select_prefers_server_order() {
        let server: Vec<Arc<dyn ServerAuthMethod>> =
            vec![Arc::new(Fixed(0x0A)), Arc::new(Fixed(0x0B))];
        let chosen = select_method(&server, &[0x0B, 0x0C]).unwrap();
        assert_eq!(chosen.method(), 0x0B);

        let chosen = select_method(&server, &[0x0B, 0x0A]).unwrap();
        assert_eq!(chosen.method(), 0x0A);
    }

    #[test]
    fn test_select_disjoint() {
        let server: Vec<Arc<dyn ServerAuthMethod>> = vec![Arc::new(Fixed(0x02))];
        assert!(select_method(&server, &[0x00]).is_none());
        assert!(select_method(&server, &[]).is_none());
    }

    #[test]
    fn test_find_client_method() {
        let client: Vec<Arc<dyn ClientAuthMethod>> = vec![
            Arc::new(client::NoAuth),
            Arc::new(client::UserPass::new("u", "p")),
        ];
        assert_eq!(find_method(&client, 0x02).unwrap().method(), 0x02);
        assert!(find_method(&client, 0x01).is_none());
    }
}
