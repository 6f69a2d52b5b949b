//! Server configuration types

use super::TcpConfig;
use crate::helper::{DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_HANDSHAKE_TIMEOUT_SECS};
use serde::{Deserialize, Serialize};

fn default_listen_addr() -> String {
    "127.0.0.1:1080".to_string()
}

fn default_true() -> bool {
    true
}

fn default_handshake_timeout() -> u64 {
    DEFAULT_HANDSHAKE_TIMEOUT_SECS
}

fn default_connect_timeout() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_SECS
}

fn default_bind_max_attempts() -> u32 {
    16
}

fn default_obfs_path() -> String {
    "/".to_string()
}

/// A username/password pair for RFC 1929 authentication
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct UserConfig {
    /// Username
    pub username: String,
    /// Password
    pub password: String,
}

/// An obfuscation method offered by the server
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ObfsConfig {
    /// Method name: "none", "http" or "websocket"
    #[serde(rename = "type")]
    pub obfs_type: String,

    /// Request path used by the HTTP based disguises
    #[serde(default = "default_obfs_path")]
    pub path: String,
}

/// SOCKS server configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServerConfig {
    /// Address to listen on (e.g., "0.0.0.0:1080")
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Accept SOCKS5 clients
    #[serde(default = "default_true")]
    pub socks5: bool,

    /// Accept SOCKS4 clients
    #[serde(default = "default_true")]
    pub socks4: bool,

    /// Accounts for username/password authentication
    #[serde(default)]
    pub users: Vec<UserConfig>,

    /// Refuse clients that do not authenticate
    #[serde(default)]
    pub auth_required: bool,

    /// SOCKS4 user ids allowed through; empty accepts all
    #[serde(default)]
    pub allowed_user_ids: Vec<String>,

    /// Close SOCKS4 connections whose user id is refused
    #[serde(default)]
    pub ident_failure_closes: bool,

    /// Obfuscation methods tried after plain SOCKS
    #[serde(default)]
    pub obfs: Vec<ObfsConfig>,

    /// Handshake timeout in seconds
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout: u64,

    /// Outbound connect timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,

    /// Port allocation attempts for BIND
    #[serde(default = "default_bind_max_attempts")]
    pub bind_max_attempts: u32,

    /// Dedicated UDP relay port; defaults to the listener's port
    #[serde(default)]
    pub udp_relay_port: Option<u16>,

    /// Socket options for accepted connections
    #[serde(default)]
    pub tcp: TcpConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            listen_addr: default_listen_addr(),
            socks5: true,
            socks4: true,
            users: Vec::new(),
            auth_required: false,
            allowed_user_ids: Vec::new(),
            ident_failure_closes: false,
            obfs: Vec::new(),
            handshake_timeout: default_handshake_timeout(),
            connect_timeout: default_connect_timeout(),
            bind_max_attempts: default_bind_max_attempts(),
            udp_relay_port: None,
            tcp: TcpConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if !self.socks5 && !self.socks4 {
            return Err("At least one of socks5 / socks4 must be enabled".to_string());
        }
        if self.auth_required && self.users.is_empty() {
            return Err("Authentication required but no users configured".to_string());
        }
        if self.bind_max_attempts == 0 {
            return Err("bind_max_attempts must be at least 1".to_string());
        }
        for obfs in &self.obfs {
            if crate::obfs::from_name(&obfs.obfs_type, &obfs.path).is_none() {
                return Err(format!("Unknown obfuscation method: {}", obfs.obfs_type));
            }
        }
        Ok(())
    }
}
