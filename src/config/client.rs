//! Client configuration types

use super::ObfsConfig;
use serde::{Deserialize, Serialize};

fn default_version() -> u8 {
    5
}

/// Default request timeout in seconds
fn default_request_timeout() -> u64 {
    10
}

/// Proxy client configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ClientConfig {
    /// Proxy address (e.g., "proxy.example.com:1080")
    pub proxy_addr: String,

    /// SOCKS version: 4 or 5
    #[serde(default = "default_version")]
    pub version: u8,

    /// Username for RFC 1929 authentication
    #[serde(default)]
    pub username: Option<String>,

    /// Password for RFC 1929 authentication
    #[serde(default)]
    pub password: Option<String>,

    /// SOCKS4 user id
    #[serde(default)]
    pub user_id: Option<String>,

    /// Obfuscation method
    #[serde(default)]
    pub obfs: Option<ObfsConfig>,

    /// Handshake timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,
}

impl ClientConfig {
    /// Check if authentication credentials are configured
    pub fn has_credentials(&self) -> bool {
        self.username.is_some() && self.password.is_some()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.version != 4 && self.version != 5 {
            return Err(format!("Unsupported SOCKS version: {}", self.version));
        }
        if self.username.is_some() != self.password.is_some() {
            return Err("username and password must be set together".to_string());
        }
        if let Some(obfs) = &self.obfs {
            if crate::obfs::from_name(&obfs.obfs_type, &obfs.path).is_none() {
                return Err(format!("Unknown obfuscation method: {}", obfs.obfs_type));
            }
        }
        Ok(())
    }
}
