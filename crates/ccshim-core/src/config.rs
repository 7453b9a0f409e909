//! Configuration for a chaincode process.
//!
//! Resolution order: environment variables → config file → defaults.
//! The value is built once at startup and passed by reference from then on.
//!
//! Config file location:
//!   1. $CCSHIM_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/ccshim/config.toml
//!   3. ~/.config/ccshim/config.toml

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::wire::DEFAULT_MAX_MESSAGE_BYTES;

/// Default local address for listen mode.
pub const DEFAULT_LISTEN_ADDRESS: &str = "127.0.0.1:7070";

/// Environment variable names read by `apply_env_overrides`.
pub mod env {
    pub const CONFIG: &str = "CCSHIM_CONFIG";
    pub const CHAINCODE_ID_NAME: &str = "CORE_CHAINCODE_ID_NAME";
    pub const PEER_ADDRESS: &str = "CORE_PEER_ADDRESS";
    pub const LISTEN_ADDRESS: &str = "CHAINCODE_SERVER_ADDRESS";
    pub const TLS_ENABLED: &str = "CORE_PEER_TLS_ENABLED";
    pub const TLS_CLIENT_KEY_PATH: &str = "CORE_TLS_CLIENT_KEY_PATH";
    pub const TLS_CLIENT_CERT_PATH: &str = "CORE_TLS_CLIENT_CERT_PATH";
    pub const TLS_ROOT_CERT_FILE: &str = "CORE_PEER_TLS_ROOTCERT_FILE";
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ShimConfig {
    pub chaincode: ChaincodeConfig,
    pub peer: PeerConfig,
    pub server: ServerConfig,
    pub wire: WireConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChaincodeConfig {
    /// Logical chaincode name sent in REGISTER. Required.
    pub id_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerConfig {
    /// Peer to dial. Empty = listen for the peer instead.
    pub address: String,
    pub dial_timeout_secs: u64,
    pub tls: TlsConfig,
    pub keepalive: KeepaliveConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    pub enabled: bool,
    /// File holding the base64-encoded PEM client key.
    pub client_key_path: Option<PathBuf>,
    /// File holding the base64-encoded PEM client certificate.
    pub client_cert_path: Option<PathBuf>,
    /// PEM root certificate used to verify the peer.
    pub root_cert_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeepaliveConfig {
    /// Idle time before the first keepalive packet.
    pub interval_secs: u64,
    /// Time between unanswered keepalive packets.
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Local address used when no peer address is configured.
    pub listen_address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WireConfig {
    pub max_message_bytes: usize,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            address: String::new(),
            dial_timeout_secs: 10,
            tls: TlsConfig::default(),
            keepalive: KeepaliveConfig::default(),
        }
    }
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            timeout_secs: 20,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: DEFAULT_LISTEN_ADDRESS.to_string(),
        }
    }
}

impl Default for WireConfig {
    fn default() -> Self {
        Self {
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

pub type EnvLookup<'a> = &'a dyn Fn(&str) -> Option<String>;

fn config_dir(vars: EnvLookup<'_>) -> PathBuf {
    vars("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            vars("HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("/tmp"))
                .join(".config")
        })
        .join("ccshim")
}

/// Lookup backed by the real process environment.
pub fn process_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

fn flag(v: &str) -> bool {
    v == "true" || v == "1"
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("'{}' must be set", env::CHAINCODE_ID_NAME)]
    MissingIdentity,
    #[error("peer address must be set to dial the peer")]
    MissingPeerAddress,
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("invalid address {0:?}: {1}")]
    InvalidAddress(String, String),
    #[error("tls: {0}")]
    Tls(String),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl ShimConfig {
    /// Load config from the process environment: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with(&process_env)
    }

    /// Same as `load` with an explicit variable lookup.
    pub fn load_with(vars: EnvLookup<'_>) -> Result<Self, ConfigError> {
        let path = Self::file_path(vars);
        let mut config = if path.exists() {
            Self::from_file(&path)?
        } else {
            ShimConfig::default()
        };
        config.apply_env_overrides(vars);
        Ok(config)
    }

    /// Parse a config file without applying any overrides.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))
    }

    /// Config file path.
    pub fn file_path(vars: EnvLookup<'_>) -> PathBuf {
        vars(env::CONFIG)
            .map(PathBuf::from)
            .unwrap_or_else(|| config_dir(vars).join("config.toml"))
    }

    /// Apply the peer-provided environment on top of file values.
    pub fn apply_env_overrides(&mut self, vars: EnvLookup<'_>) {
        if let Some(v) = vars(env::CHAINCODE_ID_NAME) {
            self.chaincode.id_name = v;
        }
        if let Some(v) = vars(env::PEER_ADDRESS) {
            self.peer.address = v;
        }
        if let Some(v) = vars(env::LISTEN_ADDRESS) {
            self.server.listen_address = v;
        }
        if let Some(v) = vars(env::TLS_ENABLED) {
            self.peer.tls.enabled = flag(&v);
        }
        if let Some(v) = vars(env::TLS_CLIENT_KEY_PATH) {
            self.peer.tls.client_key_path = Some(PathBuf::from(v));
        }
        if let Some(v) = vars(env::TLS_CLIENT_CERT_PATH) {
            self.peer.tls.client_cert_path = Some(PathBuf::from(v));
        }
        if let Some(v) = vars(env::TLS_ROOT_CERT_FILE) {
            self.peer.tls.root_cert_path = Some(PathBuf::from(v));
        }
    }

    /// The chaincode name exactly as configured, or `MissingIdentity` when
    /// it is empty or only whitespace.
    pub fn identity(&self) -> Result<&str, ConfigError> {
        if self.chaincode.id_name.trim().is_empty() {
            return Err(ConfigError::MissingIdentity);
        }
        Ok(&self.chaincode.id_name)
    }

    /// Peer address if dial mode is configured.
    pub fn peer_address(&self) -> Option<&str> {
        match self.peer.address.trim() {
            "" => None,
            addr => Some(addr),
        }
    }
}
