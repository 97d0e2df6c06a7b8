//! Configuration system for Encore.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $ENCORE_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/encore/config.toml
//!   3. ~/.config/encore/config.toml
//!
//! The roster is static. Every node must run with the same roster or the
//! brokers will not agree on who is responsible for what.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::message::NodeInfo;
use crate::ring::RING_SIZE;
use crate::wire::MAX_CHUNK_SIZE;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoreConfig {
    pub roster: RosterConfig,
    pub ring: RingConfig,
    pub rpc: RpcConfig,
    pub retry: RetryConfig,
    pub publisher: PublisherConfig,
    pub consumer: ConsumerConfig,
}

/// One `(address, port)` slot of a roster. Its position in the list is the
/// node's index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub address: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RosterConfig {
    pub brokers: Vec<Endpoint>,
    pub publishers: Vec<Endpoint>,
    /// Index of the broker every publisher and consumer contacts first.
    pub bootstrap_broker: usize,
    /// Index of the broker that fans ownership data out to its peers.
    pub metadata_leader: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RingConfig {
    /// Number of ring positions.
    pub size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    /// Bound on connection establishment for every outbound call.
    pub connect_timeout_ms: u64,
    /// Bound on the whole broker → publisher proxy call.
    pub proxy_timeout_ms: u64,
    /// Bound on reading one inbound request frame.
    pub request_read_timeout_ms: u64,
    /// Connections a listener serves at once. Further connections wait in
    /// the accept backlog.
    pub max_connections: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// 0 = retry until it works.
    pub max_attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PublisherConfig {
    /// Directory scanned for media files. Tags come from the files
    /// themselves, or from a `.json` sidecar for files without any.
    pub media_dir: PathBuf,
    /// Chunk size in bytes. Clamped to `1..=MAX_CHUNK_SIZE` on load.
    pub chunk_size: usize,
    /// Split every requested song once and serve later parts from memory,
    /// instead of mapping the file for each part.
    pub precompute_chunks: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    pub download_dir: PathBuf,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

/// Default chunk size: 512 000 bytes.
pub const DEFAULT_CHUNK_SIZE: usize = 512_000;

impl Default for RosterConfig {
    fn default() -> Self {
        Self {
            brokers: [6000, 6001, 6002]
                .into_iter()
                .map(|port| Endpoint::new("localhost", port))
                .collect(),
            publishers: [7000, 7001]
                .into_iter()
                .map(|port| Endpoint::new("localhost", port))
                .collect(),
            bootstrap_broker: 0,
            metadata_leader: 0,
        }
    }
}

impl Default for RingConfig {
    fn default() -> Self {
        Self { size: RING_SIZE }
    }
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 2_000,
            proxy_timeout_ms: 10_000,
            request_read_timeout_ms: 30_000,
            max_connections: 256,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 100,
            max_backoff_ms: 5_000,
            max_attempts: 0,
        }
    }
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            media_dir: PathBuf::from("data"),
            chunk_size: DEFAULT_CHUNK_SIZE,
            precompute_chunks: false,
        }
    }
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            download_dir: data_dir().join("downloads"),
        }
    }
}

// ── Roster helpers ────────────────────────────────────────────────────────────

fn nodes(endpoints: &[Endpoint]) -> Vec<NodeInfo> {
    endpoints
        .iter()
        .enumerate()
        .map(|(i, e)| NodeInfo::new(e.address.clone(), e.port, i as u32))
        .collect()
}

impl RosterConfig {
    pub fn broker_nodes(&self) -> Vec<NodeInfo> {
        nodes(&self.brokers)
    }

    pub fn publisher_nodes(&self) -> Vec<NodeInfo> {
        nodes(&self.publishers)
    }

    pub fn bootstrap(&self) -> Option<NodeInfo> {
        self.broker_nodes().into_iter().nth(self.bootstrap_broker)
    }
}

impl PublisherConfig {
    /// Keep `chunk_size` within what one `Chunk` frame can carry.
    fn clamp_chunk_size(&mut self) {
        let clamped = self.chunk_size.clamp(1, MAX_CHUNK_SIZE);
        if clamped != self.chunk_size {
            tracing::warn!(
                configured = self.chunk_size,
                using = clamped,
                max = MAX_CHUNK_SIZE,
                "publisher.chunk_size out of range"
            );
            self.chunk_size = clamped;
        }
    }
}

impl RpcConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn proxy_timeout(&self) -> Duration {
        Duration::from_millis(self.proxy_timeout_ms)
    }

    pub fn request_read_timeout(&self) -> Duration {
        Duration::from_millis(self.request_read_timeout_ms)
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("encore")
}

pub fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".local").join("share"))
        .join("encore")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl EncoreConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::load_file(&Self::file_path())?;
        config.apply_env_overrides();
        config.publisher.clamp_chunk_size();
        Ok(config)
    }

    /// Parse one config file. A missing file yields defaults.
    pub fn load_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(EncoreConfig::default());
        }
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        let mut config: EncoreConfig =
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))?;
        config.publisher.clamp_chunk_size();
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("ENCORE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Apply ENCORE_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("ENCORE_PUBLISHER__MEDIA_DIR") {
            self.publisher.media_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("ENCORE_PUBLISHER__CHUNK_SIZE") {
            if let Ok(n) = v.parse::<usize>() {
                self.publisher.chunk_size = n;
            }
        }
        if let Ok(v) = std::env::var("ENCORE_RPC__CONNECT_TIMEOUT_MS") {
            if let Ok(ms) = v.parse() {
                self.rpc.connect_timeout_ms = ms;
            }
        }
        if let Ok(v) = std::env::var("ENCORE_RETRY__MAX_ATTEMPTS") {
            if let Ok(n) = v.parse() {
                self.retry.max_attempts = n;
            }
        }
        if let Ok(v) = std::env::var("ENCORE_CONSUMER__DOWNLOAD_DIR") {
            self.consumer.download_dir = PathBuf::from(v);
        }
    }
}
