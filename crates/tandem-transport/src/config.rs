//! Transport tuning knobs, loadable from TOML.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tandem_protocol::DEFAULT_MAX_FRAME_LEN;
use thiserror::Error;

/// Errors that can occur while loading a [`TransportConfig`]
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),
}

/// Settings shared by the client and server transports.
///
/// Missing fields fall back to their defaults, so an empty document is a
/// valid configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Period of keep-alive frames while connected. `0` sends none.
    pub keep_alive_interval_ms: u64,
    /// Keep-alive periods of silence after which the peer is declared dead.
    /// `0` disables dead-peer detection.
    pub missed_keep_alive_limit: u32,
    pub connect_timeout_ms: u64,
    /// Bytes requested per socket read.
    pub read_buffer_size: usize,
    /// Largest frame body accepted from the peer.
    pub max_frame_len: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            keep_alive_interval_ms: 500,
            missed_keep_alive_limit: 6,
            connect_timeout_ms: 5_000,
            read_buffer_size: 4096,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}

impl TransportConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Load from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Keep-alive period, `None` when keep-alives are disabled.
    pub fn keep_alive_interval(&self) -> Option<Duration> {
        (self.keep_alive_interval_ms > 0).then(|| Duration::from_millis(self.keep_alive_interval_ms))
    }

    /// Silence after which a connection is torn down with `PeerTimedOut`.
    pub fn dead_peer_timeout(&self) -> Option<Duration> {
        let interval = self.keep_alive_interval()?;
        (self.missed_keep_alive_limit > 0).then(|| interval * self.missed_keep_alive_limit)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}
