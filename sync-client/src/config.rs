//! Configuration for a sync peer.
//!
//! Configuration can be loaded from a TOML file; every field has a default.
//!
//! ```toml
//! peer_name = "laptop"
//! codec = "json"
//! max_message_size = 65536
//! ```

use serde::Deserialize;
use std::path::{Path, PathBuf};

use docsync_types::WireCodec;

use crate::transport::MAX_MESSAGE_SIZE;

/// Configuration for [`SyncPeer`](crate::SyncPeer).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SyncConfig {
    /// Label for the remote peer, used in logs (default: "peer").
    #[serde(default = "default_peer_name")]
    pub peer_name: String,
    /// Wire encoding of sync messages (default: messagepack).
    #[serde(default)]
    pub codec: WireCodec,
    /// Largest encoded message accepted or sent, in bytes (default: 1MB).
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

fn default_peer_name() -> String {
    "peer".to_string()
}

fn default_max_message_size() -> usize {
    MAX_MESSAGE_SIZE
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            peer_name: default_peer_name(),
            codec: WireCodec::default(),
            max_message_size: default_max_message_size(),
        }
    }
}

impl SyncConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Set the peer label.
    pub fn with_peer_name(mut self, name: &str) -> Self {
        self.peer_name = name.to_string();
        self
    }

    /// Set the wire codec.
    pub fn with_codec(mut self, codec: WireCodec) -> Self {
        self.codec = codec;
        self
    }

    /// Set the message size limit.
    pub fn with_max_message_size(mut self, max: usize) -> Self {
        self.max_message_size = max;
        self
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
}
