//! Wire encodings for [`SyncMessage`].

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{SyncError, SyncMessage};

/// Encoding used on a connection. Both peers must agree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireCodec {
    /// MessagePack with named fields (compact, binary changes)
    #[default]
    MessagePack,
    /// JSON (human-readable, base64 changes)
    Json,
}

impl WireCodec {
    /// Encode a message.
    pub fn encode(self, message: &SyncMessage) -> Result<Vec<u8>, SyncError> {
        match self {
            Self::MessagePack => message.to_bytes(),
            Self::Json => message.to_json().map(String::into_bytes),
        }
    }

    /// Decode and validate a message.
    pub fn decode(self, bytes: &[u8]) -> Result<SyncMessage, SyncError> {
        match self {
            Self::MessagePack => SyncMessage::from_bytes(bytes),
            Self::Json => {
                let text = std::str::from_utf8(bytes)
                    .map_err(|e| SyncError::MalformedMessage(format!("not utf-8: {}", e)))?;
                SyncMessage::from_json(text)
            }
        }
    }
}

impl fmt::Display for WireCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MessagePack => f.write_str("messagepack"),
            Self::Json => f.write_str("json"),
        }
    }
}
