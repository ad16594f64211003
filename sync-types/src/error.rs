//! Error types for docsync wire handling.

use thiserror::Error;

/// Errors that can occur while encoding, decoding or validating sync messages.
#[derive(Debug, Error)]
pub enum SyncError {
    /// MessagePack serialization failed
    #[error("serialization failed: {0}")]
    Serialization(#[source] rmp_serde::encode::Error),

    /// MessagePack deserialization failed
    #[error("deserialization failed: {0}")]
    Deserialization(#[source] rmp_serde::decode::Error),

    /// JSON encoding or decoding failed
    #[error("json error: {0}")]
    Json(#[source] serde_json::Error),

    /// A required field was missing or invalid
    #[error("malformed message: {0}")]
    MalformedMessage(String),
}
