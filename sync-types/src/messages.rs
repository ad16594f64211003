//! The docsync protocol message.
//!
//! There is exactly one message shape. Its role is derived from which
//! fields are populated:
//!
//! | clock | changes       | role                              |
//! |-------|---------------|-----------------------------------|
//! | yes   | absent/empty  | request (or advertisement if `{}`)|
//! | yes   | non-empty     | push                              |
//! | no    | -             | invalid                           |
//!
//! Decoding goes through an unvalidated wire form first, so a message that
//! lacks `documentId` or `clock` is rejected as a whole before any session
//! state is touched.

use serde::{Deserialize, Serialize};

use crate::{Change, DocumentId, SyncError, VectorClock};

/// A validated sync message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "WireSyncMessage")]
pub struct SyncMessage {
    /// Target document
    pub document_id: DocumentId,
    /// Sender's clock snapshot (empty for an advertisement)
    pub clock: VectorClock,
    /// Ordered change records, present only when pushing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changes: Option<Vec<Change>>,
}

/// What a message asks of its receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageRole {
    /// No changes: tells the peer our clock and asks for anything newer.
    Request,
    /// Carries changes to apply.
    Push,
}

impl SyncMessage {
    /// A changes-less message carrying `clock`.
    pub fn request(document_id: DocumentId, clock: VectorClock) -> Self {
        Self {
            document_id,
            clock,
            changes: None,
        }
    }

    /// A changes-less message carrying the empty clock.
    pub fn advertise(document_id: DocumentId) -> Self {
        Self::request(document_id, VectorClock::new())
    }

    /// A message carrying changes plus the sender's full clock.
    pub fn push(document_id: DocumentId, clock: VectorClock, changes: Vec<Change>) -> Self {
        Self {
            document_id,
            clock,
            changes: Some(changes),
        }
    }

    /// Role derived from field presence.
    pub fn role(&self) -> MessageRole {
        if self.changes().is_empty() {
            MessageRole::Request
        } else {
            MessageRole::Push
        }
    }

    /// The carried changes; empty when absent.
    pub fn changes(&self) -> &[Change] {
        self.changes.as_deref().unwrap_or(&[])
    }

    /// Serialize to MessagePack bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, SyncError> {
        rmp_serde::to_vec_named(self).map_err(SyncError::Serialization)
    }

    /// Deserialize and validate from MessagePack bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SyncError> {
        let wire: WireSyncMessage =
            rmp_serde::from_slice(bytes).map_err(SyncError::Deserialization)?;
        Self::try_from(wire)
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String, SyncError> {
        serde_json::to_string(self).map_err(SyncError::Json)
    }

    /// Deserialize and validate from JSON.
    pub fn from_json(json: &str) -> Result<Self, SyncError> {
        let wire: WireSyncMessage = serde_json::from_str(json).map_err(SyncError::Json)?;
        Self::try_from(wire)
    }
}

/// Unvalidated message as it appears on the wire.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireSyncMessage {
    document_id: Option<DocumentId>,
    clock: Option<VectorClock>,
    #[serde(default)]
    changes: Option<Vec<Change>>,
}

impl TryFrom<WireSyncMessage> for SyncMessage {
    type Error = SyncError;

    fn try_from(wire: WireSyncMessage) -> Result<Self, Self::Error> {
        let document_id = wire
            .document_id
            .ok_or_else(|| SyncError::MalformedMessage("missing documentId".into()))?;
        if document_id.is_empty() {
            return Err(SyncError::MalformedMessage("empty documentId".into()));
        }
        let clock = wire
            .clock
            .ok_or_else(|| SyncError::MalformedMessage("missing clock".into()))?;

        Ok(Self {
            document_id,
            clock,
            changes: wire.changes,
        })
    }
}
