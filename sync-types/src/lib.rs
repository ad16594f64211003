//! # sync-types
//!
//! Wire format types for the docsync document synchronization protocol.
//!
//! This crate provides the foundational types used across all docsync crates:
//! - [`DocumentId`], [`ActorId`] - Identity types
//! - [`VectorClock`] - Per-actor causal counters with a partial order
//! - [`Change`] - Opaque change record produced by a CRDT engine
//! - [`SyncMessage`] - The single protocol message (request, advertisement or push)
//! - [`WireCodec`] - MessagePack / JSON encodings of [`SyncMessage`]
//! - [`SyncError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod change;
mod clock;
mod codec;
mod error;
mod ids;
mod messages;

pub use change::Change;
pub use clock::VectorClock;
pub use codec::WireCodec;
pub use error::SyncError;
pub use ids::{ActorId, DocumentId};
pub use messages::{MessageRole, SyncMessage};
