//! # sync-core
//!
//! Pure logic for docsync (no I/O, instant tests).
//!
//! This crate implements the per-peer sync session: the anti-entropy
//! protocol that keeps two replicas of a CRDT document converged by
//! exchanging vector clocks and only the changes the other side lacks.
//!
//! ## Design Philosophy
//!
//! Sessions never perform I/O. Every operation takes the document store
//! explicitly and returns the [`SyncMessage`](docsync_types::SyncMessage)s
//! that should be sent to the peer. This enables:
//! - Instant unit tests (no mocks, no async)
//! - Deterministic behavior (same input → same output)
//! - Serialization by construction: each call runs to completion under `&mut`
//!
//! The actual transmission is performed by `sync-client`, which sends the
//! returned messages over a transport.
//!
//! The CRDT engine and the document store are collaborators described by the
//! [`CrdtEngine`] and [`DocumentStore`] traits. [`memory`] provides an
//! in-memory store and a small op-log engine implementing them.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod clock_store;
pub mod memory;
pub mod session;
pub mod store;

pub use clock_store::{ClockKind, ClockStore};
pub use memory::{ChangeRecord, MemoryRepo, Op, OpLog, OpLogEngine};
pub use session::{DocumentFailure, Outcome, Received, SessionError, SessionState, SyncSession};
pub use store::{
    CrdtEngine, DocumentOf, DocumentStore, EngineError, StoreError, SubscriptionId,
};
