//! # sync-client
//!
//! Async driver for docsync.
//!
//! This is the library applications use to keep a document store in sync
//! with remote peers.
//!
//! ## Features
//!
//! - **One session per peer**: [`SyncPeer`] owns a `sync-core` session and
//!   performs the I/O it asks for
//! - **Shared store**: several peers sync one [`SharedRepo`]
//! - **Transport abstraction**: pluggable transport layer (in-memory, mock)
//! - **Configurable wire codec**: MessagePack or JSON
//!
//! ## Example
//!
//! ```ignore
//! use docsync_client::{MemoryTransport, SharedRepo, SyncConfig, SyncPeer};
//! use docsync_core::MemoryRepo;
//!
//! let repo = SharedRepo::new(MemoryRepo::default());
//! let (local, remote) = MemoryTransport::pair();
//! let peer = SyncPeer::new(SyncConfig::default(), repo.clone(), local);
//!
//! peer.open().await?;
//! peer.run().await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod config;
pub mod transport;

pub use client::{ClientError, SharedRepo, SyncPeer};
pub use config::{ConfigError, SyncConfig};
pub use transport::{MemoryTransport, MockTransport, Transport, TransportError, MAX_MESSAGE_SIZE};
