//! Transport abstraction for docsync.
//!
//! A transport carries opaque encoded sync messages between exactly two
//! peers. Message boundaries are preserved; ordering and retries are up to
//! the implementation. The sync protocol tolerates loss and duplication, so
//! a transport need not be reliable.
//!
//! # Example
//!
//! ```ignore
//! let (left, right) = MemoryTransport::pair();
//! left.send(&bytes).await?;
//! let received = right.recv().await?;
//! ```

mod memory;
mod mock;

pub use memory::MemoryTransport;
pub use mock::MockTransport;

use async_trait::async_trait;
use thiserror::Error;

/// Default upper bound on an encoded message (1 MB).
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Not connected.
    #[error("not connected")]
    NotConnected,

    /// Connection closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// Send failed.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Receive failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(String),
}

/// Transport trait for sending and receiving sync protocol messages.
///
/// `recv` must be cancel-safe: the peer driver races it against local
/// change signals.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one encoded message.
    async fn send(&self, data: &[u8]) -> Result<(), TransportError>;

    /// Receive one encoded message.
    ///
    /// Blocks until data is available. Returns
    /// [`TransportError::ConnectionClosed`] once the other side is gone.
    async fn recv(&self) -> Result<Vec<u8>, TransportError>;

    /// Check if currently connected.
    fn is_connected(&self) -> bool;

    /// Close the connection gracefully.
    async fn close(&self) -> Result<(), TransportError>;
}
