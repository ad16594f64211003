//! In-process transport over tokio channels.

use super::{Transport, TransportError};
use async_trait::async_trait;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;

type Frame = Vec<u8>;

/// One end of an in-memory connection.
///
/// Created in connected pairs by [`MemoryTransport::pair`]. Closing one end
/// ends the other end's `recv` with [`TransportError::ConnectionClosed`]
/// once the frames already in flight have been read.
#[derive(Debug)]
pub struct MemoryTransport {
    outbound: Mutex<Option<mpsc::UnboundedSender<Frame>>>,
    inbound: tokio::sync::Mutex<mpsc::UnboundedReceiver<Frame>>,
}

impl MemoryTransport {
    /// Create two connected ends.
    pub fn pair() -> (Self, Self) {
        let (left_tx, right_rx) = mpsc::unbounded_channel();
        let (right_tx, left_rx) = mpsc::unbounded_channel();
        (Self::new(left_tx, left_rx), Self::new(right_tx, right_rx))
    }

    fn new(outbound: mpsc::UnboundedSender<Frame>, inbound: mpsc::UnboundedReceiver<Frame>) -> Self {
        Self {
            outbound: Mutex::new(Some(outbound)),
            inbound: tokio::sync::Mutex::new(inbound),
        }
    }

    fn outbound(&self) -> MutexGuard<'_, Option<mpsc::UnboundedSender<Frame>>> {
        self.outbound.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        let outbound = self.outbound();
        let tx = outbound.as_ref().ok_or(TransportError::NotConnected)?;
        tx.send(data.to_vec())
            .map_err(|_| TransportError::ConnectionClosed)
    }

    async fn recv(&self) -> Result<Vec<u8>, TransportError> {
        if self.outbound().is_none() {
            return Err(TransportError::ConnectionClosed);
        }
        let mut inbound = self.inbound.lock().await;
        inbound.recv().await.ok_or(TransportError::ConnectionClosed)
    }

    fn is_connected(&self) -> bool {
        self.outbound()
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.outbound().take();
        Ok(())
    }
}
