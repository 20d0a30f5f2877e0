//! In-process transport over tokio channels.

use std::sync::Mutex as SyncMutex;

use tokio::sync::Mutex;
use tokio::sync::mpsc;

use super::Error;
use super::Result;
use super::Transport;

/// One end of an in-memory frame pipe.
///
/// Frames sent on one end appear on the other end's `recv`, in order.
/// Closing (or dropping) an end makes the other end's `recv` return `None`
/// once the frames already in flight are drained.
pub struct DuplexTransport {
    tx: SyncMutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    rx: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
}

impl DuplexTransport {
    /// Creates a pair of transports connected to each other.
    pub fn pair() -> (Self, Self) {
        let (tx_a, rx_a) = mpsc::unbounded_channel();
        let (tx_b, rx_b) = mpsc::unbounded_channel();

        let a = Self {
            tx: SyncMutex::new(Some(tx_a)),
            rx: Mutex::new(rx_b),
        };
        let b = Self {
            tx: SyncMutex::new(Some(tx_b)),
            rx: Mutex::new(rx_a),
        };
        (a, b)
    }

    fn sender(&self) -> Option<mpsc::UnboundedSender<Vec<u8>>> {
        match self.tx.lock() {
            Ok(tx) => tx.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait::async_trait]
impl Transport for DuplexTransport {
    async fn send(&self, frame: &[u8]) -> Result<()> {
        let tx = self
            .sender()
            .ok_or_else(|| Error::ConnectionLost("local end closed".into()))?;
        tx.send(frame.to_vec())
            .map_err(|_| Error::ConnectionLost("peer dropped".into()))
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>> {
        let mut rx = self.rx.lock().await;
        Ok(rx.recv().await)
    }

    async fn close(&self) {
        let taken = match self.tx.lock() {
            Ok(mut tx) => tx.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        drop(taken);
    }
}
