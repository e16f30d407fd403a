//! Channel-backed [`PeerLink`]: writes are queued on an unbounded mpsc and a
//! separate pump task drains them onto the real socket.

use super::abstraction::{PeerLink, TransportError};
use parking_lot::Mutex;
use tokio::sync::mpsc;

/// Link whose writes land in an mpsc queue
pub struct ChannelLink {
    label: String,
    tx: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
}

impl ChannelLink {
    /// Create a link plus the receiving end its pump task should drain
    pub fn new(label: impl Into<String>) -> (Self, mpsc::UnboundedReceiver<Vec<u8>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let link = Self {
            label: label.into(),
            tx: Mutex::new(Some(tx)),
        };
        (link, rx)
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_closed(&self) -> bool {
        match self.tx.lock().as_ref() {
            Some(tx) => tx.is_closed(),
            None => true,
        }
    }
}

impl PeerLink for ChannelLink {
    fn write(&self, data: &[u8]) -> Result<(), TransportError> {
        let guard = self.tx.lock();
        let tx = guard
            .as_ref()
            .ok_or_else(|| TransportError::Closed(self.label.clone()))?;
        tx.send(data.to_vec())
            .map_err(|_| TransportError::Closed(self.label.clone()))
    }

    fn close(&self) {
        // dropping the sender ends the pump
        self.tx.lock().take();
    }
}
