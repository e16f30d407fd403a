//! Relay Client, a session's WebSocket link to a relay server

use super::protocol::RelayFrame;
use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

/// Relay client configuration
#[derive(Debug, Clone)]
pub struct RelayClientConfig {
    /// WebSocket URL of the relay, e.g. `ws://localhost:8080`
    pub url: String,
    pub topic: String,
    /// Name to announce; the relay re-keys our connection to it
    pub name: String,
    /// Hex public key carried in announces
    pub public_key: Option<String>,
    pub is_browser: bool,
}

/// Something the relay told us
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    /// Current peer list (on connect and in reply to `lookup`)
    Peers(Vec<String>),
    PeerConnected { peer_id: String, is_browser: bool },
    PeerDisconnected { peer_id: String },
    Message {
        from_peer: Option<String>,
        data: String,
        is_browser: bool,
    },
    /// The relay connection is gone
    Closed,
}

/// Relay client error types
#[derive(Debug, Error)]
pub enum RelayClientError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Relay connection closed")]
    Closed,
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

/// Connected relay client. Dropping it tears down both pump tasks.
pub struct RelayClient {
    config: RelayClientConfig,
    outbound: mpsc::UnboundedSender<String>,
    tasks: Vec<JoinHandle<()>>,
}

impl RelayClient {
    /// Connect to the relay; events arrive on the returned receiver.
    pub async fn connect(
        config: RelayClientConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<RelayEvent>), RelayClientError> {
        let (ws, _response) = tokio_tungstenite::connect_async(config.url.as_str())
            .await
            .map_err(|e| RelayClientError::ConnectionFailed(e.to_string()))?;
        tracing::info!("Connected to relay {}", config.url);

        let (mut write, mut read) = ws.split();
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<String>();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let write_task = tokio::spawn(async move {
            while let Some(text) = outbound_rx.recv().await {
                if write.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            let _ = write.close().await;
        });

        let read_task = tokio::spawn(async move {
            while let Some(Ok(msg)) = read.next().await {
                let text = match msg {
                    Message::Text(text) => text,
                    Message::Binary(bytes) => match String::from_utf8(bytes) {
                        Ok(text) => text,
                        Err(_) => continue,
                    },
                    Message::Close(_) => break,
                    _ => continue,
                };
                match RelayFrame::parse(&text) {
                    Ok(frame) => {
                        if let Some(event) = Self::event_for(frame) {
                            if events_tx.send(event).is_err() {
                                return;
                            }
                        }
                    }
                    Err(e) => tracing::debug!("Dropping malformed relay frame: {}", e),
                }
            }
            tracing::info!("Relay connection closed");
            let _ = events_tx.send(RelayEvent::Closed);
        });

        let client = Self {
            config,
            outbound,
            tasks: vec![write_task, read_task],
        };
        Ok((client, events_rx))
    }

    /// Map a server frame to an event; peer-originated kinds are ignored
    pub fn event_for(frame: RelayFrame) -> Option<RelayEvent> {
        match frame {
            RelayFrame::Peers { peers, .. } => Some(RelayEvent::Peers(peers)),
            RelayFrame::PeerConnected {
                peer_id, is_browser, ..
            } => Some(RelayEvent::PeerConnected {
                peer_id,
                is_browser,
            }),
            RelayFrame::PeerDisconnected { peer_id } => {
                Some(RelayEvent::PeerDisconnected { peer_id })
            }
            RelayFrame::Message {
                data,
                from_peer,
                is_browser,
            } => Some(RelayEvent::Message {
                from_peer,
                data,
                is_browser: is_browser.unwrap_or(true),
            }),
            RelayFrame::Announce { .. } | RelayFrame::Lookup { .. } | RelayFrame::Unknown => None,
        }
    }

    /// The announce frame this client sends (also used as keep-alive)
    pub fn announce_frame(&self) -> RelayFrame {
        RelayFrame::Announce {
            topic: Some(self.config.topic.clone()),
            is_browser: Some(self.config.is_browser),
            name: Some(self.config.name.clone()),
            from_peer: Some(self.config.name.clone()),
            public_key: self.config.public_key.clone(),
        }
    }

    pub fn announce(&self) -> Result<(), RelayClientError> {
        self.send_frame(&self.announce_frame())
    }

    pub fn lookup(&self) -> Result<(), RelayClientError> {
        self.send_frame(&RelayFrame::Lookup {
            topic: Some(self.config.topic.clone()),
            is_browser: Some(self.config.is_browser),
        })
    }

    /// Send chat text; the relay fans it out to every other peer
    pub fn send_message(&self, data: &str) -> Result<(), RelayClientError> {
        self.send_frame(&RelayFrame::Message {
            data: data.to_string(),
            from_peer: Some(self.config.name.clone()),
            is_browser: Some(self.config.is_browser),
        })
    }

    pub fn send_frame(&self, frame: &RelayFrame) -> Result<(), RelayClientError> {
        let text = frame
            .encode()
            .map_err(|e| RelayClientError::SerializationError(e.to_string()))?;
        self.outbound
            .send(text)
            .map_err(|_| RelayClientError::Closed)
    }

    pub fn is_connected(&self) -> bool {
        !self.outbound.is_closed()
    }

    pub fn config(&self) -> &RelayClientConfig {
        &self.config
    }
}

impl Drop for RelayClient {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
