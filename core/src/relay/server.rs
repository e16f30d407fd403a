//! Relay Server — accepts WebSocket connections and feeds their frames
//! through a shared [`MessageRouter`].

use super::protocol::DEFAULT_TOPIC;
use super::router::{MessageRouter, RouterStats};
use crate::transport::ChannelLink;
use futures::{SinkExt, Stream, StreamExt};
use parking_lot::Mutex;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;

/// Pause after a failed accept so fd exhaustion doesn't spin the loop
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Relay server configuration
#[derive(Debug, Clone)]
pub struct RelayServerConfig {
    /// Address the WebSocket listener binds to
    pub bind_addr: SocketAddr,
    /// Topic reported to peers that don't name one
    pub topic: String,
    /// Maximum concurrent connections
    pub max_connections: usize,
    /// Largest accepted WebSocket message in bytes
    pub max_frame_bytes: usize,
}

impl Default for RelayServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            topic: DEFAULT_TOPIC.to_string(),
            max_connections: 1000,
            max_frame_bytes: 64 * 1024,
        }
    }
}

impl RelayServerConfig {
    /// Default configuration listening on `port` on all interfaces
    pub fn with_port(port: u16) -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], port)),
            ..Default::default()
        }
    }
}

/// Statistics about relay server operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayServerStats {
    /// Number of active connections
    pub connections_active: usize,
    /// Number of connections that completed the announce handshake
    pub peers_announced: usize,
    pub router: RouterStats,
}

/// Relay server error types
#[derive(Debug, Error)]
pub enum RelayServerError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },
}

/// The relay server
#[derive(Clone)]
pub struct RelayServer {
    config: RelayServerConfig,
    router: Arc<Mutex<MessageRouter<ChannelLink>>>,
}

impl RelayServer {
    /// Create a new relay server with default configuration
    pub fn new() -> Self {
        Self::with_config(RelayServerConfig::default())
    }

    /// Create a new relay server with custom configuration
    pub fn with_config(config: RelayServerConfig) -> Self {
        let router = MessageRouter::new(config.topic.clone());
        Self {
            config,
            router: Arc::new(Mutex::new(router)),
        }
    }

    pub fn config(&self) -> &RelayServerConfig {
        &self.config
    }

    /// Bind the configured address
    pub async fn bind(&self) -> Result<TcpListener, RelayServerError> {
        let addr = self.config.bind_addr;
        TcpListener::bind(addr)
            .await
            .map_err(|source| RelayServerError::Bind { addr, source })
    }

    /// Bind and serve until `shutdown` resolves
    pub async fn run_until<F>(&self, shutdown: F) -> Result<(), RelayServerError>
    where
        F: Future<Output = ()>,
    {
        let listener = self.bind().await?;
        tracing::info!("Relay server listening on {}", self.config.bind_addr);

        tokio::select! {
            _ = self.serve(listener) => Ok(()),
            _ = shutdown => {
                tracing::info!("Relay server shutting down");
                Ok(())
            }
        }
    }

    /// Accept connections from `listener` forever
    pub async fn serve(&self, listener: TcpListener) {
        let incoming = futures::stream::unfold(listener, |listener| async move {
            let accepted = listener.accept().await;
            Some((accepted, listener))
        });
        self.serve_incoming(incoming).await;
    }

    /// Serve every connection `incoming` yields. A failed accept is logged
    /// and skipped; returns once the stream ends.
    pub async fn serve_incoming<S>(&self, incoming: S)
    where
        S: Stream<Item = std::io::Result<(TcpStream, SocketAddr)>>,
    {
        futures::pin_mut!(incoming);
        while let Some(accepted) = incoming.next().await {
            let (stream, addr) = match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    tracing::warn!("Accept failed: {}", e);
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                    continue;
                }
            };

            if self.router.lock().connection_count() >= self.config.max_connections {
                tracing::warn!(
                    "Connection from {} rejected: at capacity ({})",
                    addr,
                    self.config.max_connections
                );
                continue;
            }

            let server = self.clone();
            tokio::spawn(async move {
                server.handle_connection(stream, addr).await;
            });
        }
    }

    async fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let mut ws_config = WebSocketConfig::default();
        ws_config.max_message_size = Some(self.config.max_frame_bytes);
        ws_config.max_frame_size = Some(self.config.max_frame_bytes);

        let ws = match tokio_tungstenite::accept_async_with_config(stream, Some(ws_config)).await {
            Ok(ws) => ws,
            Err(e) => {
                tracing::debug!("WebSocket handshake with {} failed: {}", addr, e);
                return;
            }
        };

        let (mut ws_tx, mut ws_rx) = ws.split();
        let (link, mut outbound) = ChannelLink::new(addr.to_string());
        let mut peer_id = self.router.lock().accept(link);

        // Write pump: ends when the router drops this connection's link.
        tokio::spawn(async move {
            while let Some(bytes) = outbound.recv().await {
                let text = String::from_utf8_lossy(&bytes).into_owned();
                if ws_tx.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            let _ = ws_tx.close().await;
        });

        while let Some(msg) = ws_rx.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    peer_id = self.router.lock().handle_text(&peer_id, &text);
                }
                Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                    Ok(text) => {
                        peer_id = self.router.lock().handle_text(&peer_id, &text);
                    }
                    Err(_) => {
                        tracing::debug!("Dropping non-UTF-8 binary frame from {}", peer_id);
                    }
                },
                Ok(Message::Close(_)) => break,
                // ping/pong are answered by tungstenite
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!("Connection {} errored: {}", peer_id, e);
                    break;
                }
            }
        }

        self.router.lock().close(&peer_id);
    }

    /// Get current server statistics
    pub fn get_stats(&self) -> RelayServerStats {
        let router = self.router.lock();
        RelayServerStats {
            connections_active: router.connection_count(),
            peers_announced: router.registry().announced_count(),
            router: router.stats(),
        }
    }

    /// Ids of every connected peer, in registration order
    pub fn peer_ids(&self) -> Vec<String> {
        self.router.lock().registry().ids()
    }
}

impl Default for RelayServer {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================
