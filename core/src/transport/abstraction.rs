//! Transport abstraction layer for relaychat
//!
//! The DHT / hole-punching stack is an external collaborator. The core only
//! sees it through [`Discovery`] (join a topic) and [`PeerLink`] (write to one
//! live connection), plus the [`ConnectionEvent`]s it reports.

use crate::identity::Identity;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// What kind of peer sits on the other end of a link.
///
/// Informational only: used to label logs and the UI, never for routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransportKind {
    /// Native swarm connection
    Native,
    /// Browser peer reached through the relay
    Browser,
}

impl TransportKind {
    pub fn from_is_browser(is_browser: bool) -> Self {
        if is_browser {
            TransportKind::Browser
        } else {
            TransportKind::Native
        }
    }

    pub fn is_browser(self) -> bool {
        self == TransportKind::Browser
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Native => write!(f, "Native"),
            TransportKind::Browser => write!(f, "Browser"),
        }
    }
}

/// 32-byte rendezvous key peers join to find each other
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Topic([u8; 32]);

impl Topic {
    /// Topic for a human-readable room name (BLAKE3 of the name)
    pub fn from_name(name: &str) -> Self {
        Self(*blake3::hash(name.as_bytes()).as_bytes())
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn from_hex(s: &str) -> Result<Self, TransportError> {
        let bytes = hex::decode(s.trim())
            .map_err(|e| TransportError::InvalidTopic(e.to_string()))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| TransportError::InvalidTopic("expected 32 bytes".to_string()))?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Topic({})", &self.to_hex()[..16])
    }
}

/// How a topic is joined: announce ourselves, look for others, or both
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinMode {
    pub server: bool,
    pub client: bool,
}

impl Default for JoinMode {
    fn default() -> Self {
        Self {
            server: true,
            client: true,
        }
    }
}

/// A single live connection the core can write to
pub trait PeerLink: Send + Sync {
    /// Queue `data` for delivery. Fails once the link is closed.
    fn write(&self, data: &[u8]) -> Result<(), TransportError>;

    /// Close the link. Further writes fail.
    fn close(&self);
}

/// Events reported by the discovery/transport collaborator
pub enum ConnectionEvent {
    /// A connection to `peer_key` was established
    Opened {
        peer_key: String,
        link: Arc<dyn PeerLink>,
        kind: TransportKind,
    },
    /// Bytes arrived from `peer_key`
    Data { peer_key: String, data: Vec<u8> },
    /// The connection to `peer_key` is gone
    Closed { peer_key: String },
}

impl fmt::Debug for ConnectionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionEvent::Opened { peer_key, kind, .. } => {
                write!(f, "Opened {{ peer_key: {}, kind: {} }}", peer_key, kind)
            }
            ConnectionEvent::Data { peer_key, data } => {
                write!(f, "Data {{ peer_key: {}, data_len: {} }}", peer_key, data.len())
            }
            ConnectionEvent::Closed { peer_key } => write!(f, "Closed {{ peer_key: {} }}", peer_key),
        }
    }
}

/// Topic discovery provided by the swarm collaborator.
///
/// Connections found through a joined topic are reported as
/// [`ConnectionEvent`]s on the channel the implementation was built with.
#[async_trait]
pub trait Discovery: Send + Sync {
    /// Join `topic`, authenticating as `identity`
    async fn join(
        &self,
        topic: &Topic,
        mode: JoinMode,
        identity: &Identity,
    ) -> Result<(), TransportError>;

    /// Stop announcing / looking up `topic`
    async fn leave(&self, topic: &Topic) -> Result<(), TransportError>;
}

/// Errors that can occur in the transport layer
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Connection closed: {0}")]
    Closed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Invalid topic: {0}")]
    InvalidTopic(String),

    #[error("Join failed: {0}")]
    JoinFailed(String),
}
