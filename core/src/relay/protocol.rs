//! Relay wire protocol: one JSON object per WebSocket frame
//!
//! Peer → relay: `announce`, `lookup`, `message`.
//! Relay → peer: `peers`, `peer-connected`, `peer-disconnected`, `message`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Topic used when neither the frame nor the configuration names one
pub const DEFAULT_TOPIC: &str = "just-chating";

/// A relay frame, discriminated by its `type` field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum RelayFrame {
    /// Presence declaration; repeated periodically as a keep-alive
    #[serde(rename_all = "camelCase")]
    Announce {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        topic: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        is_browser: Option<bool>,
        /// Self-chosen stable name replacing the relay-assigned id
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from_peer: Option<String>,
        /// Hex-encoded identity public key
        #[serde(default, skip_serializing_if = "Option::is_none")]
        public_key: Option<String>,
    },
    /// Ask for the ids of every other connected peer
    #[serde(rename_all = "camelCase")]
    Lookup {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        topic: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        is_browser: Option<bool>,
    },
    /// Chat payload; fanned out to everyone but the sender
    #[serde(rename_all = "camelCase")]
    Message {
        data: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from_peer: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        is_browser: Option<bool>,
    },
    /// Reply to `lookup`, also pushed to every new connection
    #[serde(rename_all = "camelCase")]
    Peers {
        topic: String,
        peers: Vec<String>,
        is_browser: bool,
    },
    #[serde(rename_all = "camelCase")]
    PeerConnected {
        peer_id: String,
        topic: String,
        is_browser: bool,
    },
    #[serde(rename_all = "camelCase")]
    PeerDisconnected { peer_id: String },
    /// Any frame whose `type` we don't know. Ignored, never an error.
    #[serde(other)]
    Unknown,
}

/// Inbound frame could not be decoded. The frame is dropped; the
/// connection stays up.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("Frame is not JSON: {0}")]
    NotJson(String),
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),
}

impl RelayFrame {
    /// Decode one frame
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        serde_json::from_str(text).map_err(|e| {
            use serde_json::error::Category;
            match e.classify() {
                Category::Syntax | Category::Eof | Category::Io => ParseError::NotJson(e.to_string()),
                Category::Data => ParseError::InvalidFrame(e.to_string()),
            }
        })
    }

    /// Encode as a single newline-free JSON object
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Browser flag carried by the frame. Absent means browser; only an
    /// explicit `false` marks a native peer.
    pub fn is_browser(&self) -> bool {
        match self {
            RelayFrame::Announce { is_browser, .. }
            | RelayFrame::Lookup { is_browser, .. }
            | RelayFrame::Message { is_browser, .. } => is_browser.unwrap_or(true),
            RelayFrame::Peers { is_browser, .. } | RelayFrame::PeerConnected { is_browser, .. } => {
                *is_browser
            }
            RelayFrame::PeerDisconnected { .. } | RelayFrame::Unknown => true,
        }
    }

    /// Get a human-readable description of the frame type
    pub fn message_type(&self) -> &'static str {
        match self {
            RelayFrame::Announce { .. } => "announce",
            RelayFrame::Lookup { .. } => "lookup",
            RelayFrame::Message { .. } => "message",
            RelayFrame::Peers { .. } => "peers",
            RelayFrame::PeerConnected { .. } => "peer-connected",
            RelayFrame::PeerDisconnected { .. } => "peer-disconnected",
            RelayFrame::Unknown => "unknown",
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
