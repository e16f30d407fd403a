//! Relay layer
//!
//! Peers that cannot reach each other directly connect to a relay server
//! over WebSocket. The relay keeps a registry of live connections, turns
//! `announce` frames into presence notifications and fans chat messages
//! out to everyone except the sender.

pub mod client;
pub mod protocol;
pub mod registry;
pub mod router;
pub mod server;

pub use client::{RelayClient, RelayClientConfig, RelayClientError, RelayEvent};
pub use protocol::{ParseError, RelayFrame, DEFAULT_TOPIC};
pub use registry::{PeerConnection, PeerRegistry, RemovedPeer};
pub use router::{MessageRouter, RouterStats};
pub use server::{RelayServer, RelayServerConfig, RelayServerError, RelayServerStats};
