// Relaychat Core — identity, relay and session layers
//
// Peers find each other on a shared topic, either directly through the
// swarm collaborator or through a relay server, and exchange lines of text.

pub mod identity;
pub mod relay;
pub mod session;
pub mod transport;

pub use identity::{Identity, IdentityError, IdentityManager, PhraseStore, RecoveryPhrase};
pub use relay::{
    MessageRouter, ParseError, PeerRegistry, RelayClient, RelayClientConfig, RelayClientError,
    RelayEvent, RelayFrame, RelayServer, RelayServerConfig, RelayServerStats, DEFAULT_TOPIC,
};
pub use session::{PeerSession, SessionConfig, SessionDelegate};
pub use transport::{ConnectionEvent, Discovery, PeerLink, Topic, TransportError, TransportKind};

/// Crate version, reported by the CLI
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
