// Transport module: collaborator-facing seams for discovery and live links

pub mod abstraction;
pub mod channel;

pub use abstraction::{
    ConnectionEvent, Discovery, JoinMode, PeerLink, Topic, TransportError, TransportKind,
};
pub use channel::ChannelLink;
