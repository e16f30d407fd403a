//! Peer Registry: live relay connections, their display names and which of
//! them have completed the announce handshake.
//!
//! Every id in the name map and the announced set is also a key of the
//! connection map. Lookups of unknown ids return `None`/`false`; a close
//! racing other cleanup is a normal outcome, not an error.

use crate::transport::TransportKind;
use std::collections::{HashMap, HashSet};

/// One transport-level link held by the relay
#[derive(Debug)]
pub struct PeerConnection<H> {
    /// Current registry key (server-assigned `peer-N` until renamed)
    pub connection_id: String,
    pub handle: H,
    pub transport_kind: TransportKind,
    /// Hex public key from the peer's announce, if it sent one
    pub public_key: Option<String>,
    seq: u64,
}

/// What was dropped by [`PeerRegistry::remove`]
#[derive(Debug)]
pub struct RemovedPeer<H> {
    pub connection: PeerConnection<H>,
    pub display_name: Option<String>,
    pub was_announced: bool,
}

/// Registry of relay connections, keyed by connection id
#[derive(Debug)]
pub struct PeerRegistry<H> {
    connections: HashMap<String, PeerConnection<H>>,
    names: HashMap<String, String>,
    announced: HashSet<String>,
    next_seq: u64,
}

impl<H> PeerRegistry<H> {
    pub fn new() -> Self {
        Self {
            connections: HashMap::new(),
            names: HashMap::new(),
            announced: HashSet::new(),
            next_seq: 0,
        }
    }

    /// Insert a fresh connection: no display name, not announced.
    ///
    /// A live id is never overwritten: the handle is handed back and the
    /// existing entry is left untouched.
    pub fn register(&mut self, connection_id: String, handle: H) -> Result<(), H> {
        if self.connections.contains_key(&connection_id) {
            tracing::warn!("Connection id {} already registered; refusing", connection_id);
            return Err(handle);
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.connections.insert(
            connection_id.clone(),
            PeerConnection {
                connection_id,
                handle,
                transport_kind: TransportKind::Browser,
                public_key: None,
                seq,
            },
        );
        Ok(())
    }

    /// Re-key `old_id` to `new_id` and return the id the connection is now
    /// known by.
    ///
    /// The entry keeps its registration position, display name and announced
    /// flag. Returns `None` when `old_id` is not registered. When `new_id`
    /// already belongs to another live connection the rename is refused and
    /// `old_id` is returned unchanged.
    pub fn rename(&mut self, old_id: &str, new_id: &str) -> Option<String> {
        if !self.connections.contains_key(old_id) {
            return None;
        }
        if old_id == new_id {
            return Some(old_id.to_string());
        }
        if self.connections.contains_key(new_id) {
            tracing::warn!(
                "Rename {} -> {} refused: id held by another connection",
                old_id,
                new_id
            );
            return Some(old_id.to_string());
        }

        if self.announced.remove(old_id) {
            self.announced.insert(new_id.to_string());
        }
        if let Some(name) = self.names.remove(old_id) {
            self.names.insert(new_id.to_string(), name);
        }
        if let Some(mut connection) = self.connections.remove(old_id) {
            connection.connection_id = new_id.to_string();
            self.connections.insert(new_id.to_string(), connection);
        }

        Some(new_id.to_string())
    }

    /// Set the display name for a live id. Idempotent; `false` if unknown.
    pub fn set_display_name(&mut self, id: &str, name: &str) -> bool {
        if !self.connections.contains_key(id) {
            return false;
        }
        self.names.insert(id.to_string(), name.to_string());
        true
    }

    pub fn display_name(&self, id: &str) -> Option<&str> {
        self.names.get(id).map(String::as_str)
    }

    /// Display name, falling back to the connection id itself
    pub fn display_name_or_id(&self, id: &str) -> String {
        self.display_name(id).unwrap_or(id).to_string()
    }

    pub fn set_transport_kind(&mut self, id: &str, kind: TransportKind) {
        if let Some(connection) = self.connections.get_mut(id) {
            connection.transport_kind = kind;
        }
    }

    pub fn set_public_key(&mut self, id: &str, public_key: &str) {
        if let Some(connection) = self.connections.get_mut(id) {
            connection.public_key = Some(public_key.to_string());
        }
    }

    /// Record that `id` has been announced.
    ///
    /// `true` only on the first call for a live id; every later call (and
    /// any call for an unknown id) is a no-op returning `false`.
    pub fn mark_announced(&mut self, id: &str) -> bool {
        if !self.connections.contains_key(id) {
            return false;
        }
        self.announced.insert(id.to_string())
    }

    pub fn is_announced(&self, id: &str) -> bool {
        self.announced.contains(id)
    }

    /// Drop `id` from the announced set, the name map and the connection
    /// map, in that order. Unknown ids return `None`.
    pub fn remove(&mut self, id: &str) -> Option<RemovedPeer<H>> {
        let was_announced = self.announced.remove(id);
        let display_name = self.names.remove(id);
        let connection = self.connections.remove(id)?;

        Some(RemovedPeer {
            connection,
            display_name,
            was_announced,
        })
    }

    /// Every registered id except `exclude_id`, in registration order
    pub fn snapshot_other_ids(&self, exclude_id: &str) -> Vec<String> {
        self.ordered()
            .into_iter()
            .filter(|c| c.connection_id != exclude_id)
            .map(|c| c.connection_id.clone())
            .collect()
    }

    /// Every registered id, in registration order
    pub fn ids(&self) -> Vec<String> {
        self.ordered()
            .into_iter()
            .map(|c| c.connection_id.clone())
            .collect()
    }

    /// Every connection except `exclude_id`, in registration order
    pub fn others<'a>(&'a self, exclude_id: Option<&'a str>) -> impl Iterator<Item = &'a PeerConnection<H>> + 'a {
        self.ordered()
            .into_iter()
            .filter(move |c| Some(c.connection_id.as_str()) != exclude_id)
    }

    pub fn get(&self, id: &str) -> Option<&PeerConnection<H>> {
        self.connections.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.connections.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn announced_count(&self) -> usize {
        self.announced.len()
    }

    fn ordered(&self) -> Vec<&PeerConnection<H>> {
        let mut entries: Vec<&PeerConnection<H>> = self.connections.values().collect();
        entries.sort_by_key(|c| c.seq);
        entries
    }
}

impl<H> Default for PeerRegistry<H> {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================
