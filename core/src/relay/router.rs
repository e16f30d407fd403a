//! Message Router: interprets inbound frames, mutates the registry and fans
//! frames out to the other connections.
//!
//! Each call (`accept`, `handle_text`, `handle_frame`, `close`) runs to
//! completion against the registry, so no broadcast ever observes a
//! half-registered or half-removed peer. Callers that drive the router from
//! several tasks must serialize access (the server wraps it in a mutex).

use super::protocol::{RelayFrame, DEFAULT_TOPIC};
use super::registry::PeerRegistry;
use crate::transport::{PeerLink, TransportKind};

/// Counters kept by the router
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouterStats {
    /// Connections accepted since start
    pub connections_accepted: u64,
    /// Frames decoded and handled
    pub frames_routed: u64,
    /// Frames dropped as malformed
    pub frames_dropped: u64,
    /// Writes that failed during a broadcast or reply
    pub delivery_failures: u64,
}

/// Routes relay frames between registered connections
pub struct MessageRouter<H: PeerLink> {
    registry: PeerRegistry<H>,
    topic: String,
    next_connection: u64,
    stats: RouterStats,
}

impl<H: PeerLink> MessageRouter<H> {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            registry: PeerRegistry::new(),
            topic: topic.into(),
            next_connection: 0,
            stats: RouterStats::default(),
        }
    }

    /// Register a newly accepted connection under a fresh `peer-N` id and
    /// send it the list of peers already present.
    ///
    /// Ids already held by a live connection (a peer may announce itself
    /// as `peer-N`) are skipped.
    pub fn accept(&mut self, handle: H) -> String {
        let id = loop {
            self.next_connection += 1;
            let candidate = format!("peer-{}", self.next_connection);
            if !self.registry.contains(&candidate) {
                break candidate;
            }
            tracing::debug!("Skipping connection id {}: already in use", candidate);
        };

        let registered = self.registry.register(id.clone(), handle);
        debug_assert!(registered.is_ok());
        self.stats.connections_accepted += 1;
        tracing::info!("New peer connected: {}", id);

        let peers = RelayFrame::Peers {
            topic: self.topic.clone(),
            peers: self.registry.snapshot_other_ids(&id),
            is_browser: true,
        };
        self.send_to(&id, &peers);

        id
    }

    /// Decode and handle one raw frame. Malformed frames are dropped.
    ///
    /// Returns the id the connection is known by afterwards; callers must use
    /// it for every later call.
    pub fn handle_text(&mut self, id: &str, text: &str) -> String {
        match RelayFrame::parse(text) {
            Ok(frame) => self.handle_frame(id, frame),
            Err(e) => {
                self.stats.frames_dropped += 1;
                tracing::debug!("Dropping malformed frame from {}: {}", id, e);
                id.to_string()
            }
        }
    }

    /// Handle one decoded frame; returns the connection's canonical id
    pub fn handle_frame(&mut self, id: &str, frame: RelayFrame) -> String {
        if !self.registry.contains(id) {
            tracing::debug!("Frame from unregistered connection {} ignored", id);
            return id.to_string();
        }
        self.stats.frames_routed += 1;
        let is_browser = frame.is_browser();

        match frame {
            RelayFrame::Announce {
                topic,
                name,
                from_peer,
                public_key,
                ..
            } => self.handle_announce(id, topic, name, from_peer, public_key, is_browser),
            RelayFrame::Lookup { topic, .. } => {
                tracing::info!(
                    "{} peer {} looking up topic {}",
                    TransportKind::from_is_browser(is_browser),
                    id,
                    self.topic
                );
                let reply = RelayFrame::Peers {
                    topic: topic.unwrap_or_else(|| self.topic.clone()),
                    peers: self.registry.snapshot_other_ids(id),
                    is_browser,
                };
                self.send_to(id, &reply);
                id.to_string()
            }
            RelayFrame::Message {
                data, from_peer, ..
            } => {
                if let Some(name) = from_peer.as_deref() {
                    self.registry.set_display_name(id, name);
                }
                let sender = self.registry.display_name_or_id(id);
                tracing::info!(
                    "Message from {} peer {}: {}",
                    TransportKind::from_is_browser(is_browser),
                    sender,
                    data
                );
                let frame = RelayFrame::Message {
                    data,
                    from_peer: Some(sender),
                    is_browser: Some(is_browser),
                };
                self.broadcast(&frame, Some(id));
                id.to_string()
            }
            RelayFrame::Peers { .. }
            | RelayFrame::PeerConnected { .. }
            | RelayFrame::PeerDisconnected { .. } => {
                tracing::debug!("Ignoring server-only frame from {}", id);
                id.to_string()
            }
            RelayFrame::Unknown => {
                tracing::debug!("Ignoring frame of unknown type from {}", id);
                id.to_string()
            }
        }
    }

    fn handle_announce(
        &mut self,
        id: &str,
        topic: Option<String>,
        name: Option<String>,
        from_peer: Option<String>,
        public_key: Option<String>,
        is_browser: bool,
    ) -> String {
        let current = match name.as_deref().filter(|n| !n.is_empty()) {
            Some(requested) => self
                .registry
                .rename(id, requested)
                .unwrap_or_else(|| id.to_string()),
            None => id.to_string(),
        };

        let display = name
            .filter(|n| !n.is_empty())
            .or(from_peer)
            .unwrap_or_else(|| current.clone());
        self.registry.set_display_name(&current, &display);
        self.registry
            .set_transport_kind(&current, TransportKind::from_is_browser(is_browser));
        if let Some(key) = public_key.as_deref() {
            self.registry.set_public_key(&current, key);
        }

        if self.registry.mark_announced(&current) {
            tracing::info!(
                "{} peer {} announced for topic {}",
                TransportKind::from_is_browser(is_browser),
                current,
                self.topic
            );
            let frame = RelayFrame::PeerConnected {
                peer_id: current.clone(),
                topic: topic.unwrap_or_else(|| self.topic.clone()),
                is_browser,
            };
            self.broadcast(&frame, Some(&current));
        } else {
            tracing::debug!("Keep-alive announce from {}", current);
        }

        current
    }

    /// Remove a closed connection; announces the departure if the peer had
    /// been announced. Safe to call more than once.
    pub fn close(&mut self, id: &str) -> bool {
        match self.registry.remove(id) {
            Some(removed) => {
                tracing::info!(
                    "{} peer {} disconnected",
                    removed.connection.transport_kind,
                    id
                );
                if removed.was_announced {
                    let frame = RelayFrame::PeerDisconnected {
                        peer_id: id.to_string(),
                    };
                    self.broadcast(&frame, None);
                }
                true
            }
            None => false,
        }
    }

    /// Send `frame` to every connection except `exclude_id`. A failed write
    /// is logged and the loop moves on. Returns the number of successful
    /// deliveries.
    fn broadcast(&mut self, frame: &RelayFrame, exclude_id: Option<&str>) -> usize {
        let payload = match frame.encode() {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!("Failed to encode {} frame: {}", frame.message_type(), e);
                return 0;
            }
        };

        let mut delivered = 0;
        let mut failures = 0;
        for connection in self.registry.others(exclude_id) {
            match connection.handle.write(payload.as_bytes()) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    failures += 1;
                    tracing::debug!(
                        "Broadcast of {} to {} failed: {}",
                        frame.message_type(),
                        connection.connection_id,
                        e
                    );
                }
            }
        }
        self.stats.delivery_failures += failures;
        delivered
    }

    fn send_to(&mut self, id: &str, frame: &RelayFrame) -> bool {
        let Some(connection) = self.registry.get(id) else {
            return false;
        };
        let result = frame
            .encode()
            .map_err(|e| e.to_string())
            .and_then(|payload| {
                connection
                    .handle
                    .write(payload.as_bytes())
                    .map_err(|e| e.to_string())
            });

        match result {
            Ok(()) => true,
            Err(e) => {
                self.stats.delivery_failures += 1;
                tracing::debug!("Reply {} to {} failed: {}", frame.message_type(), id, e);
                false
            }
        }
    }

    pub fn registry(&self) -> &PeerRegistry<H> {
        &self.registry
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }

    pub fn stats(&self) -> RouterStats {
        self.stats.clone()
    }
}

impl<H: PeerLink> Default for MessageRouter<H> {
    fn default() -> Self {
        Self::new(DEFAULT_TOPIC)
    }
}

// ============================================================================
// TESTS
// ============================================================================
