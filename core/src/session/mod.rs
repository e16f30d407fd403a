//! Peer Session, the client side of a chat
//!
//! A session joins the shared topic with the process identity, tracks every
//! live peer (direct links from the swarm, relayed peers from a relay
//! server) and fans outgoing text out to all of them. Inbound text reaches
//! the UI through [`SessionDelegate`], one call per line.

pub mod scheduler;

pub use scheduler::{Owner, Scheduler};

use crate::identity::Identity;
use crate::relay::{RelayClient, RelayClientConfig, RelayClientError, RelayEvent, DEFAULT_TOPIC};
use crate::transport::{ConnectionEvent, Discovery, JoinMode, PeerLink, Topic, TransportError, TransportKind};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

const KEEP_ALIVE: Owner = Owner::Session("relay-keepalive");

/// One greeting per batch of relayed arrivals
const RELAY_GREETING: Owner = Owner::Session("relay-greeting");

/// Sender shown for relay messages that carry no `fromPeer`
const RELAY_SENDER: &str = "relay";

/// A partial line longer than this is discarded
const MAX_LINE_BYTES: usize = 64 * 1024;

/// Session configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Display name prefixed to every outgoing line
    pub name: String,
    pub topic: String,
    /// Sent once to each new peer when set (greeter mode)
    pub greeting: Option<String>,
    pub greeting_delay: Duration,
    /// Keep-alive interval for relay announces
    pub reannounce_interval: Duration,
    pub is_browser: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            name: "anonymous".to_string(),
            topic: DEFAULT_TOPIC.to_string(),
            greeting: None,
            greeting_delay: Duration::from_millis(500),
            reannounce_interval: Duration::from_secs(30),
            is_browser: false,
        }
    }
}

/// Callbacks into the UI layer
#[cfg_attr(test, mockall::automock)]
pub trait SessionDelegate: Send + Sync {
    /// One complete inbound line from `from`
    fn on_line(&self, from: &str, line: &str);
    fn on_peer_connected(&self, peer: &str, kind: TransportKind);
    fn on_peer_disconnected(&self, peer: &str);
}

enum Route {
    Direct {
        link: Arc<dyn PeerLink>,
        buffer: Vec<u8>,
    },
    /// Reached through the relay; the relay does the fan-out
    Relayed,
}

struct PeerEntry {
    route: Route,
    kind: TransportKind,
}

impl PeerEntry {
    fn is_relayed(&self) -> bool {
        matches!(self.route, Route::Relayed)
    }
}

pub struct PeerSession {
    identity: Identity,
    config: SessionConfig,
    delegate: Arc<dyn SessionDelegate>,
    peers: HashMap<String, PeerEntry>,
    relay: Option<Arc<RelayClient>>,
    scheduler: Scheduler,
}

impl PeerSession {
    pub fn new(identity: Identity, config: SessionConfig, delegate: Arc<dyn SessionDelegate>) -> Self {
        Self {
            identity,
            config,
            delegate,
            peers: HashMap::new(),
            relay: None,
            scheduler: Scheduler::new(),
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn topic(&self) -> Topic {
        Topic::from_name(&self.config.topic)
    }

    /// Join the session topic as both server and client
    pub async fn join(&self, discovery: &dyn Discovery) -> Result<(), TransportError> {
        let topic = self.topic();
        discovery
            .join(&topic, JoinMode::default(), &self.identity)
            .await?;
        tracing::info!("Joined topic {} as {}", self.config.topic, self.config.name);
        Ok(())
    }

    pub async fn leave(&self, discovery: &dyn Discovery) -> Result<(), TransportError> {
        discovery.leave(&self.topic()).await
    }

    /// Connect to a relay and attach it. Relay events arrive on the
    /// returned receiver and should be fed to [`Self::handle_relay_event`].
    pub async fn connect_relay(
        &mut self,
        url: &str,
    ) -> Result<mpsc::UnboundedReceiver<RelayEvent>, RelayClientError> {
        let config = RelayClientConfig {
            url: url.to_string(),
            topic: self.config.topic.clone(),
            name: self.config.name.clone(),
            public_key: Some(self.identity.peer_id()),
            is_browser: self.config.is_browser,
        };
        let (client, events) = RelayClient::connect(config).await?;
        self.attach_relay(client)?;
        Ok(events)
    }

    /// Announce on `client`, ask for the peer list and keep re-announcing
    /// every `reannounce_interval`. Each keep-alive also refreshes the
    /// peer list so renamed relay peers don't linger under stale ids.
    pub fn attach_relay(&mut self, client: RelayClient) -> Result<(), RelayClientError> {
        client.announce()?;
        client.lookup()?;

        let client = Arc::new(client);
        let weak = Arc::downgrade(&client);
        self.scheduler.cancel_owner(&KEEP_ALIVE);
        self.scheduler.cancel_owner(&RELAY_GREETING);
        self.scheduler
            .schedule_every(KEEP_ALIVE, self.config.reannounce_interval, move || {
                match weak.upgrade() {
                    Some(client) => client.announce().and_then(|_| client.lookup()).is_ok(),
                    None => false,
                }
            });
        self.relay = Some(client);
        Ok(())
    }

    pub fn has_relay(&self) -> bool {
        self.relay.is_some()
    }

    pub fn handle_connection_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Opened { peer_key, link, kind } => {
                tracing::info!("Peer connected: {} ({})", peer_key, kind);
                self.schedule_direct_greeting(&peer_key, &link);
                let entry = PeerEntry {
                    route: Route::Direct {
                        link,
                        buffer: Vec::new(),
                    },
                    kind,
                };
                if let Some(old) = self.peers.insert(peer_key.clone(), entry) {
                    // duplicate connection to the same peer; keep the newest
                    if let Route::Direct { link, .. } = old.route {
                        link.close();
                    }
                }
                self.delegate.on_peer_connected(&peer_key, kind);
            }
            ConnectionEvent::Data { peer_key, data } => {
                let lines = match self.peers.get_mut(&peer_key) {
                    Some(PeerEntry {
                        route: Route::Direct { buffer, .. },
                        ..
                    }) => drain_lines(buffer, &data),
                    _ => {
                        tracing::debug!("Data from unknown peer {}", peer_key);
                        return;
                    }
                };
                for line in lines {
                    let (from, text) = split_sender(&line, &peer_key);
                    self.delegate.on_line(from, text);
                }
            }
            ConnectionEvent::Closed { peer_key } => {
                self.scheduler.cancel_owner(&Owner::peer(peer_key.as_str()));
                if let Some(entry) = self.peers.remove(&peer_key) {
                    if let Route::Direct { link, .. } = entry.route {
                        link.close();
                    }
                    tracing::info!("Peer disconnected: {}", peer_key);
                    self.delegate.on_peer_disconnected(&peer_key);
                }
            }
        }
    }

    pub fn handle_relay_event(&mut self, event: RelayEvent) {
        match event {
            RelayEvent::Peers(ids) => self.reconcile_relayed(ids),
            RelayEvent::PeerConnected { peer_id, is_browser } => {
                self.add_relayed(peer_id, TransportKind::from_is_browser(is_browser));
            }
            RelayEvent::PeerDisconnected { peer_id } => self.remove_relayed(&peer_id),
            RelayEvent::Message {
                from_peer, data, ..
            } => {
                let from = from_peer.as_deref().unwrap_or(RELAY_SENDER);
                for line in data.lines() {
                    self.delegate.on_line(from, line);
                }
            }
            RelayEvent::Closed => {
                tracing::warn!("Relay connection lost");
                self.scheduler.cancel_owner(&KEEP_ALIVE);
                self.scheduler.cancel_owner(&RELAY_GREETING);
                self.relay = None;
                let relayed: Vec<String> = self
                    .peers
                    .iter()
                    .filter(|(_, entry)| entry.is_relayed())
                    .map(|(id, _)| id.clone())
                    .collect();
                for id in relayed {
                    self.remove_relayed(&id);
                }
            }
        }
    }

    /// Send `text` to every live peer. Returns how many peers it went out
    /// to; zero peers is a no-op, not an error.
    pub fn send_to_all(&self, text: &str) -> usize {
        let text = text.trim();
        if text.is_empty() || self.peers.is_empty() {
            return 0;
        }

        let framed: String = text
            .lines()
            .map(|line| format!("{}: {}\n", self.config.name, line))
            .collect();

        let mut delivered = 0;
        let mut relayed = 0;
        for (peer_key, entry) in &self.peers {
            match &entry.route {
                Route::Direct { link, .. } => match link.write(framed.as_bytes()) {
                    Ok(()) => delivered += 1,
                    Err(e) => tracing::debug!("Write to {} failed: {}", peer_key, e),
                },
                Route::Relayed => relayed += 1,
            }
        }

        if relayed > 0 {
            match &self.relay {
                Some(client) => match client.send_message(text) {
                    Ok(()) => delivered += relayed,
                    Err(e) => tracing::warn!("Relay send failed: {}", e),
                },
                None => tracing::debug!("{} relayed peers but no relay attached", relayed),
            }
        }
        delivered
    }

    /// Ids of every live peer, sorted
    pub fn peer_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.peers.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn peer_kind(&self, peer: &str) -> Option<TransportKind> {
        self.peers.get(peer).map(|entry| entry.kind)
    }

    /// Number of pending timers (greetings, keep-alive)
    pub fn pending_tasks(&self) -> usize {
        self.scheduler.active()
    }

    /// Cancel every timer, close every direct link and drop the relay
    pub fn shutdown(&mut self) {
        self.scheduler.cancel_all();
        for (_, entry) in self.peers.drain() {
            if let Route::Direct { link, .. } = entry.route {
                link.close();
            }
        }
        self.relay = None;
        tracing::info!("Session shut down");
    }

    /// Drive the session until `outgoing` closes.
    ///
    /// Either event source may be absent (no swarm, or no relay); a source
    /// whose channel closes is dropped and the loop carries on.
    pub async fn run(
        mut self,
        mut connections: Option<mpsc::UnboundedReceiver<ConnectionEvent>>,
        mut relay_events: Option<mpsc::UnboundedReceiver<RelayEvent>>,
        mut outgoing: mpsc::UnboundedReceiver<String>,
    ) {
        loop {
            tokio::select! {
                biased;

                event = recv_or_pending(&mut connections) => match event {
                    Some(event) => self.handle_connection_event(event),
                    None => connections = None,
                },
                event = recv_or_pending(&mut relay_events) => match event {
                    Some(event) => self.handle_relay_event(event),
                    None => {
                        self.handle_relay_event(RelayEvent::Closed);
                        relay_events = None;
                    }
                },
                text = outgoing.recv() => match text {
                    Some(text) => {
                        self.send_to_all(&text);
                    }
                    None => break,
                },
            }
        }
        self.shutdown();
    }

    fn reconcile_relayed(&mut self, ids: Vec<String>) {
        let stale: Vec<String> = self
            .peers
            .iter()
            .filter(|(id, entry)| entry.is_relayed() && !ids.contains(id))
            .map(|(id, _)| id.clone())
            .collect();
        for id in stale {
            self.remove_relayed(&id);
        }
        for id in ids {
            if id != self.config.name && !self.peers.contains_key(&id) {
                self.add_relayed(id, TransportKind::Browser);
            }
        }
    }

    fn add_relayed(&mut self, peer_id: String, kind: TransportKind) {
        if let Some(entry) = self.peers.get_mut(&peer_id) {
            entry.kind = kind;
            return;
        }
        tracing::info!("Relayed peer connected: {} ({})", peer_id, kind);
        self.schedule_relay_greeting();
        self.peers.insert(
            peer_id.clone(),
            PeerEntry {
                route: Route::Relayed,
                kind,
            },
        );
        self.delegate.on_peer_connected(&peer_id, kind);
    }

    fn remove_relayed(&mut self, peer_id: &str) {
        let relayed = self.peers.get(peer_id).map(PeerEntry::is_relayed);
        if relayed != Some(true) {
            return;
        }
        self.peers.remove(peer_id);
        tracing::info!("Relayed peer disconnected: {}", peer_id);
        self.delegate.on_peer_disconnected(peer_id);
    }

    fn schedule_direct_greeting(&mut self, peer_key: &str, link: &Arc<dyn PeerLink>) {
        let Some(greeting) = &self.config.greeting else {
            return;
        };
        let line = format!("{}: {}\n", self.config.name, greeting);
        let link = Arc::clone(link);
        let peer = peer_key.to_string();
        self.scheduler
            .schedule_once(Owner::peer(peer_key), self.config.greeting_delay, async move {
                if let Err(e) = link.write(line.as_bytes()) {
                    tracing::debug!("Greeting to {} failed: {}", peer, e);
                }
            });
    }

    /// Relayed greetings go out as a relay message, which the relay fans
    /// out to every peer. Arrivals within one greeting delay share a single
    /// message instead of each triggering their own.
    fn schedule_relay_greeting(&mut self) {
        let (Some(greeting), Some(client)) = (&self.config.greeting, &self.relay) else {
            return;
        };
        if self.scheduler.active_for(&RELAY_GREETING) > 0 {
            return;
        }
        let greeting = greeting.clone();
        let client = Arc::clone(client);
        self.scheduler
            .schedule_once(RELAY_GREETING, self.config.greeting_delay, async move {
                if let Err(e) = client.send_message(&greeting) {
                    tracing::debug!("Relay greeting failed: {}", e);
                }
            });
    }
}

impl Drop for PeerSession {
    fn drop(&mut self) {
        self.scheduler.cancel_all();
    }
}

async fn recv_or_pending<T>(rx: &mut Option<mpsc::UnboundedReceiver<T>>) -> Option<T> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Append `data` to `buffer` and take every complete line out of it
fn drain_lines(buffer: &mut Vec<u8>, data: &[u8]) -> Vec<String> {
    buffer.extend_from_slice(data);
    let mut lines = Vec::new();
    while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
        let raw: Vec<u8> = buffer.drain(..=pos).collect();
        let line = String::from_utf8_lossy(&raw[..pos]);
        let line = line.trim_end_matches('\r');
        if !line.is_empty() {
            lines.push(line.to_string());
        }
    }
    if buffer.len() > MAX_LINE_BYTES {
        tracing::warn!("Discarding oversized partial line ({} bytes)", buffer.len());
        buffer.clear();
    }
    lines
}

/// Split `"<name>: <text>"`; lines without a name are attributed to `fallback`
fn split_sender<'a>(line: &'a str, fallback: &'a str) -> (&'a str, &'a str) {
    match line.split_once(": ") {
        Some((name, text)) if !name.is_empty() => (name, text),
        _ => (fallback, line),
    }
}

// ============================================================================
// TESTS
// ============================================================================
