use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use relaychat_core::identity::Identity;
use relaychat_core::relay::{
    RelayClient, RelayClientConfig, RelayEvent, RelayFrame, RelayServer, RelayServerConfig,
};
use relaychat_core::session::{PeerSession, SessionConfig, SessionDelegate};
use relaychat_core::transport::{ChannelLink, ConnectionEvent, TransportKind};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

const WAIT: Duration = Duration::from_secs(5);

async fn start_relay() -> (RelayServer, SocketAddr) {
    let server = RelayServer::with_config(RelayServerConfig {
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        topic: "test-room".to_string(),
        ..Default::default()
    });
    let listener = server.bind().await.unwrap();
    let addr = listener.local_addr().unwrap();
    let serving = server.clone();
    tokio::spawn(async move {
        serving.serve(listener).await;
    });
    (server, addr)
}

fn client_config(addr: SocketAddr, name: &str) -> RelayClientConfig {
    RelayClientConfig {
        url: format!("ws://{}", addr),
        topic: "test-room".to_string(),
        name: name.to_string(),
        public_key: Some(Identity::generate().peer_id()),
        is_browser: false,
    }
}

async fn next_event(events: &mut mpsc::UnboundedReceiver<RelayEvent>) -> RelayEvent {
    tokio::time::timeout(WAIT, events.recv())
        .await
        .expect("timed out waiting for relay event")
        .expect("relay event channel closed")
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn test_relay_clients_announce_message_disconnect() {
    let (server, addr) = start_relay().await;

    let (alice, mut alice_events) = RelayClient::connect(client_config(addr, "alice")).await.unwrap();
    assert_eq!(next_event(&mut alice_events).await, RelayEvent::Peers(vec![]));
    alice.announce().unwrap();
    alice.lookup().unwrap();
    assert_eq!(next_event(&mut alice_events).await, RelayEvent::Peers(vec![]));

    let (bob, mut bob_events) = RelayClient::connect(client_config(addr, "bob")).await.unwrap();
    assert_eq!(
        next_event(&mut bob_events).await,
        RelayEvent::Peers(vec!["alice".to_string()])
    );

    bob.announce().unwrap();
    assert_eq!(
        next_event(&mut alice_events).await,
        RelayEvent::PeerConnected {
            peer_id: "bob".to_string(),
            is_browser: false,
        }
    );

    // keep-alive announce is absorbed
    bob.announce().unwrap();
    bob.send_message("hi").unwrap();
    assert_eq!(
        next_event(&mut alice_events).await,
        RelayEvent::Message {
            from_peer: Some("bob".to_string()),
            data: "hi".to_string(),
            is_browser: false,
        }
    );

    drop(bob);
    assert_eq!(
        next_event(&mut alice_events).await,
        RelayEvent::PeerDisconnected {
            peer_id: "bob".to_string()
        }
    );
    wait_until(|| server.peer_ids() == vec!["alice".to_string()]).await;

    let stats = server.get_stats();
    assert_eq!(stats.connections_active, 1);
    assert_eq!(stats.peers_announced, 1);
    assert_eq!(stats.router.connections_accepted, 2);
}

#[tokio::test]
async fn test_malformed_frames_do_not_drop_connection() {
    let (server, addr) = start_relay().await;
    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{}", addr))
        .await
        .unwrap();

    // initial peer list
    let first = tokio::time::timeout(WAIT, ws.next()).await.unwrap().unwrap().unwrap();
    assert!(matches!(
        RelayFrame::parse(first.to_text().unwrap()).unwrap(),
        RelayFrame::Peers { .. }
    ));

    ws.send(Message::Text("definitely not json".to_string())).await.unwrap();
    ws.send(Message::Text(r#"{"no":"type"}"#.to_string())).await.unwrap();
    ws.send(Message::Binary(br#"{"type":"lookup","topic":"elsewhere"}"#.to_vec()))
        .await
        .unwrap();

    let reply = tokio::time::timeout(WAIT, ws.next()).await.unwrap().unwrap().unwrap();
    match RelayFrame::parse(reply.to_text().unwrap()).unwrap() {
        RelayFrame::Peers { topic, peers, .. } => {
            assert_eq!(topic, "elsewhere");
            assert!(peers.is_empty());
        }
        other => panic!("Expected peers, got {:?}", other),
    }
    assert_eq!(server.get_stats().router.frames_dropped, 2);
}

#[derive(Default)]
struct Recorder {
    lines: Mutex<Vec<(String, String)>>,
    connected: Mutex<Vec<String>>,
}

impl Recorder {
    fn count_lines(&self, from: &str, line: &str) -> usize {
        self.lines
            .lock()
            .iter()
            .filter(|(f, l)| f == from && l == line)
            .count()
    }
}

impl SessionDelegate for Recorder {
    fn on_line(&self, from: &str, line: &str) {
        self.lines.lock().push((from.to_string(), line.to_string()));
    }

    fn on_peer_connected(&self, peer: &str, _kind: TransportKind) {
        self.connected.lock().push(peer.to_string());
    }

    fn on_peer_disconnected(&self, _peer: &str) {}
}

fn session_config(name: &str) -> SessionConfig {
    SessionConfig {
        name: name.to_string(),
        topic: "test-room".to_string(),
        ..Default::default()
    }
}

async fn start_session(
    addr: SocketAddr,
    name: &str,
) -> (Arc<Recorder>, mpsc::UnboundedSender<String>) {
    start_session_with(addr, session_config(name)).await
}

async fn start_session_with(
    addr: SocketAddr,
    config: SessionConfig,
) -> (Arc<Recorder>, mpsc::UnboundedSender<String>) {
    let recorder = Arc::new(Recorder::default());
    let mut session = PeerSession::new(Identity::generate(), config, recorder.clone());
    let events = session.connect_relay(&format!("ws://{}", addr)).await.unwrap();

    let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
    tokio::spawn(session.run(None, Some(events), outgoing_rx));
    (recorder, outgoing_tx)
}

#[tokio::test]
async fn test_sessions_chat_through_relay() {
    let (server, addr) = start_relay().await;

    let (alice, alice_out) = start_session(addr, "alice").await;
    wait_until(|| server.peer_ids() == vec!["alice".to_string()]).await;

    let (bob, _bob_out) = start_session(addr, "bob").await;
    wait_until(|| bob.connected.lock().contains(&"alice".to_string())).await;
    wait_until(|| alice.connected.lock().contains(&"bob".to_string())).await;

    alice_out.send("hello bob".to_string()).unwrap();
    wait_until(|| !bob.lines.lock().is_empty()).await;
    assert_eq!(
        bob.lines.lock().clone(),
        vec![("alice".to_string(), "hello bob".to_string())]
    );
    // no echo back to the sender
    assert!(alice.lines.lock().is_empty());
}

#[tokio::test]
async fn test_greeter_greets_existing_peers_once() {
    let (server, addr) = start_relay().await;

    let (bob, _bob_out) = start_session(addr, "bob").await;
    let (carol, _carol_out) = start_session(addr, "carol").await;
    wait_until(|| {
        let mut ids = server.peer_ids();
        ids.sort();
        ids == vec!["bob".to_string(), "carol".to_string()]
    })
    .await;

    let config = SessionConfig {
        greeting: Some("welcome".to_string()),
        greeting_delay: Duration::from_millis(100),
        ..session_config("gina")
    };
    let (_gina, _gina_out) = start_session_with(addr, config).await;

    wait_until(|| bob.count_lines("gina", "welcome") > 0 && carol.count_lines("gina", "welcome") > 0)
        .await;
    // leave room for a second greeting to show up if one was sent
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(bob.count_lines("gina", "welcome"), 1);
    assert_eq!(carol.count_lines("gina", "welcome"), 1);
}

#[tokio::test]
async fn test_peer_named_relay_leaves_keepalive_running() {
    let (_server, addr) = start_relay().await;

    let mut session = PeerSession::new(
        Identity::generate(),
        session_config("alice"),
        Arc::new(Recorder::default()),
    );
    let _events = session.connect_relay(&format!("ws://{}", addr)).await.unwrap();
    assert_eq!(session.pending_tasks(), 1);

    session.handle_relay_event(RelayEvent::PeerConnected {
        peer_id: "relay".to_string(),
        is_browser: true,
    });
    session.handle_relay_event(RelayEvent::PeerDisconnected {
        peer_id: "relay".to_string(),
    });
    assert_eq!(session.pending_tasks(), 1);

    let (link, _rx) = ChannelLink::new("relay");
    session.handle_connection_event(ConnectionEvent::Opened {
        peer_key: "relay-keepalive".to_string(),
        link: Arc::new(link),
        kind: TransportKind::Native,
    });
    session.handle_connection_event(ConnectionEvent::Closed {
        peer_key: "relay-keepalive".to_string(),
    });
    assert_eq!(session.pending_tasks(), 1);
    assert_eq!(session.peer_count(), 0);
}

#[tokio::test]
async fn test_accept_errors_do_not_stop_relay() {
    let server = RelayServer::with_config(RelayServerConfig {
        topic: "test-room".to_string(),
        ..Default::default()
    });
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let failures = futures::stream::iter([
        Err(std::io::Error::new(std::io::ErrorKind::ConnectionAborted, "aborted")),
        Err(std::io::Error::from_raw_os_error(24)),
    ]);
    let accepted = futures::stream::unfold(listener, |listener| async move {
        let accepted = listener.accept().await;
        Some((accepted, listener))
    });
    let serving = server.clone();
    tokio::spawn(async move {
        serving.serve_incoming(failures.chain(accepted)).await;
    });

    let (_alice, mut alice_events) = RelayClient::connect(client_config(addr, "alice")).await.unwrap();
    assert_eq!(next_event(&mut alice_events).await, RelayEvent::Peers(vec![]));
    assert_eq!(server.get_stats().router.connections_accepted, 1);
}
