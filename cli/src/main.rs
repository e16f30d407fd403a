// relaychat — relay server and terminal chat client
//
// `relaychat relay` runs the WebSocket relay; `relaychat chat` joins a relay
// under a stable identity and reads chat lines from stdin.

mod config;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use parking_lot::Mutex;
use relaychat_core::identity::{IdentityManager, PhraseStore, RecoveryPhrase};
use relaychat_core::relay::{RelayServer, RelayServerConfig};
use relaychat_core::session::{PeerSession, SessionConfig, SessionDelegate};
use relaychat_core::transport::TransportKind;
use std::collections::BTreeSet;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "relaychat")]
#[command(about = "relaychat — peer-to-peer chat over a relay", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a relay server
    Relay {
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Join a relay and chat
    Chat {
        #[arg(short, long)]
        name: Option<String>,
        /// Relay URL, e.g. ws://localhost:8080
        #[arg(short, long)]
        relay: Option<String>,
        /// Greeting sent to every peer that joins
        #[arg(short, long)]
        greet: Option<String>,
        /// Use a throwaway identity instead of the stored one
        #[arg(long)]
        ephemeral: bool,
    },
    /// Show or manage the identity
    Identity {
        #[command(subcommand)]
        action: Option<IdentityAction>,
    },
    /// Configure settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum IdentityAction {
    Show,
    /// Print the recovery phrase
    Export,
    /// Replace the stored phrase
    Restore { phrase: String },
}

#[derive(Subcommand)]
enum ConfigAction {
    Set { key: String, value: String },
    Get { key: String },
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = match cli.command {
        Commands::Relay { .. } => "info",
        _ => "warn",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .init();

    match cli.command {
        Commands::Relay { port } => cmd_relay(port).await,
        Commands::Chat {
            name,
            relay,
            greet,
            ephemeral,
        } => cmd_chat(name, relay, greet, ephemeral).await,
        Commands::Identity { action } => cmd_identity(action),
        Commands::Config { action } => cmd_config(action),
    }
}

async fn cmd_relay(port: Option<u16>) -> Result<()> {
    let config = config::Config::load()?;
    let port = port.unwrap_or(config.relay_port);
    tracing::info!("Starting relay on port {} (topic {})", port, config.topic);

    let server = RelayServer::with_config(RelayServerConfig {
        topic: config.topic.clone(),
        ..RelayServerConfig::with_port(port)
    });

    println!("{}", "relaychat relay".bold());
    println!("  Listening: {}", format!("ws://0.0.0.0:{}", port).bright_cyan());
    println!("  Topic:     {}", config.topic.bright_yellow());
    println!();

    server
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("Relay server failed")?;

    let stats = server.get_stats();
    println!();
    println!("{}", "Relay stopped".bold());
    println!("  Connections: {}", stats.router.connections_accepted);
    println!("  Routed:      {}", stats.router.frames_routed);
    println!("  Dropped:     {}", stats.router.frames_dropped);
    Ok(())
}

/// Prints session events to the terminal and tracks who is online
struct ConsoleDelegate {
    online: Mutex<BTreeSet<String>>,
}

impl ConsoleDelegate {
    fn new() -> Self {
        Self {
            online: Mutex::new(BTreeSet::new()),
        }
    }
}

impl SessionDelegate for ConsoleDelegate {
    fn on_line(&self, from: &str, line: &str) {
        println!("\r{} {}: {}", "←".bright_blue(), from.bright_cyan(), line);
        prompt();
    }

    fn on_peer_connected(&self, peer: &str, kind: TransportKind) {
        if self.online.lock().insert(peer.to_string()) {
            println!("\r{} {} joined ({})", "✓".green(), peer.bright_cyan(), kind);
            prompt();
        }
    }

    fn on_peer_disconnected(&self, peer: &str) {
        if self.online.lock().remove(peer) {
            println!("\r{} {} left", "✗".red(), peer.bright_cyan());
            prompt();
        }
    }
}

fn prompt() {
    print!("> ");
    let _ = std::io::stdout().flush();
}

async fn cmd_chat(
    name: Option<String>,
    relay: Option<String>,
    greet: Option<String>,
    ephemeral: bool,
) -> Result<()> {
    let config = config::Config::load()?;

    let mut identity = IdentityManager::with_store(PhraseStore::file(config::Config::phrase_file()?));
    let identity = if ephemeral {
        identity.initialize_ephemeral().clone()
    } else {
        identity
            .initialize()
            .context("Failed to load identity")?
            .clone()
    };

    let session_config = SessionConfig {
        name: name.unwrap_or_else(|| config.name.clone()),
        topic: config.topic.clone(),
        greeting: greet.or_else(|| config.greeting.clone()),
        reannounce_interval: Duration::from_secs(config.reannounce_secs),
        ..Default::default()
    };
    let relay_url = relay.unwrap_or_else(|| config.relay_url.clone());

    println!("{}", "relaychat".bold());
    println!("  Name:    {}", session_config.name.bright_cyan());
    println!("  Peer ID: {}", identity.peer_id().bright_yellow());
    println!("  Relay:   {}", relay_url);
    println!();

    let delegate = Arc::new(ConsoleDelegate::new());
    let mut session = PeerSession::new(identity, session_config, delegate.clone());
    let relay_events = session
        .connect_relay(&relay_url)
        .await
        .with_context(|| format!("Failed to connect to relay {}", relay_url))?;
    println!("{} Connected", "✓".green());
    println!("Type a message and press Enter. {} lists peers, {} exits.", "/peers".bright_green(), "/quit".bright_green());
    println!();

    let (outgoing_tx, outgoing_rx) = tokio::sync::mpsc::unbounded_channel();
    let session_task = tokio::spawn(session.run(None, Some(relay_events), outgoing_rx));

    let stdin_task = tokio::spawn(async move {
        use tokio::io::AsyncBufReadExt;

        let stdin = tokio::io::BufReader::new(tokio::io::stdin());
        let mut lines = stdin.lines();
        prompt();

        while let Ok(Some(line)) = lines.next_line().await {
            let line = line.trim();
            match line {
                "" => {}
                "/quit" | "/exit" => break,
                "/peers" => {
                    let online = delegate.online.lock();
                    if online.is_empty() {
                        println!("{}", "No peers.".dimmed());
                    } else {
                        for peer in online.iter() {
                            println!("  • {}", peer.bright_cyan());
                        }
                    }
                }
                text => {
                    if delegate.online.lock().is_empty() {
                        println!("{}", "No peers connected; message not sent.".dimmed());
                    } else if outgoing_tx.send(text.to_string()).is_err() {
                        break;
                    }
                }
            }
            prompt();
        }
        println!("Shutting down...");
    });

    tokio::select! {
        _ = stdin_task => {}
        _ = tokio::signal::ctrl_c() => {}
    }
    session_task.abort();
    let _ = session_task.await;
    Ok(())
}

fn cmd_identity(action: Option<IdentityAction>) -> Result<()> {
    let phrase_file = config::Config::phrase_file()?;
    let mut manager = IdentityManager::with_store(PhraseStore::file(&phrase_file));

    match action {
        None | Some(IdentityAction::Show) => {
            let identity = manager.initialize().context("Failed to load identity")?;
            println!("{}", "Identity Information".bold());
            println!("  Peer ID:     {}", identity.peer_id().bright_yellow());
            println!("  Phrase file: {}", phrase_file.display().to_string().bright_cyan());
        }
        Some(IdentityAction::Export) => {
            manager.initialize().context("Failed to load identity")?;
            let phrase = manager
                .stored_phrase()
                .context("Failed to read recovery phrase")?
                .context("No recovery phrase stored")?;
            println!("{}", "Export Identity (Backup)".bold());
            println!();
            println!("{}", "⚠️  WARNING: anyone with this phrase can use your identity!".bright_red().bold());
            println!();
            println!("  {}", phrase.as_str());
        }
        Some(IdentityAction::Restore { phrase }) => {
            let phrase = RecoveryPhrase::parse(&phrase).context("Invalid recovery phrase")?;
            let identity = manager.restore(&phrase).context("Failed to restore identity")?;
            println!("{} Identity restored", "✓".green());
            println!("  Peer ID: {}", identity.peer_id().bright_yellow());
        }
    }

    Ok(())
}

fn cmd_config(action: ConfigAction) -> Result<()> {
    let mut config = config::Config::load()?;

    match action {
        ConfigAction::Set { key, value } => {
            config.set(&key, &value)?;
            config.save()?;
            println!("{} Set {} = {}", "✓".green(), key.bright_cyan(), value);
        }
        ConfigAction::Get { key } => match config.get(&key) {
            Some(value) => println!("{} = {}", key.bright_cyan(), value),
            None => println!("{} {} is not set", "✗".red(), key),
        },
        ConfigAction::List => {
            println!("{}", "Configuration".bold());
            println!();
            for (key, value) in config.list() {
                println!("  {:<20} {}", key.bright_cyan(), value);
            }
        }
    }

    Ok(())
}
