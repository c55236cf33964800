//! Tether Server
//!
//! A standalone WebSocket server that logs connection activity and echoes
//! every inbound message back to its sender.

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::sync::Arc;
use tether_core::{MessageEnvelope, ServerCore, StartOutcome};
use tether_transport::{WebSocketServer, WebSocketServerConfig};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tether-server")]
#[command(about = "Tether WebSocket echo server")]
#[command(version)]
struct Cli {
    /// Interface to bind
    #[arg(long)]
    host: Option<String>,

    /// Listening port
    #[arg(short, long, env = "PORT")]
    port: Option<u16>,

    /// Event name carried by message frames
    #[arg(short, long)]
    event: Option<String>,

    /// Config file path (TOML)
    #[arg(short, long)]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn load_config(cli: &Cli) -> Result<WebSocketServerConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading config file {}", path))?;
            toml::from_str(&raw).with_context(|| format!("parsing config file {}", path))?
        }
        None => WebSocketServerConfig::default(),
    };

    if let Some(host) = &cli.host {
        config.host = host.clone();
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(event) = &cli.event {
        config.event_name = event.clone();
    }
    Ok(config)
}

fn echo(core: &Arc<ServerCore>) {
    core.connection_established()
        .subscribe(|id| tracing::info!("client connected: {}", id));
    core.connection_dropped()
        .subscribe(|id| tracing::info!("client disconnected: {}", id));

    let weak = Arc::downgrade(core);
    core.message_received().subscribe(move |envelope| {
        let Some(core) = weak.upgrade() else { return };
        let reply = MessageEnvelope::new(envelope.connection_id.clone(), envelope.payload.clone());
        if !core.send_message(reply) {
            tracing::debug!("client {} left before the echo", envelope.connection_id);
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = load_config(&cli)?;
    tracing::info!("Starting Tether server on {}", config.addr());

    let server = WebSocketServer::new(config)?;
    echo(server.core());

    if server.core().start_and_wait().await? == StartOutcome::Failed {
        bail!("server failed to start");
    }
    tracing::info!("Server ready, accepting connections...");

    // Run until interrupted
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    server.core().stop_and_wait().await?;

    Ok(())
}
