use anyhow::Context;
use beacon::gateway::EventFrame;
use beacon::registry::PeerInfo;
use clap::{Parser, Subcommand};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio_tungstenite::tungstenite::Message;

const DEFAULT_WATCH_URL: &str = "ws://127.0.0.1:5000/ws";

#[derive(Parser)]
#[command(name = "beacon")]
#[command(about = "Beacon rendezvous server", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Run the gateway (HTTP liveness + WebSocket signaling on one port).
    Serve {
        /// Config file path (default: BEACON_CONFIG_PATH or ~/.beacon/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        /// Listen port (default: PORT env, then config, then 5000)
        #[arg(long, short)]
        port: Option<u16>,
    },

    /// Join a room and print who comes and goes (diagnostic client).
    Watch {
        /// Gateway WebSocket URL.
        #[arg(long, default_value = DEFAULT_WATCH_URL)]
        url: String,

        /// Display name (default: a random "Adjective Animal").
        #[arg(long)]
        name: Option<String>,

        /// Peer id to register (default: a fresh UUID).
        #[arg(long, value_name = "ID")]
        peer_id: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("beacon {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Serve { config, port }) => {
            if let Err(e) = run_serve(config, port).await {
                log::error!("gateway failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Watch { url, name, peer_id }) => {
            if let Err(e) = run_watch(url, name, peer_id).await {
                log::error!("watch failed: {:#}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

async fn run_serve(
    config_path: Option<std::path::PathBuf>,
    port: Option<u16>,
) -> anyhow::Result<()> {
    let (mut config, path) = beacon::config::load_config(config_path)?;
    config.gateway.port = port.unwrap_or_else(|| beacon::config::resolve_port(&config));
    log::info!(
        "starting gateway on {}:{} (config {})",
        config.gateway.bind,
        config.gateway.port,
        path.display()
    );
    beacon::gateway::run_gateway(config).await
}

const ADJECTIVES: [&str; 8] = [
    "Happy", "Quiet", "Swift", "Brave", "Clever", "Calm", "Mighty", "Sunny",
];
const ANIMALS: [&str; 8] = [
    "Panda", "Fox", "Eagle", "Otter", "Tiger", "Dolphin", "Wolf", "Heron",
];

/// Random "Adjective Animal" label, the kind browser clients pick for themselves.
fn random_name() -> String {
    let bytes = uuid::Uuid::new_v4().into_bytes();
    format!(
        "{} {}",
        ADJECTIVES[bytes[0] as usize % ADJECTIVES.len()],
        ANIMALS[bytes[1] as usize % ANIMALS.len()]
    )
}

#[derive(Debug, Deserialize)]
struct PeerLeftPayload {
    peer_id: String,
}

async fn run_watch(
    url: String,
    name: Option<String>,
    peer_id: Option<String>,
) -> anyhow::Result<()> {
    let peer_id = peer_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let name = name.unwrap_or_else(random_name);

    let (mut ws, _) = tokio_tungstenite::connect_async(url.as_str())
        .await
        .with_context(|| format!("connecting to {}", url))?;

    let join = serde_json::json!({
        "type": "event",
        "event": "join",
        "payload": { "peer_id": peer_id, "name": name }
    });
    ws.send(Message::Text(join.to_string()))
        .await
        .context("sending join")?;
    println!("joined as {} ({})", name, peer_id);

    while let Some(msg) = ws.next().await {
        let msg = msg.context("reading from gateway")?;
        let Message::Text(text) = msg else { continue };
        let frame: EventFrame = match serde_json::from_str(&text) {
            Ok(f) => f,
            Err(e) => {
                log::debug!("ignoring undecodable frame: {}", e);
                continue;
            }
        };
        match frame.event.as_str() {
            "existing_peers" => {
                let peers: Vec<PeerInfo> =
                    serde_json::from_value(frame.payload).context("existing_peers payload")?;
                if peers.is_empty() {
                    println!("no other peers here yet");
                }
                for p in peers {
                    println!("  {} ({})", p.name, p.peer_id);
                }
            }
            "peer_joined" => {
                let p: PeerInfo =
                    serde_json::from_value(frame.payload).context("peer_joined payload")?;
                println!("+ {} ({})", p.name, p.peer_id);
            }
            "peer_left" => {
                let p: PeerLeftPayload =
                    serde_json::from_value(frame.payload).context("peer_left payload")?;
                println!("- {}", p.peer_id);
            }
            "shutdown" => {
                println!("gateway is shutting down");
                break;
            }
            other => log::debug!("ignoring event {}", other),
        }
    }

    Ok(())
}
