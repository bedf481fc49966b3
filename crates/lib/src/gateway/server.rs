//! Gateway HTTP + WebSocket server (single port).

use crate::config::{Config, CorsConfig};
use crate::gateway::connections::ConnectionTable;
use crate::gateway::protocol::{ClientEvent, JoinParams, ServerEvent};
use crate::grouping::{self, FORWARDED_FOR_HEADER};
use crate::registry::{ConnectionId, Departure, JoinOutcome, Registry, RoomId};
use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    http::{HeaderMap, HeaderValue},
    response::Response,
    routing::get,
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

/// Body of the liveness endpoint.
pub const HEALTH_TEXT: &str = "Signaling Server Running";

/// Shared state for the gateway (config, registry, open connections).
#[derive(Clone)]
pub struct GatewayState {
    pub config: Arc<Config>,
    pub registry: Registry,
    pub connections: Arc<ConnectionTable>,
    /// Fires once when graceful shutdown begins; every socket loop subscribes.
    pub shutdown_tx: broadcast::Sender<()>,
}

impl GatewayState {
    pub fn new(config: Config) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config: Arc::new(config),
            registry: Registry::new(),
            connections: Arc::new(ConnectionTable::new()),
            shutdown_tx,
        }
    }
}

/// Build the CORS layer from config: any origin when `*` is listed, else the explicit list.
fn cors_layer(cors: &CorsConfig) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if cors.allows_any() {
        return layer.allow_origin(Any);
    }
    let origins: Vec<HeaderValue> = cors
        .allowed_origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o.trim()) {
            Ok(v) => Some(v),
            Err(_) => {
                log::warn!("ignoring invalid CORS origin: {:?}", o);
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(origins))
}

/// Router for the gateway: `GET /` (liveness) and `GET /ws` (WebSocket).
pub fn router(state: GatewayState) -> Router {
    let cors = cors_layer(&state.config.gateway.cors);
    Router::new()
        .route("/", get(health_http))
        .route("/ws", get(ws_handler))
        .with_state(state)
        .layer(cors)
}

/// Run the gateway server; binds to config.gateway.bind:config.gateway.port.
/// Blocks until shutdown (e.g. Ctrl+C).
pub async fn run_gateway(config: Config) -> Result<()> {
    let bind_addr = format!("{}:{}", config.gateway.bind.trim(), config.gateway.port);
    let state = GatewayState::new(config);
    let app = router(state.clone());

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding to {}", bind_addr))?;
    log::info!("gateway listening on {}", bind_addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(state.clone()))
    .await
    .context("gateway server exited")?;
    log::info!(
        "gateway stopped ({} peer(s) still registered)",
        state.registry.peer_count().await
    );
    Ok(())
}

/// Future that completes when the process should shut down (SIGINT or SIGTERM).
/// Tells every open socket to send `shutdown` and close.
async fn shutdown_signal(state: GatewayState) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::info!(
        "shutdown signal received, closing {} connection(s)",
        state.connections.len().await
    );
    let _ = state.shutdown_tx.send(());
}

/// GET / returns a fixed confirmation string (liveness check).
async fn health_http() -> &'static str {
    HEALTH_TEXT
}

/// GET /ws upgrades to WebSocket. The room is fixed here from the connection's origin.
async fn ws_handler(
    State(state): State<GatewayState>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let forwarded_for = if state.config.gateway.trust_forwarded_for {
        headers
            .get(FORWARDED_FOR_HEADER)
            .and_then(|v| v.to_str().ok())
    } else {
        None
    };
    let room_id = grouping::room_for_origin(forwarded_for, remote.ip());
    ws.on_upgrade(move |socket| handle_socket(socket, state, room_id))
}

async fn handle_socket(mut socket: WebSocket, state: GatewayState, room_id: RoomId) {
    let connection: ConnectionId = format!("conn-{}", uuid::Uuid::new_v4());
    let (tx, mut outbound_rx) = mpsc::channel::<String>(state.config.gateway.outbound_buffer.max(1));
    state.connections.register(connection.clone(), tx).await;
    let mut shutdown_rx = state.shutdown_tx.subscribe();
    log::debug!("{} opened (room {})", connection, room_id);

    loop {
        tokio::select! {
            biased;

            _ = shutdown_rx.recv() => {
                let _ = socket.send(Message::Text(ServerEvent::Shutdown.to_json())).await;
                break;
            }
            outbound = outbound_rx.recv() => {
                let Some(text) = outbound else { break };
                if socket.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            msg = socket.recv() => {
                let Some(Ok(msg)) = msg else { break };
                let text = match msg {
                    Message::Text(text) => text,
                    Message::Close(_) => break,
                    _ => continue,
                };
                match ClientEvent::decode(&text) {
                    Ok(ClientEvent::Join(params)) => {
                        handle_join(&state, &connection, &room_id, params).await;
                    }
                    Err(e) => log::debug!("{}: ignoring frame: {}", connection, e),
                }
            }
        }
    }

    state.connections.unregister(&connection).await;
    handle_disconnect(&state, &connection).await;
}

/// Register the peer, then queue `peer_joined` to the room and `existing_peers` to the
/// joiner before the registry lock is released.
async fn handle_join(
    state: &GatewayState,
    connection: &str,
    room_id: &RoomId,
    params: JoinParams,
) {
    let peer_id = params.peer_id.unwrap_or_default();
    let Some(outcome) = state
        .registry
        .join(&peer_id, params.name, room_id.clone(), connection.to_string())
        .await
    else {
        log::debug!("{}: join without peer_id ignored", connection);
        return;
    };

    log::info!(
        "peer {} ({}) joined room {}",
        outcome.peer.peer_id,
        outcome.peer.name,
        outcome.room_id
    );
    announce_join(&state.connections, connection, &outcome).await;
}

/// Drop the peer owned by `connection` (if any) and queue `peer_left` to its room.
async fn handle_disconnect(state: &GatewayState, connection: &str) {
    match state.registry.disconnect(connection).await {
        Some(departure) => {
            log::info!("peer {} disconnected", departure.peer_id);
            announce_departure(&state.connections, &departure).await;
        }
        None => log::debug!("{} closed without a registered peer", connection),
    }
}

async fn announce_join(connections: &ConnectionTable, joiner: &str, outcome: &JoinOutcome) {
    connections
        .broadcast(
            &outcome.recipients,
            &ServerEvent::PeerJoined(outcome.peer.clone()),
        )
        .await;
    let existing = ServerEvent::ExistingPeers(outcome.existing_peers.clone());
    if let Err(e) = connections.send(joiner, &existing).await {
        log::warn!("dropping existing_peers event: {}", e);
    }
}

async fn announce_departure(connections: &ConnectionTable, departure: &Departure) {
    let event = ServerEvent::PeerLeft {
        peer_id: departure.peer_id.clone(),
    };
    connections.broadcast(&departure.recipients, &event).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use std::time::Duration;

    fn join_params(peer_id: &str) -> JoinParams {
        JoinParams {
            peer_id: Some(peer_id.to_string()),
            name: None,
        }
    }

    async fn open(state: &GatewayState, id: &str) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(8);
        state.connections.register(id.to_string(), tx).await;
        rx
    }

    fn event_of(text: &str) -> (String, Value) {
        let v: Value = serde_json::from_str(text).unwrap();
        (v["event"].as_str().unwrap().to_string(), v["payload"].clone())
    }

    #[tokio::test]
    async fn departure_racing_a_join_is_queued_after_existing_peers() {
        let state = GatewayState::new(Config::default());
        let room: RoomId = "room_k".into();
        let _rx1 = open(&state, "c1").await;
        let mut rx2 = open(&state, "c2").await;
        handle_join(&state, "c1", &room, join_params("p1")).await;

        // p2's join is applied but its frames are not queued yet; c1 closes meanwhile.
        let joined = state
            .registry
            .join("p2", None, room.clone(), "c2".to_string())
            .await
            .unwrap();
        let closer = state.clone();
        let closing = tokio::spawn(async move {
            closer.connections.unregister("c1").await;
            handle_disconnect(&closer, "c1").await;
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!closing.is_finished());

        announce_join(&state.connections, "c2", &joined).await;
        drop(joined);
        closing.await.unwrap();

        let (event, payload) = event_of(&rx2.recv().await.unwrap());
        assert_eq!(event, "existing_peers");
        assert_eq!(payload[0]["peer_id"], "p1");
        let (event, payload) = event_of(&rx2.recv().await.unwrap());
        assert_eq!(event, "peer_left");
        assert_eq!(payload["peer_id"], "p1");
        assert!(state.registry.room_members("room_k").await.iter().all(|p| p.peer_id == "p2"));
    }

    #[tokio::test]
    async fn new_identity_on_a_connection_announces_only_the_join() {
        let state = GatewayState::new(Config::default());
        let room: RoomId = "room_k".into();
        let mut watcher = open(&state, "c0").await;
        let _rx1 = open(&state, "c1").await;
        handle_join(&state, "c0", &room, join_params("w")).await;
        handle_join(&state, "c1", &room, join_params("old")).await;
        handle_join(&state, "c1", &room, join_params("new")).await;

        let mut seen = Vec::new();
        while let Ok(text) = watcher.try_recv() {
            let (event, payload) = event_of(&text);
            seen.push((event, payload["peer_id"].as_str().map(str::to_string)));
        }
        assert_eq!(
            seen,
            vec![
                ("existing_peers".to_string(), None),
                ("peer_joined".to_string(), Some("old".to_string())),
                ("peer_joined".to_string(), Some("new".to_string())),
            ]
        );
    }
}
