use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;

use palaver_core::presence::PresenceStatus;
use palaver_store::StoreGateway;

use crate::connection::{self, ConnectionRegistry};
use crate::relay::Relay;

/// Server configuration. The sweep cadences are deliberate constants of
/// the protocol rather than an exposed tuning surface; they live here so
/// tests can shrink them.
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_send_queue: usize,
    pub heartbeat_interval: Duration,
    pub typing_ttl: Duration,
    pub typing_sweep_interval: Duration,
    pub presence_stale_after: Duration,
    pub presence_sweep_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8090,
            max_send_queue: 256,
            heartbeat_interval: Duration::from_secs(30),
            typing_ttl: Duration::from_secs(10),
            typing_sweep_interval: Duration::from_secs(10),
            presence_stale_after: Duration::from_secs(300),
            presence_sweep_interval: Duration::from_secs(60),
        }
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub relay: Arc<Relay>,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// Create and start the server. Returns a handle that keeps the listener
/// and background sweeps alive.
pub async fn start(
    config: ServerConfig,
    gateway: Arc<dyn StoreGateway>,
) -> Result<ServerHandle, std::io::Error> {
    let connections = Arc::new(ConnectionRegistry::new(config.max_send_queue));
    let relay = Arc::new(Relay::new(gateway, connections));

    let _heartbeat = start_heartbeat_sweep(Arc::clone(&relay), config.heartbeat_interval);
    let _typing = start_typing_sweep(
        Arc::clone(&relay),
        config.typing_ttl,
        config.typing_sweep_interval,
    );
    let _presence = start_presence_sweep(
        Arc::clone(&relay),
        config.presence_stale_after,
        config.presence_sweep_interval,
    );

    let router = build_router(AppState { relay: Arc::clone(&relay) });
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(addr = %local_addr, "Relay server started");

    let server = tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        relay,
        _server: server,
        _heartbeat,
        _typing,
        _presence,
    })
}

/// Handle returned by `start()`. Keeps the listener and sweep tasks
/// alive; exposes the relay so tests can inspect registry state.
pub struct ServerHandle {
    pub port: u16,
    pub relay: Arc<Relay>,
    _server: tokio::task::JoinHandle<()>,
    _heartbeat: tokio::task::JoinHandle<()>,
    _typing: tokio::task::JoinHandle<()>,
    _presence: tokio::task::JoinHandle<()>,
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (conn_id, rx) = state.relay.connections().register();
    tracing::info!(connection_id = %conn_id, "Connection opened");
    connection::handle_ws_connection(socket, conn_id, rx, state.relay).await;
}

/// Liveness probe for external monitors: any text body, 200 status.
async fn health_handler() -> impl IntoResponse {
    "ok"
}

/// Ping idle connections and terminate ones that stayed silent through a
/// full interval. Removal closes the writer channel; the connection's
/// own handler then runs the standard disconnect cleanup.
fn start_heartbeat_sweep(relay: Arc<Relay>, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await; // consume the immediate first tick
        loop {
            ticker.tick().await;
            let dead = relay.connections().heartbeat_sweep();
            for conn_id in dead {
                tracing::info!(connection_id = %conn_id, "Heartbeat timeout, terminating");
                relay.connections().remove(&conn_id);
            }
        }
    })
}

/// Expire typing rows left behind by clients that vanished without a
/// typing_stop. Store failures are logged and the sweep continues.
fn start_typing_sweep(
    relay: Arc<Relay>,
    ttl: Duration,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::seconds(10));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match relay.gateway().sweep_expired_typing(ttl) {
                Ok(0) => {}
                Ok(removed) => tracing::debug!(removed, "Expired typing indicators"),
                Err(err) => tracing::warn!(error = %err, "Typing sweep failed"),
            }
        }
    })
}

/// Demote long-idle online participants to away and tell their peers.
fn start_presence_sweep(
    relay: Arc<Relay>,
    stale_after: Duration,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    let stale_after =
        chrono::Duration::from_std(stale_after).unwrap_or_else(|_| chrono::Duration::seconds(300));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match relay.gateway().demote_stale_presence(stale_after) {
                Ok(demoted) => {
                    for identity in demoted {
                        tracing::debug!(identity = %identity, "Presence demoted to away");
                        relay.announce_status(&identity, PresenceStatus::Away);
                    }
                }
                Err(err) => tracing::warn!(error = %err, "Presence sweep failed"),
            }
        }
    })
}
