//! WebSocket Fan-Out Server
//!
//! The client-facing surface: one HTTP listener carrying the live stream
//! endpoint and the operational endpoints.
//!
//! # Endpoints
//!
//! - `GET /live/{symbol}` - WebSocket price stream for one instrument
//! - `GET /health` - JSON status (leadership, backend mode, counts)
//! - `GET /healthz` - liveness probe (simple OK)
//! - `GET /metrics` - Prometheus metrics in text format
//!
//! The path symbol is whatever spelling the client uses; it is normalized
//! once at upgrade time and the connection is registered under the
//! canonical form. Any inbound frame counts as a keep-alive and refreshes
//! the symbol's interest; there is no unsubscribe verb, TTL decay is the
//! contract.
//!
//! Delivery runs through one process-wide fan-out task, started lazily on
//! the first connection: it drains the tick bus and copies each tick into
//! the per-connection channels for its symbol. A slow client only loses its
//! own frames; a closed one is pruned on the next delivery attempt.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use crate::application::ports::{InterestRegistry, TickBus};
use crate::domain::symbol::normalize;
use crate::infrastructure::metrics;
use crate::infrastructure::store::BackendMode;

/// Outbound frames buffered per connection before drops set in.
const CONNECTION_BUFFER: usize = 64;

/// Server startup/runtime failures.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Could not bind the listen port.
    #[error("failed to bind port {0}: {1}")]
    BindFailed(u16, String),
    /// The HTTP server failed while running.
    #[error("server failed: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Connection Registry
// =============================================================================

/// Live WebSocket connections, keyed by canonical symbol.
pub struct ConnectionRegistry {
    connections: parking_lot::RwLock<HashMap<String, HashMap<u64, mpsc::Sender<String>>>>,
    next_id: AtomicU64,
    fanout_started: AtomicBool,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            connections: parking_lot::RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            fanout_started: AtomicBool::new(false),
        }
    }

    /// Register a connection under a canonical symbol.
    pub fn register(&self, symbol: &str) -> (u64, mpsc::Receiver<String>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(CONNECTION_BUFFER);

        let mut connections = self.connections.write();
        connections
            .entry(symbol.to_string())
            .or_default()
            .insert(id, tx);
        metrics::set_open_connections(total(&connections));

        (id, rx)
    }

    /// Drop a connection; the symbol entry goes with its last connection.
    pub fn unregister(&self, symbol: &str, id: u64) {
        let mut connections = self.connections.write();
        if let Some(per_symbol) = connections.get_mut(symbol) {
            per_symbol.remove(&id);
            if per_symbol.is_empty() {
                connections.remove(symbol);
            }
        }
        metrics::set_open_connections(total(&connections));
    }

    /// Deliver one serialized tick to every connection on its symbol.
    ///
    /// A full buffer drops the frame for that connection only; a closed
    /// channel removes the connection.
    pub fn deliver(&self, symbol: &str, payload: &str) {
        let mut closed: Vec<u64> = Vec::new();
        {
            let connections = self.connections.read();
            let Some(per_symbol) = connections.get(symbol) else {
                return;
            };
            for (id, tx) in per_symbol {
                match tx.try_send(payload.to_string()) {
                    Ok(()) => metrics::record_tick_delivered(),
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        metrics::record_tick_dropped();
                        tracing::debug!(symbol, connection = id, "Slow client, frame dropped");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => closed.push(*id),
                }
            }
        }
        for id in closed {
            self.unregister(symbol, id);
        }
    }

    /// Open connections across all symbols.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        total(&self.connections.read())
    }

    /// Symbols with at least one connection.
    #[must_use]
    pub fn symbol_count(&self) -> usize {
        self.connections.read().len()
    }

    /// Start the fan-out task on the first call; later calls are no-ops.
    fn ensure_fanout(
        self: &Arc<Self>,
        bus: &Arc<dyn TickBus>,
        cancel: &CancellationToken,
    ) {
        if self.fanout_started.swap(true, Ordering::SeqCst) {
            return;
        }

        let registry = Arc::clone(self);
        let mut ticks = bus.subscribe();
        let cancel = cancel.clone();

        tokio::spawn(async move {
            tracing::info!("Fan-out task started");
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    received = ticks.recv() => match received {
                        Ok(tick) => match serde_json::to_string(&tick) {
                            Ok(payload) => registry.deliver(&tick.symbol, &payload),
                            Err(e) => tracing::warn!(error = %e, "Tick serialization failed"),
                        },
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            tracing::warn!(missed, "Fan-out lagged behind the bus");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            tracing::warn!("Tick bus closed");
                            break;
                        }
                    }
                }
            }
            tracing::info!("Fan-out task stopped");
        });
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn total(connections: &HashMap<String, HashMap<u64, mpsc::Sender<String>>>) -> usize {
    connections.values().map(HashMap::len).sum()
}

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always "healthy" while the process serves traffic; the interesting
    /// facts are the fields below.
    pub status: &'static str,
    /// Hub version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Whether this process is the polling leader.
    pub leader: bool,
    /// Which store backend is live ("redis" or "local").
    pub backend: &'static str,
    /// Open WebSocket connections.
    pub connections: usize,
    /// Symbols with at least one connection.
    pub streamed_symbols: usize,
}

// =============================================================================
// Hub Server
// =============================================================================

/// Shared state behind the router.
pub struct AppState {
    registry: Arc<ConnectionRegistry>,
    interest: Arc<dyn InterestRegistry>,
    bus: Arc<dyn TickBus>,
    leadership: tokio::sync::watch::Receiver<bool>,
    mode: BackendMode,
    version: String,
    started_at: Instant,
    cancel: CancellationToken,
}

impl AppState {
    /// Assemble the server state.
    #[must_use]
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        interest: Arc<dyn InterestRegistry>,
        bus: Arc<dyn TickBus>,
        leadership: tokio::sync::watch::Receiver<bool>,
        mode: BackendMode,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            registry,
            interest,
            bus,
            leadership,
            mode,
            version: env!("CARGO_PKG_VERSION").to_string(),
            started_at: Instant::now(),
            cancel,
        }
    }
}

/// The client-facing HTTP/WebSocket server.
pub struct HubServer {
    port: u16,
    state: Arc<AppState>,
    cancel: CancellationToken,
}

impl HubServer {
    /// Create a server on `port`.
    #[must_use]
    pub const fn new(port: u16, state: Arc<AppState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Router over the shared state, exposed for in-process tests.
    #[must_use]
    pub fn router(state: Arc<AppState>) -> Router {
        Router::new()
            .route("/live/{symbol}", get(live_handler))
            .route("/health", get(health_handler))
            .route("/healthz", get(liveness_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(state)
    }

    /// Run the server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `ServerError` if binding fails or the HTTP server encounters
    /// a fatal error while running.
    pub async fn run(self) -> Result<(), ServerError> {
        let app = Self::router(self.state);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Hub server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| ServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Hub server stopped");
        Ok(())
    }
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn live_handler(
    Path(symbol): Path<String>,
    State(state): State<Arc<AppState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let canonical = normalize(&symbol);
    ws.on_upgrade(move |socket| handle_stream(socket, canonical, state))
}

async fn handle_stream(socket: WebSocket, symbol: String, state: Arc<AppState>) {
    state.registry.ensure_fanout(&state.bus, &state.cancel);
    state.interest.touch(&symbol).await;

    let (id, mut outbound) = state.registry.register(&symbol);
    tracing::info!(symbol = %symbol, connection = id, "Stream opened");

    let (mut sink, mut source) = socket.split();
    loop {
        tokio::select! {
            payload = outbound.recv() => {
                let Some(payload) = payload else { break };
                if sink.send(Message::Text(payload.into())).await.is_err() {
                    break;
                }
            }
            inbound = source.next() => {
                match inbound {
                    // Any inbound frame is a keep-alive for the symbol.
                    Some(Ok(Message::Text(_) | Message::Binary(_) | Message::Ping(_))) => {
                        state.interest.touch(&symbol).await;
                    }
                    Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                }
            }
        }
    }

    state.registry.unregister(&symbol, id);
    tracing::info!(symbol = %symbol, connection = id, "Stream closed");
}

async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let response = HealthResponse {
        status: "healthy",
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        leader: *state.leadership.borrow(),
        backend: state.mode.as_str(),
        connections: state.registry.connection_count(),
        streamed_symbols: state.registry.symbol_count(),
    };
    (StatusCode::OK, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn metrics_handler() -> impl IntoResponse {
    metrics::prometheus_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            let body = handle.render();
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                body,
            )
        },
    )
}
