//! HTTP surface: app listing, websocket updates, liveness and metrics.

use crate::aggregator::AppAggregator;
use crate::metrics::MetricsRegistry;
use crate::types::AppGroup;
use crate::websocket::WebsocketServer;
use axum::{
    Json, Router,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use futures::StreamExt;
use prometheus_client::encoding::text::encode;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub aggregator: Arc<AppAggregator>,
    pub websocket: Arc<WebsocketServer>,
    pub metrics: Option<Arc<MetricsRegistry>>,
    next_connection_id: Arc<AtomicU64>,
}

impl AppState {
    pub fn new(
        aggregator: Arc<AppAggregator>,
        websocket: Arc<WebsocketServer>,
        metrics: Option<Arc<MetricsRegistry>>,
    ) -> Self {
        Self {
            aggregator,
            websocket,
            metrics,
            next_connection_id: Arc::new(AtomicU64::new(1)),
        }
    }

    fn connection_id(&self) -> String {
        format!("ws-{}", self.next_connection_id.fetch_add(1, Ordering::Relaxed))
    }
}

/// Build the router
pub fn router(state: AppState, access_logs: bool) -> Router {
    let router = Router::new()
        .route("/health", get(health_handler))
        .route("/api/apps", get(apps_handler))
        .route("/ws", get(ws_handler))
        .route("/metrics", get(metrics_handler));

    let router = if access_logs {
        router.layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
    } else {
        router
    };

    router.with_state(state)
}

/// HTTP server for the dashboard API
pub struct DashboardServer {
    state: AppState,
    listen_addr: SocketAddr,
    access_logs: bool,
}

impl DashboardServer {
    pub fn new(state: AppState, listen_addr: SocketAddr, access_logs: bool) -> Self {
        Self {
            state,
            listen_addr,
            access_logs,
        }
    }

    /// Bind and serve until the listener fails
    pub async fn run(self) -> std::io::Result<()> {
        let listener = TcpListener::bind(self.listen_addr).await?;
        info!(listen_addr = %self.listen_addr, "HTTP server listening");

        axum::serve(listener, router(self.state, self.access_logs)).await
    }
}

async fn health_handler() -> StatusCode {
    StatusCode::OK
}

async fn apps_handler(State(state): State<AppState>) -> Json<Vec<AppGroup>> {
    Json(state.aggregator.get_apps())
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let id = state.connection_id();
    let (sink, mut stream) = socket.split();
    let mut send_task = state.websocket.connect(id.clone(), sink);

    // Inbound messages are read only to notice the peer going away
    loop {
        tokio::select! {
            _ = &mut send_task => break,
            message = stream.next() => match message {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => debug!(connection = %id, "Ignoring inbound message"),
                Some(Err(e)) => {
                    debug!(connection = %id, error = %e, "Websocket read failed");
                    break;
                }
            },
        }
    }

    state.websocket.disconnect(&id);
}

/// Handler for /metrics endpoint
async fn metrics_handler(State(state): State<AppState>) -> Response {
    let Some(registry) = state.metrics else {
        return StatusCode::NOT_FOUND.into_response();
    };

    // Encode metrics to Prometheus text format
    let mut buffer = String::new();
    if let Err(e) = encode(&mut buffer, &registry.registry) {
        warn!(error = %e, "Failed to encode metrics");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to encode metrics: {}", e),
        )
            .into_response();
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        buffer,
    )
        .into_response()
}
