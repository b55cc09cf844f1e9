use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use backplane::{
    BackplaneMetrics, HeartbeatManager, HubLifetimeManager, MetricsSnapshot, ServerDirectory,
    ServerInfo,
};
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::ws;

#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<HubLifetimeManager>,
    pub heartbeat: Arc<HeartbeatManager>,
    pub directory: Arc<dyn ServerDirectory>,
    pub metrics: Arc<BackplaneMetrics>,
    /// Servers silent for longer than this are reported dead
    pub dead_server_timeout: Duration,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/health/live", get(health_live_handler))
        .route("/ws", get(ws::ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub hub: String,
    pub server_id: String,
    pub connections: usize,
    pub servers: Vec<ServerInfo>,
    pub dead_servers: Vec<String>,
    pub metrics: MetricsSnapshot,
}

/// Health check endpoint - this server's view of the fleet
pub async fn health_handler(State(state): State<AppState>) -> Response {
    let servers = state.directory.servers().await;
    let dead = state
        .heartbeat
        .dead_servers(state.dead_server_timeout)
        .await;

    let (status, code, servers, dead_servers) = match (servers, dead) {
        (Ok(servers), Ok(dead)) => {
            let status = if dead.is_empty() { "healthy" } else { "degraded" };
            (status, StatusCode::OK, servers, dead)
        }
        (Err(e), _) | (_, Err(e)) => {
            warn!(error = %e, "server directory unreachable");
            ("unavailable", StatusCode::SERVICE_UNAVAILABLE, Vec::new(), Vec::new())
        }
    };

    let body = HealthStatus {
        status,
        hub: state.hub.hub().to_string(),
        server_id: state.heartbeat.server_id().to_string(),
        connections: state.hub.connection_count(),
        servers,
        dead_servers,
        metrics: state.metrics.snapshot(),
    };
    (code, Json(body)).into_response()
}

/// Liveness probe - returns 200 if the server is running
pub async fn health_live_handler() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "alive" }))
}
