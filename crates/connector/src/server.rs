use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::Utc;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

use crate::metrics::encode_metrics;
use crate::stream::StreamStatus;

/// Stream state as reported by `/health` and `/ready`
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub exchange: String,
    pub connected: bool,
    /// Connection cycles ended since startup
    pub disconnects: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_frame_age_ms: Option<u64>,
}

/// Shared state for health endpoints
#[derive(Clone)]
pub struct ServerState {
    pub exchange: String,
    pub stream: Arc<StreamStatus>,
}

impl ServerState {
    pub fn new(exchange: impl Into<String>, stream: Arc<StreamStatus>) -> Self {
        Self {
            exchange: exchange.into(),
            stream,
        }
    }

    fn report(&self, status: &'static str) -> HealthResponse {
        HealthResponse {
            status,
            exchange: self.exchange.clone(),
            connected: self.stream.is_connected(),
            disconnects: self.stream.disconnects(),
            last_frame_age_ms: self.stream.last_frame_age_ms(Utc::now()),
        }
    }
}

/// Always 200 while the process is up
async fn health(State(state): State<ServerState>) -> Json<HealthResponse> {
    Json(state.report("ok"))
}

/// 200 only while the stream is connected
async fn ready(State(state): State<ServerState>) -> (StatusCode, Json<HealthResponse>) {
    if state.stream.is_connected() {
        (StatusCode::OK, Json(state.report("ready")))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(state.report("reconnecting")),
        )
    }
}

/// Prometheus text exposition
async fn metrics() -> impl IntoResponse {
    match encode_metrics() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [(header::CONTENT_TYPE, "text/plain")],
            e.to_string(),
        ),
    }
}

/// Create the health server router
pub fn create_router(state: ServerState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Run the health server
pub async fn run_server(addr: SocketAddr, state: ServerState) -> std::io::Result<()> {
    let app = create_router(state);
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await
}
