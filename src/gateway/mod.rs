//! Keep-alive HTTP responder.
//!
//! Answers `GET /` with a static payload so hosting platforms and the bot's
//! own liveness probe see a live process, and exposes the health snapshot on
//! `GET /health`. Runs independently of the Discord connection.

use anyhow::Result;
use axum::{
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use std::net::SocketAddr;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;

/// Maximum request body size; nothing here accepts a body.
pub const MAX_BODY_SIZE: usize = 1_024;
/// Per-request timeout in seconds.
pub const REQUEST_TIMEOUT_SECS: u64 = 10;

pub const ALIVE_BODY: &str = "Bot is alive!";

pub const GATEWAY_COMPONENT: &str = "gateway";

pub fn router() -> Router {
    Router::new()
        .route("/", get(handle_root))
        .route("/health", get(handle_health))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_SIZE))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(REQUEST_TIMEOUT_SECS),
        ))
}

/// Serve until `shutdown` fires.
pub async fn run_gateway(host: &str, port: u16, shutdown: CancellationToken) -> Result<()> {
    let addr: SocketAddr = format!("{host}:{port}").parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let actual = listener.local_addr()?;
    tracing::info!("🌐 Keep-alive endpoint listening on http://{actual}");

    crate::health::mark_component_ok(GATEWAY_COMPONENT);

    axum::serve(listener, router())
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    Ok(())
}

/// GET /
async fn handle_root() -> &'static str {
    ALIVE_BODY
}

/// GET /health: component snapshot, always public.
async fn handle_health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "runtime": crate::health::snapshot_json(),
    }))
}
