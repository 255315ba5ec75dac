mod routes;

use crate::segmentation::SegmentationModel;
use anyhow::{Context, Result};
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Upload limit when none is configured (10 MB)
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Network and request limits for the HTTP surface
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }
}

/// Shared by every request; holds nothing mutable
#[derive(Clone)]
pub struct AppState {
    pub model: Arc<dyn SegmentationModel>,
}

impl AppState {
    pub fn new(model: Arc<dyn SegmentationModel>) -> Self {
        Self { model }
    }
}

/// Build the application router
pub fn router(state: AppState, config: &ServerConfig) -> Router {
    Router::new()
        .route("/", get(routes::index))
        .route("/api/remove-background", post(routes::remove_background))
        .route("/api/health", get(routes::health))
        .layer(DefaultBodyLimit::max(config.max_upload_bytes))
        // Mirrors the caller's origin so credentials stay allowed for every origin
        .layer(CorsLayer::very_permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until Ctrl+C
pub async fn serve(config: ServerConfig, model: Arc<dyn SegmentationModel>) -> Result<()> {
    let app = router(AppState::new(model), &config);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    tracing::info!("Listening on http://{}", listener.local_addr()?);
    tracing::info!("Max upload size: {} bytes", config.max_upload_bytes);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl+C: {}", e);
        return;
    }
    tracing::info!("Shutdown requested");
}
