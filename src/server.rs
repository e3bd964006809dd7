//! HTTP server exposing the probe endpoint.
//!
//! This module provides an Axum-based HTTP server that serves the
//! `/probe?target=<name>` endpoint for Prometheus scraping and a `/health`
//! endpoint for health checks. Each probe request gets its own ephemeral
//! [`ProbeCollector`]; only the token cache is shared between requests.

use crate::collector::ProbeCollector;
use crate::config::Settings;
use crate::error::{CvError, Result};
use crate::token_cache::TokenCache;
use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use prometheus::{Encoder, TextEncoder};
use serde::Deserialize;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub token_cache: Arc<TokenCache>,
}

/// Query parameters for the probe endpoint.
#[derive(Debug, Deserialize)]
struct ProbeParams {
    target: Option<String>,
}

/// Build the exporter's router. Split from [`start_server`] so tests can
/// serve it on an ephemeral port.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/probe", get(probe_handler))
        .route("/health", get(health_handler))
        .route("/", get(root_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server and serve until a shutdown signal arrives.
///
/// # Arguments
///
/// * `listen_address` - Address to bind to (e.g., "0.0.0.0:9657")
/// * `state` - Shared application state
pub async fn start_server(listen_address: &str, state: AppState) -> Result<()> {
    let app = create_router(state);

    info!("Starting HTTP server on {}", listen_address);

    let listener = TcpListener::bind(listen_address).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| CvError::Server(e.to_string()))?;

    Ok(())
}

/// Resolve on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => error!("Failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}

/// Handler for the /probe endpoint.
async fn probe_handler(
    State(state): State<AppState>,
    Query(params): Query<ProbeParams>,
) -> Response {
    let Some(target_name) = params.target.filter(|t| !t.is_empty()) else {
        warn!("Probe request missing 'target' parameter");
        return (
            StatusCode::BAD_REQUEST,
            "Bad Request: 'target' parameter is required",
        )
            .into_response();
    };

    info!(target = %target_name, "Received probe request");

    let target_config = match state.settings.require_target(&target_name) {
        Ok(config) => config,
        Err(e) => {
            warn!(target = %target_name, "{}", e);
            return (
                StatusCode::NOT_FOUND,
                format!("Target '{}' not found in configuration", target_name),
            )
                .into_response();
        }
    };

    let collector = match ProbeCollector::new(
        &target_name,
        target_config.clone(),
        state.token_cache.clone(),
    ) {
        Ok(collector) => collector,
        Err(e) => {
            error!(target = %target_name, "Failed to initialize probe collector: {}", e);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to probe target '{}': {}", target_name, e),
            )
                .into_response();
        }
    };

    // A failed collection still renders: scrape_success carries the outcome
    collector.collect().await;

    match collector.encode() {
        Ok(body) => {
            let content_type = TextEncoder::new().format_type().to_string();
            (StatusCode::OK, [(header::CONTENT_TYPE, content_type)], body).into_response()
        }
        Err(e) => {
            error!(target = %target_name, "Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to encode metrics: {}", e),
            )
                .into_response()
        }
    }
}

/// Handler for /health endpoint.
async fn health_handler() -> Response {
    (StatusCode::OK, "OK").into_response()
}

/// Handler for root endpoint.
async fn root_handler() -> Response {
    let html = r#"
<!DOCTYPE html>
<html>
<head>
    <title>Commvault Exporter</title>
    <style>
        body { font-family: Arial, sans-serif; margin: 40px; }
        h1 { color: #333; }
        a { color: #0066cc; text-decoration: none; }
        a:hover { text-decoration: underline; }
        .info { background: #f0f0f0; padding: 15px; border-radius: 5px; margin: 20px 0; }
    </style>
</head>
<body>
    <h1>Commvault Exporter</h1>
    <div class="info">
        <p>Multi-target Prometheus probe exporter for Commvault CommServe REST APIs</p>
        <p><strong>Endpoints:</strong></p>
        <ul>
            <li><a href="/probe?target=example">/probe?target=&lt;name&gt;</a> - Probe one configured target</li>
            <li><a href="/health">/health</a> - Health check</li>
        </ul>
    </div>
</body>
</html>
"#;

    (StatusCode::OK, html).into_response()
}
