//! HTTP status endpoint.
//!
//! - `GET /health` - liveness and version
//! - `GET /status` - channel state, engine stats and cached keys

use anyhow::{Context, Result};
use axum::{extract::State, routing::get, Json, Router};
use pollsync_core::{CacheStore, EngineHandle, EventSink, InMemoryCache};
use pollsync_transport::ChannelHandle;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

/// Shared status state.
#[derive(Clone)]
pub struct StatusState {
    /// The running engine.
    pub engine: EngineHandle,
    /// The channel the engine emits on.
    pub channel: ChannelHandle,
    /// The cache the engine patches.
    pub cache: Arc<InMemoryCache>,
}

/// Build the status router.
pub fn router(state: StatusState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .with_state(state)
}

/// Serve the status endpoint until the process exits.
///
/// # Errors
///
/// Returns an error if binding or serving fails.
pub async fn serve(addr: SocketAddr, state: StatusState) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind status endpoint on {addr}"))?;
    info!("Status endpoint listening on {}", addr);

    axum::serve(listener, router(state))
        .await
        .context("Status endpoint failed")
}

async fn health_handler() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn status_handler(State(state): State<StatusState>) -> Json<Value> {
    let engine = match state.engine.stats().await {
        Ok(stats) => json!(stats),
        Err(e) => json!({ "error": e.to_string() }),
    };

    let keys = state.cache.keys();
    let stale: Vec<String> = keys
        .iter()
        .filter(|key| state.cache.is_stale(key))
        .map(ToString::to_string)
        .collect();
    let cached: Vec<String> = keys.iter().map(ToString::to_string).collect();

    Json(json!({
        "channel": {
            "state": state.channel.state(),
            "session": state.channel.session_id(),
        },
        "engine": engine,
        "cache": {
            "keys": cached,
            "stale": stale,
            "has_list": state.cache.polls().is_some(),
        },
    }))
}
