//! Health check endpoint

use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::AppState;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status: "ok", or "degraded" when no provider is available
    pub status: String,
    pub module: String,
    pub version: String,
    pub uptime_seconds: u64,
    /// Providers with credentials configured, by priority
    pub providers: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime = Utc::now().signed_duration_since(state.startup_time);
    let uptime_seconds = uptime.num_seconds().max(0) as u64;

    let last_error = state.last_error.read().await.clone();
    let providers = state.orchestrator.registry().available_names();

    // Analyses still succeed through the fallback, so this is degraded rather than down
    let status = if providers.is_empty() { "degraded" } else { "ok" };

    Json(HealthResponse {
        status: status.to_string(),
        module: "skinlens-ai".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds,
        providers,
        last_error,
    })
}

pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
