//! Result cache endpoints

use crate::error::ApiResult;
use crate::services::CacheStats;
use crate::types::CacheKey;
use crate::AppState;
use axum::{
    extract::{Path, State},
    routing::{delete, get},
    Json, Router,
};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct InvalidateResponse {
    pub key: String,
    /// Whether an entry existed
    pub invalidated: bool,
}

/// DELETE /cache/:key
pub async fn invalidate(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> ApiResult<Json<InvalidateResponse>> {
    let invalidated = state
        .orchestrator
        .invalidate_key(&CacheKey::from_raw(key.clone()))?;
    Ok(Json(InvalidateResponse { key, invalidated }))
}

/// GET /cache/stats
pub async fn stats(State(state): State<AppState>) -> ApiResult<Json<CacheStats>> {
    Ok(Json(state.orchestrator.cache_stats()?))
}

pub fn cache_routes() -> Router<AppState> {
    Router::new()
        .route("/cache/stats", get(stats))
        .route("/cache/:key", delete(invalidate))
}
