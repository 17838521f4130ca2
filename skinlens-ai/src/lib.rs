//! skinlens-ai library interface
//!
//! Exposes the analysis pipeline and HTTP router for embedding and
//! integration testing

pub mod api;
pub mod config;
pub mod db;
pub mod enrichment;
pub mod error;
pub mod executor;
pub mod fusion;
pub mod providers;
pub mod registry;
pub mod services;
pub mod types;

pub use crate::error::{AnalysisError, ApiError, ApiResult};
pub use crate::services::AnalysisOrchestrator;

use axum::Router;
use chrono::{DateTime, Utc};
use skinlens_common::events::EventBus;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::trace::TraceLayer;

use crate::db::RecordStore;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: AnalysisOrchestrator,
    /// Persisted records, when a database is configured
    pub store: Option<Arc<dyn RecordStore>>,
    /// Event bus for SSE broadcasting (shared with the orchestrator)
    pub event_bus: EventBus,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Last error for diagnostic purposes
    pub last_error: Arc<RwLock<Option<String>>>,
}

impl AppState {
    pub fn new(orchestrator: AnalysisOrchestrator, store: Option<Arc<dyn RecordStore>>) -> Self {
        let event_bus = orchestrator.event_bus().clone();
        Self {
            orchestrator,
            store,
            event_bus,
            startup_time: Utc::now(),
            last_error: Arc::new(RwLock::new(None)),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    Router::new()
        .merge(api::analysis_routes())
        .merge(api::cache_routes())
        .route("/events", get(api::event_stream))
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
