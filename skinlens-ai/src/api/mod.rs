//! HTTP API handlers for skinlens-ai

pub mod analysis;
pub mod cache;
pub mod health;
pub mod sse;

pub use analysis::analysis_routes;
pub use cache::cache_routes;
pub use health::health_routes;
pub use sse::event_stream;
