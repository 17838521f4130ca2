//! Services for skinlens-ai

pub mod analysis_orchestrator;
pub mod result_cache;

pub use analysis_orchestrator::{AnalysisOrchestrator, OrchestratorBuilder};
pub use result_cache::{CacheSource, CacheStats, ResultCache, TtlPolicy};
