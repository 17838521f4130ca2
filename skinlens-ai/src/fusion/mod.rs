// Fusion - turning provider output into one canonical analysis
//
// ensemble_merger: confidence-weighted combination of successful results
// fallback: built-in default when no provider succeeded
// canonical_mapper: clamping, percentiles and record assembly
// percentiles: reference population model

pub mod canonical_mapper;
pub mod ensemble_merger;
pub mod fallback;
pub mod percentiles;

pub use canonical_mapper::CanonicalMapper;
pub use ensemble_merger::{merge, Contribution};
pub use fallback::fallback_ensemble;
pub use percentiles::{PercentileModel, ReferenceDistribution};

use crate::types::{ConfidenceMap, SeverityMap};

/// Merged (or default) provider output, before mapping to a record
#[derive(Debug, Clone, PartialEq)]
pub struct MergedEnsemble {
    /// Metric → severity (0-10)
    pub overall_score: SeverityMap,
    /// Metric → confidence (0-1)
    pub metric_confidence: ConfidenceMap,
    /// Aggregate confidence, partial-ensemble penalty applied
    pub confidence: f64,
    pub accuracy_estimate: f64,
    /// Contributing providers in ascending priority order
    pub provenance: Vec<String>,
    pub is_fallback: bool,
}
