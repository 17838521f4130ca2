// Canonical Mapper - merged ensemble + enrichment → AnalysisRecord
//
// Single owner of percentile semantics and of the record's range clamps.
// Also hosts the normalization helpers provider adapters share.

use super::{MergedEnsemble, PercentileModel};
use crate::types::{
    AnalysisFocus, AnalysisRecord, AnalysisTier, ConfidenceMap, EnrichmentSet, PercentileMap,
    SeverityMap,
};
use chrono::Utc;
use uuid::Uuid;

/// Clamp a severity into [0, 10]; non-finite values become 0
pub fn clamp_severity(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 10.0)
    } else {
        0.0
    }
}

/// Clamp a confidence into [0, 1]; non-finite values become 0
pub fn clamp_confidence(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Normalize a provider-reported confidence
///
/// Missing or NaN values take `fallback`. Values in (1, 100] are read as
/// percentages. Everything else is clamped into [0, 1].
pub fn normalize_confidence(value: Option<f64>, fallback: f64) -> f64 {
    match value {
        None => fallback,
        Some(v) if v.is_nan() => fallback,
        Some(v) if v > 1.0 && v <= 100.0 => (v / 100.0).clamp(0.0, 1.0),
        Some(v) => v.clamp(0.0, 1.0),
    }
}

/// Builds canonical records
#[derive(Debug, Clone, Default)]
pub struct CanonicalMapper {
    percentiles: PercentileModel,
}

impl CanonicalMapper {
    pub fn new(percentiles: PercentileModel) -> Self {
        Self { percentiles }
    }

    pub fn to_record(
        &self,
        ensemble: MergedEnsemble,
        tier: AnalysisTier,
        focus: AnalysisFocus,
        enrichment: EnrichmentSet,
    ) -> AnalysisRecord {
        let overall_score: SeverityMap = ensemble
            .overall_score
            .iter()
            .map(|(m, s)| (*m, clamp_severity(*s)))
            .collect();

        let percentiles: PercentileMap = overall_score
            .iter()
            .map(|(m, s)| (*m, self.percentiles.percentile(*m, *s)))
            .collect();

        // Every scored metric carries a confidence
        let metric_confidence: ConfidenceMap = overall_score
            .keys()
            .map(|m| {
                let c = ensemble.metric_confidence.get(m).copied().unwrap_or(0.0);
                (*m, clamp_confidence(c))
            })
            .collect();

        let provider_provenance = if ensemble.provenance.is_empty() {
            vec![super::fallback::FALLBACK_PROVIDER.to_string()]
        } else {
            ensemble.provenance
        };

        AnalysisRecord {
            id: Uuid::new_v4(),
            tier,
            focus,
            overall_score,
            percentiles,
            metric_confidence,
            confidence: clamp_confidence(ensemble.confidence),
            provider_provenance,
            accuracy_estimate: clamp_confidence(ensemble.accuracy_estimate),
            enrichment: if enrichment.is_empty() {
                None
            } else {
                Some(enrichment)
            },
            is_fallback: ensemble.is_fallback,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fusion::fallback_ensemble;
    use crate::types::SkinMetric;

    #[test]
    fn test_normalize_confidence() {
        assert_eq!(normalize_confidence(None, 0.8), 0.8);
        assert_eq!(normalize_confidence(Some(f64::NAN), 0.75), 0.75);
        assert_eq!(normalize_confidence(Some(0.6), 0.8), 0.6);
        assert!((normalize_confidence(Some(85.0), 0.8) - 0.85).abs() < 1e-9);
        assert_eq!(normalize_confidence(Some(1.0), 0.8), 1.0);
        assert_eq!(normalize_confidence(Some(250.0), 0.8), 1.0);
        assert_eq!(normalize_confidence(Some(-3.0), 0.8), 0.0);
    }

    #[test]
    fn test_clamps() {
        assert_eq!(clamp_severity(11.0), 10.0);
        assert_eq!(clamp_severity(-1.0), 0.0);
        assert_eq!(clamp_severity(f64::INFINITY), 0.0);
        assert_eq!(clamp_confidence(1.2), 1.0);
    }

    #[test]
    fn test_record_from_out_of_range_ensemble() {
        let ensemble = MergedEnsemble {
            overall_score: [(SkinMetric::Acne, 12.0), (SkinMetric::Pores, 4.0)]
                .into_iter()
                .collect(),
            metric_confidence: [(SkinMetric::Acne, 1.3)].into_iter().collect(),
            confidence: 1.5,
            accuracy_estimate: -0.1,
            provenance: vec!["cv-metrics".to_string()],
            is_fallback: false,
        };

        let record = CanonicalMapper::default().to_record(
            ensemble,
            AnalysisTier::Basic,
            AnalysisFocus::Full,
            EnrichmentSet::default(),
        );

        assert_eq!(record.overall_score[&SkinMetric::Acne], 10.0);
        assert_eq!(record.metric_confidence[&SkinMetric::Acne], 1.0);
        assert_eq!(record.metric_confidence[&SkinMetric::Pores], 0.0);
        assert_eq!(record.percentiles[&SkinMetric::Acne], 99.0);
        assert_eq!(record.confidence, 1.0);
        assert_eq!(record.accuracy_estimate, 0.0);
        assert!(record.enrichment.is_none());
        assert!(record.check_invariants().is_ok());
    }

    #[test]
    fn test_fallback_record() {
        let record = CanonicalMapper::default().to_record(
            fallback_ensemble(),
            AnalysisTier::Clinical,
            AnalysisFocus::Full,
            EnrichmentSet::default(),
        );

        assert!(record.is_fallback);
        assert_eq!(record.provider_provenance, vec!["fallback"]);
        assert_eq!(record.percentiles[&SkinMetric::Spots], 50.0);
        assert!(record.check_invariants().is_ok());
    }
}
