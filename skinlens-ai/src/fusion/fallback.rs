// Deterministic Fallback Producer
//
// Used only when no eligible provider succeeded. The output is a clearly
// labelled neutral default, never a guess dressed up as an analysis.

use super::MergedEnsemble;
use crate::types::SkinMetric;

pub const FALLBACK_PROVIDER: &str = "fallback";

const FALLBACK_SEVERITY: f64 = 5.0;
const FALLBACK_CONFIDENCE: f64 = 0.2;
const FALLBACK_ACCURACY: f64 = 0.3;

/// Neutral default covering every canonical metric
pub fn fallback_ensemble() -> MergedEnsemble {
    MergedEnsemble {
        overall_score: SkinMetric::ALL
            .iter()
            .map(|m| (*m, FALLBACK_SEVERITY))
            .collect(),
        metric_confidence: SkinMetric::ALL
            .iter()
            .map(|m| (*m, FALLBACK_CONFIDENCE))
            .collect(),
        confidence: FALLBACK_CONFIDENCE,
        accuracy_estimate: FALLBACK_ACCURACY,
        provenance: vec![FALLBACK_PROVIDER.to_string()],
        is_fallback: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_covers_every_metric() {
        let ensemble = fallback_ensemble();
        assert_eq!(ensemble.overall_score.len(), SkinMetric::ALL.len());
        assert!(ensemble.overall_score.values().all(|s| *s == 5.0));
        assert!(ensemble.metric_confidence.values().all(|c| *c == 0.2));
        assert_eq!(ensemble.provenance, vec!["fallback"]);
        assert!(ensemble.is_fallback);
    }

    #[test]
    fn test_fallback_is_deterministic() {
        assert_eq!(fallback_ensemble(), fallback_ensemble());
    }
}
