// Ensemble Merger - Metric-Wise Confidence-Weighted Averaging
//
// Every successful provider result contributes to each metric it reports,
// weighted by its confidence for that metric. Inputs are ordered by provider
// priority (then name) before accumulation so the output is deterministic
// for a fixed set of successes regardless of completion order.

use super::MergedEnsemble;
use crate::types::{ConfidenceMap, ProviderResult, SeverityMap, SkinMetric};
use std::collections::BTreeMap;
use tracing::debug;

/// One successful provider result plus the registry facts the merge needs
#[derive(Debug, Clone)]
pub struct Contribution {
    pub result: ProviderResult,
    pub priority: u32,
    pub baseline_accuracy: f64,
}

/// Merge successful provider results
///
/// # Arguments
/// * `contributions` - Successful results, any order
/// * `requested` - Target ensemble size; fewer successes apply `partial_penalty`
/// * `partial_penalty` - Multiplier for confidence and accuracy of a partial ensemble
///
/// # Returns
/// * `None` when there is nothing to merge
pub fn merge(
    mut contributions: Vec<Contribution>,
    requested: usize,
    partial_penalty: f64,
) -> Option<MergedEnsemble> {
    if contributions.is_empty() {
        return None;
    }

    contributions.sort_by(|a, b| {
        a.priority
            .cmp(&b.priority)
            .then_with(|| a.result.provider_name.cmp(&b.result.provider_name))
    });

    // Per-metric (severity, confidence) in priority order
    let mut metric_values: BTreeMap<SkinMetric, Vec<(f64, f64)>> = BTreeMap::new();
    for contribution in &contributions {
        for (metric, severity) in &contribution.result.severity {
            metric_values
                .entry(*metric)
                .or_default()
                .push((*severity, contribution.result.confidence_for(*metric)));
        }
    }

    let mut overall_score = SeverityMap::new();
    let mut metric_confidence = ConfidenceMap::new();
    for (metric, values) in &metric_values {
        let (score, confidence) = weighted_average(values);
        overall_score.insert(*metric, round2(score));
        metric_confidence.insert(*metric, confidence);
    }

    let penalty = if contributions.len() < requested {
        partial_penalty.clamp(0.0, 1.0)
    } else {
        1.0
    };

    let result_confidences: Vec<f64> = contributions
        .iter()
        .map(|c| c.result.mean_confidence())
        .collect();
    let confidence =
        result_confidences.iter().sum::<f64>() / result_confidences.len() as f64 * penalty;

    let accuracy_pairs: Vec<(f64, f64)> = contributions
        .iter()
        .zip(&result_confidences)
        .map(|(c, weight)| (c.baseline_accuracy, *weight))
        .collect();
    let (accuracy, _) = weighted_average(&accuracy_pairs);
    let accuracy_estimate = accuracy * penalty;

    let provenance: Vec<String> = contributions
        .iter()
        .map(|c| c.result.provider_name.clone())
        .collect();

    debug!(
        providers = ?provenance,
        requested,
        metrics = overall_score.len(),
        confidence,
        "Merged provider results"
    );

    Some(MergedEnsemble {
        overall_score,
        metric_confidence,
        confidence: confidence.clamp(0.0, 1.0),
        accuracy_estimate: accuracy_estimate.clamp(0.0, 1.0),
        provenance,
        is_fallback: false,
    })
}

/// Weighted mean of `(value, weight)` pairs plus the mean weight
///
/// When every weight is zero the first (highest priority) value wins.
fn weighted_average(values: &[(f64, f64)]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }

    let sum_weighted: f64 = values.iter().map(|(val, w)| val * w).sum();
    let sum_weights: f64 = values.iter().map(|(_, w)| w).sum();

    let value = if sum_weights > 0.0 {
        sum_weighted / sum_weights
    } else {
        values[0].0
    };

    (value, sum_weights / values.len() as f64)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
