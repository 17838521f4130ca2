// Percentile Model - severity → population percentile
//
// Each metric has a reference distribution (normal approximation). The
// percentile is the share of the reference population with a lower severity,
// so a lower percentile means better skin than most.

use crate::types::SkinMetric;
use statrs::distribution::{ContinuousCDF, Normal};
use std::collections::BTreeMap;

/// Normal approximation of one metric's severity across the reference population
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReferenceDistribution {
    pub mean: f64,
    pub std_dev: f64,
}

impl Default for ReferenceDistribution {
    fn default() -> Self {
        Self {
            mean: 5.0,
            std_dev: 2.0,
        }
    }
}

/// Per-metric reference distributions
#[derive(Debug, Clone, PartialEq)]
pub struct PercentileModel {
    distributions: BTreeMap<SkinMetric, ReferenceDistribution>,
}

impl Default for PercentileModel {
    fn default() -> Self {
        Self {
            distributions: SkinMetric::ALL
                .iter()
                .map(|m| (*m, ReferenceDistribution::default()))
                .collect(),
        }
    }
}

impl PercentileModel {
    /// Replace one metric's reference distribution
    pub fn with_distribution(mut self, metric: SkinMetric, distribution: ReferenceDistribution) -> Self {
        self.distributions.insert(metric, distribution);
        self
    }

    pub fn distribution(&self, metric: SkinMetric) -> ReferenceDistribution {
        self.distributions.get(&metric).copied().unwrap_or_default()
    }

    /// Percentile of `severity` for `metric`, rounded and clamped to [1, 99]
    pub fn percentile(&self, metric: SkinMetric, severity: f64) -> f64 {
        let distribution = self.distribution(metric);
        if !severity.is_finite() {
            return 50.0;
        }

        match Normal::new(distribution.mean, distribution.std_dev) {
            Ok(normal) => (100.0 * normal.cdf(severity)).round().clamp(1.0, 99.0),
            // Degenerate reference (non-positive or non-finite spread)
            Err(_) => 50.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_maps_to_fiftieth() {
        let model = PercentileModel::default();
        assert_eq!(model.percentile(SkinMetric::Spots, 5.0), 50.0);
    }

    #[test]
    fn test_one_std_dev() {
        let model = PercentileModel::default();
        assert_eq!(model.percentile(SkinMetric::Wrinkles, 7.0), 84.0);
        assert_eq!(model.percentile(SkinMetric::Wrinkles, 3.0), 16.0);
    }

    #[test]
    fn test_clamped_to_1_99() {
        let model = PercentileModel::default();
        assert_eq!(model.percentile(SkinMetric::Pores, 0.0), 1.0);
        assert_eq!(model.percentile(SkinMetric::Pores, 10.0), 99.0);
    }

    #[test]
    fn test_monotonic_in_severity() {
        let model = PercentileModel::default();
        for metric in SkinMetric::ALL {
            let mut previous = 0.0;
            for step in 0..=100 {
                let p = model.percentile(metric, step as f64 / 10.0);
                assert!(p >= previous, "{} not monotonic at {}", metric, step);
                previous = p;
            }
        }
    }

    #[test]
    fn test_per_metric_override() {
        let model = PercentileModel::default().with_distribution(
            SkinMetric::Acne,
            ReferenceDistribution {
                mean: 3.0,
                std_dev: 1.5,
            },
        );
        assert_eq!(model.percentile(SkinMetric::Acne, 3.0), 50.0);
        assert_eq!(model.percentile(SkinMetric::Spots, 3.0), 16.0);
    }

    #[test]
    fn test_degenerate_distribution_is_median() {
        let model = PercentileModel::default().with_distribution(
            SkinMetric::Redness,
            ReferenceDistribution {
                mean: 5.0,
                std_dev: 0.0,
            },
        );
        assert_eq!(model.percentile(SkinMetric::Redness, 9.0), 50.0);
        assert_eq!(model.percentile(SkinMetric::Redness, f64::NAN), 50.0);
    }
}
