//! Depth / 3D relief estimation

use super::{post_enrichment, EnrichmentAdapter, EnrichmentError};
use crate::fusion::canonical_mapper::normalize_confidence;
use crate::providers::{image_payload, trim_base_url};
use crate::types::{
    DepthEstimate, EnrichmentKind, EnrichmentPayload, EnrichmentResult, ImageHandle, SeverityMap,
    SkinMetric,
};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

const DEFAULT_CONFIDENCE: f64 = 0.6;

#[derive(Debug, Deserialize)]
struct DepthResponse {
    mean_depth_mm: f64,
    /// Concern label → depth (mm)
    #[serde(default)]
    depths: BTreeMap<String, f64>,
    #[serde(default)]
    mesh_vertices: u32,
    #[serde(default)]
    confidence: Option<f64>,
}

pub struct DepthEstimator {
    client: Client,
    base_url: Option<String>,
}

impl DepthEstimator {
    pub fn new(client: Client, base_url: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url
                .filter(|url| !url.trim().is_empty())
                .map(|url| trim_base_url(&url)),
        }
    }
}

#[async_trait]
impl EnrichmentAdapter for DepthEstimator {
    fn kind(&self) -> EnrichmentKind {
        EnrichmentKind::Depth
    }

    fn is_available(&self) -> bool {
        self.base_url.is_some()
    }

    async fn enrich(
        &self,
        image: &ImageHandle,
        base_scores: &SeverityMap,
        timeout: Duration,
    ) -> Result<EnrichmentResult, EnrichmentError> {
        let base_url = self.base_url.as_deref().ok_or(EnrichmentError::Unavailable)?;

        let mut body = image_payload(image);
        // Only metrics with a relief component are worth estimating
        let targets: Vec<&str> = base_scores
            .keys()
            .filter(|m| {
                matches!(
                    m,
                    SkinMetric::Wrinkles | SkinMetric::FineLines | SkinMetric::Pores | SkinMetric::Acne
                )
            })
            .map(|m| m.as_str())
            .collect();
        body["metrics"] = serde_json::json!(targets);

        let response: DepthResponse = post_enrichment(
            self.client
                .post(format!("{}/api/enrich/depth", base_url))
                .json(&body),
            timeout,
        )
        .await?;

        translate(response)
    }
}

fn translate(response: DepthResponse) -> Result<EnrichmentResult, EnrichmentError> {
    if !response.mean_depth_mm.is_finite() || response.mean_depth_mm < 0.0 {
        return Err(EnrichmentError::Failed(format!(
            "invalid mean depth {}",
            response.mean_depth_mm
        )));
    }

    let metric_depth_mm = response
        .depths
        .iter()
        .filter(|(_, depth)| depth.is_finite() && **depth >= 0.0)
        .filter_map(|(label, depth)| SkinMetric::from_label(label).map(|m| (m, *depth)))
        .collect();

    Ok(EnrichmentResult {
        payload: EnrichmentPayload::Depth(DepthEstimate {
            mean_depth_mm: response.mean_depth_mm,
            metric_depth_mm,
            mesh_vertices: response.mesh_vertices,
        }),
        confidence: normalize_confidence(response.confidence, DEFAULT_CONFIDENCE),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_translate_depth() {
        let response: DepthResponse = serde_json::from_str(
            r#"{"mean_depth_mm": 0.42, "depths": {"wrinkle": 0.8, "large_pores": 0.2, "scar": 1.0, "acne": -1}, "mesh_vertices": 468, "confidence": 65}"#,
        )
        .unwrap();

        let result = translate(response).unwrap();
        let EnrichmentPayload::Depth(estimate) = result.payload else {
            panic!("expected depth payload");
        };
        assert_eq!(estimate.mean_depth_mm, 0.42);
        assert_eq!(estimate.metric_depth_mm.len(), 2);
        assert_eq!(estimate.metric_depth_mm[&SkinMetric::Wrinkles], 0.8);
        assert_eq!(estimate.mesh_vertices, 468);
        assert!((result.confidence - 0.65).abs() < 1e-9);
    }

    #[test]
    fn test_negative_mean_depth_rejected() {
        let response: DepthResponse =
            serde_json::from_str(r#"{"mean_depth_mm": -0.1}"#).unwrap();
        assert!(matches!(translate(response), Err(EnrichmentError::Failed(_))));
    }
}
