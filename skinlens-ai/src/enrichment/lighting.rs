//! Lighting-condition simulation
//!
//! Asks the enrichment service how visible each concern is under common
//! lighting environments (daylight, office, evening, flash).

use super::{post_enrichment, EnrichmentAdapter, EnrichmentError};
use crate::fusion::canonical_mapper::{clamp_confidence, normalize_confidence};
use crate::providers::{image_payload, trim_base_url};
use crate::types::{
    EnrichmentKind, EnrichmentPayload, EnrichmentResult, ImageHandle, LightingCondition,
    LightingScenario, LightingSimulation, SeverityMap, SkinMetric,
};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

const DEFAULT_CONFIDENCE: f64 = 0.7;

#[derive(Debug, Deserialize)]
struct NativeScenario {
    condition: LightingCondition,
    #[serde(default)]
    visibility: BTreeMap<String, f64>,
    #[serde(default)]
    quality_score: f64,
}

#[derive(Debug, Deserialize)]
struct LightingResponse {
    #[serde(default)]
    scenarios: Vec<NativeScenario>,
    #[serde(default)]
    confidence: Option<f64>,
}

pub struct LightingSimulator {
    client: Client,
    base_url: Option<String>,
}

impl LightingSimulator {
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
impl EnrichmentAdapter for LightingSimulator {
    fn kind(&self) -> EnrichmentKind {
        EnrichmentKind::Lighting
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
        body["scores"] = serde_json::to_value(base_scores)
            .map_err(|e| EnrichmentError::Failed(e.to_string()))?;

        let response: LightingResponse = post_enrichment(
            self.client
                .post(format!("{}/api/enrich/lighting", base_url))
                .json(&body),
            timeout,
        )
        .await?;

        translate(response)
    }
}

fn translate(response: LightingResponse) -> Result<EnrichmentResult, EnrichmentError> {
    if response.scenarios.is_empty() {
        return Err(EnrichmentError::Failed(
            "lighting simulation returned no scenarios".to_string(),
        ));
    }

    let scenarios = response
        .scenarios
        .into_iter()
        .map(|scenario| LightingScenario {
            condition: scenario.condition,
            visibility: scenario
                .visibility
                .iter()
                .filter_map(|(label, v)| {
                    SkinMetric::from_label(label).map(|m| (m, clamp_confidence(*v)))
                })
                .collect(),
            quality_score: if scenario.quality_score.is_finite() {
                scenario.quality_score.clamp(0.0, 100.0)
            } else {
                0.0
            },
        })
        .collect();

    Ok(EnrichmentResult {
        payload: EnrichmentPayload::Lighting(LightingSimulation { scenarios }),
        confidence: normalize_confidence(response.confidence, DEFAULT_CONFIDENCE),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_translate_scenarios() {
        let response: LightingResponse = serde_json::from_str(
            r#"{
                "scenarios": [
                    {"condition": "daylight", "visibility": {"dark_spots": 0.9, "wrinkles": 1.4}, "quality_score": 92},
                    {"condition": "flash", "visibility": {"pores": 0.95}, "quality_score": 140}
                ],
                "confidence": 0.8
            }"#,
        )
        .unwrap();

        let result = translate(response).unwrap();
        assert_eq!(result.kind(), EnrichmentKind::Lighting);
        let EnrichmentPayload::Lighting(simulation) = result.payload else {
            panic!("expected lighting payload");
        };
        assert_eq!(simulation.scenarios.len(), 2);
        assert_eq!(simulation.scenarios[0].condition, LightingCondition::Daylight);
        assert_eq!(simulation.scenarios[0].visibility[&SkinMetric::Spots], 0.9);
        assert_eq!(simulation.scenarios[0].visibility[&SkinMetric::Wrinkles], 1.0);
        assert_eq!(simulation.scenarios[1].quality_score, 100.0);
    }

    #[test]
    fn test_no_scenarios_is_failure() {
        let response: LightingResponse = serde_json::from_str(r#"{"scenarios": []}"#).unwrap();
        assert!(translate(response).is_err());
    }

    #[test]
    fn test_unavailable_without_url() {
        assert!(!LightingSimulator::new(Client::new(), None).is_available());
    }
}
