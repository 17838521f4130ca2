//! Hosted general-purpose vision model (Hugging Face inference API)
//!
//! The model reports VISIA-style scores on a 0-100 scale plus an optional
//! list of detected concerns. Requests are rate limited client-side so a
//! burst of analyses does not exhaust the account quota.

use super::{
    image_payload, send_json, trim_base_url, ProviderAdapter, ProviderFailure, ProviderKind,
    ProviderParams,
};
use crate::fusion::canonical_mapper::{clamp_severity, normalize_confidence};
use crate::types::{ImageHandle, ProviderResult, SeverityMap, SkinMetric};
use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use reqwest::Client;
use serde::Deserialize;
use skinlens_common::time::elapsed_ms;
use std::collections::BTreeMap;
use std::num::NonZeroU32;
use std::time::{Duration, Instant};
use tracing::debug;

pub const PROVIDER_NAME: &str = "huggingface";

pub const DEFAULT_BASE_URL: &str = "https://api-inference.huggingface.co/models";

/// Model path appended to the base URL
const MODEL_PATH: &str = "skin-analysis";

const DEFAULT_CONFIDENCE: f64 = 0.8;

const REQUESTS_PER_SECOND: NonZeroU32 = match NonZeroU32::new(5) {
    Some(rate) => rate,
    None => NonZeroU32::MIN,
};

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Concern {
    Label(String),
    Detailed {
        #[serde(alias = "name", alias = "label")]
        r#type: String,
        #[serde(default)]
        severity: Option<f64>,
    },
}

/// Native inference response
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HuggingFaceResponse {
    #[serde(default)]
    visia_scores: BTreeMap<String, f64>,
    #[serde(default)]
    concerns: Vec<Concern>,
    #[serde(default)]
    confidence: Option<f64>,
}

/// Hugging Face inference client
pub struct HuggingFaceProvider {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    rate_limiter: RateLimiter<
        governor::state::direct::NotKeyed,
        governor::state::InMemoryState,
        governor::clock::DefaultClock,
    >,
}

impl HuggingFaceProvider {
    pub fn new(client: Client, api_key: Option<String>, base_url: Option<String>) -> Self {
        Self {
            client,
            base_url: trim_base_url(base_url.as_deref().unwrap_or(DEFAULT_BASE_URL)),
            api_key: api_key.filter(|key| !key.trim().is_empty()),
            rate_limiter: RateLimiter::direct(Quota::per_second(REQUESTS_PER_SECOND)),
        }
    }
}

#[async_trait]
impl ProviderAdapter for HuggingFaceProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::GeneralModel
    }

    fn is_available(&self) -> bool {
        self.api_key.is_some()
    }

    async fn invoke(
        &self,
        image: &ImageHandle,
        params: &ProviderParams,
        timeout: Duration,
    ) -> Result<ProviderResult, ProviderFailure> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ProviderFailure::AuthError("API key not configured".to_string()))?;

        let start = Instant::now();

        // Waiting for a permit counts against the call's own timeout
        tokio::time::timeout(timeout, self.rate_limiter.until_ready())
            .await
            .map_err(|_| ProviderFailure::RateLimited)?;
        let remaining = timeout.saturating_sub(start.elapsed());
        if remaining.is_zero() {
            return Err(ProviderFailure::Timeout);
        }

        let mut body = image_payload(image);
        body["parameters"] = serde_json::json!({
            "analysis_type": params.focus.as_str(),
            "locale": params.locale,
        });

        debug!(provider = PROVIDER_NAME, "Querying Hugging Face inference API");

        let response: HuggingFaceResponse = send_json(
            self.client
                .post(format!("{}/{}", self.base_url, MODEL_PATH))
                .bearer_auth(api_key)
                .json(&body),
            remaining,
        )
        .await?;

        translate(response, elapsed_ms(start))
    }
}

fn translate(
    response: HuggingFaceResponse,
    processing_time_ms: u64,
) -> Result<ProviderResult, ProviderFailure> {
    let mut severity = SeverityMap::new();

    for (label, score) in &response.visia_scores {
        if !score.is_finite() {
            continue;
        }
        let scaled = score / 10.0;
        match label.as_str() {
            "radiance" => {
                severity.insert(SkinMetric::Dullness, clamp_severity(10.0 - scaled));
            }
            "spots" => {
                severity.insert(SkinMetric::Spots, clamp_severity(scaled));
                severity.insert(SkinMetric::Pigmentation, clamp_severity(scaled));
            }
            "wrinkles" => {
                severity.insert(SkinMetric::Wrinkles, clamp_severity(scaled));
                severity.insert(SkinMetric::FineLines, clamp_severity(scaled));
            }
            "pores" => {
                severity.insert(SkinMetric::Pores, clamp_severity(scaled));
                severity.insert(SkinMetric::Blackheads, clamp_severity(scaled));
            }
            other => {
                if let Some(metric) = SkinMetric::from_label(other) {
                    severity.entry(metric).or_insert_with(|| clamp_severity(scaled));
                }
            }
        }
    }

    // Concerns only fill metrics the VISIA scores did not cover
    for concern in &response.concerns {
        if let Concern::Detailed {
            r#type,
            severity: Some(value),
        } = concern
        {
            if let Some(metric) = SkinMetric::from_label(r#type) {
                if value.is_finite() {
                    severity.entry(metric).or_insert_with(|| clamp_severity(*value));
                }
            }
        }
    }

    if severity.is_empty() {
        return Err(ProviderFailure::InvalidResponse(
            "model returned no usable scores".to_string(),
        ));
    }

    let confidence = normalize_confidence(response.confidence, DEFAULT_CONFIDENCE);
    Ok(ProviderResult::uniform(
        PROVIDER_NAME,
        severity,
        confidence,
        processing_time_ms,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> HuggingFaceResponse {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_visia_scores_scaled_and_fanned_out() {
        let response = parse(
            r#"{
                "visiaScores": {"wrinkles": 45, "spots": 30, "pores": 62, "radiance": 80},
                "concerns": ["wrinkles", "large_pores"],
                "confidence": 0.9
            }"#,
        );

        let result = translate(response, 300).unwrap();
        assert_eq!(result.severity[&SkinMetric::Wrinkles], 4.5);
        assert_eq!(result.severity[&SkinMetric::FineLines], 4.5);
        assert_eq!(result.severity[&SkinMetric::Spots], 3.0);
        assert_eq!(result.severity[&SkinMetric::Pigmentation], 3.0);
        assert_eq!(result.severity[&SkinMetric::Pores], 6.2);
        assert_eq!(result.severity[&SkinMetric::Blackheads], 6.2);
        assert!((result.severity[&SkinMetric::Dullness] - 2.0).abs() < 1e-9);
        assert_eq!(result.confidence_for(SkinMetric::Spots), 0.9);
    }

    #[test]
    fn test_detailed_concerns_fill_gaps_only() {
        let response = parse(
            r#"{
                "visiaScores": {"wrinkles": 50},
                "concerns": [
                    {"type": "Acne", "severity": 7},
                    {"name": "wrinkle", "severity": 9},
                    {"type": "freckles", "severity": 3}
                ]
            }"#,
        );

        let result = translate(response, 0).unwrap();
        assert_eq!(result.severity[&SkinMetric::Acne], 7.0);
        // VISIA score wins over the concern entry
        assert_eq!(result.severity[&SkinMetric::Wrinkles], 5.0);
        assert_eq!(result.severity.len(), 3);
        assert_eq!(result.confidence_for(SkinMetric::Acne), DEFAULT_CONFIDENCE);
    }

    #[test]
    fn test_no_scores_is_invalid() {
        let err = translate(parse(r#"{"concerns": ["acne"]}"#), 0).unwrap_err();
        assert!(matches!(err, ProviderFailure::InvalidResponse(_)));
    }

    #[test]
    fn test_requires_api_key() {
        assert!(!HuggingFaceProvider::new(Client::new(), None, None).is_available());
        assert!(HuggingFaceProvider::new(Client::new(), Some("hf_x".into()), None).is_available());
    }

    #[tokio::test]
    async fn test_rate_limiter_allows_first_request_immediately() {
        let provider = HuggingFaceProvider::new(Client::new(), Some("hf_x".into()), None);
        let start = Instant::now();
        provider.rate_limiter.until_ready().await;
        assert!(start.elapsed() < Duration::from_millis(100));
    }
}
