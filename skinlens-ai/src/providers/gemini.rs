//! Clinical-grade model provider (Gemini via the analysis gateway)

use super::{
    image_payload, send_json, trim_base_url, ProviderAdapter, ProviderFailure, ProviderKind,
    ProviderParams,
};
use crate::fusion::canonical_mapper::{clamp_severity, normalize_confidence};
use crate::types::{ConfidenceMap, ImageHandle, ProviderResult, SeverityMap, SkinMetric};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use skinlens_common::time::elapsed_ms;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

pub const PROVIDER_NAME: &str = "gemini";

pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";

const DEFAULT_CONFIDENCE: f64 = 0.8;

/// Native gateway response
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    /// Concern label → severity (0-10)
    #[serde(default)]
    severity: BTreeMap<String, f64>,
    #[serde(default)]
    confidence: Option<f64>,
    /// Optional per-concern confidence overriding the overall one
    #[serde(default)]
    metric_confidence: BTreeMap<String, f64>,
}

pub struct GeminiProvider {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl GeminiProvider {
    pub fn new(client: Client, api_key: Option<String>, base_url: Option<String>) -> Self {
        Self {
            client,
            base_url: trim_base_url(base_url.as_deref().unwrap_or(DEFAULT_BASE_URL)),
            api_key: api_key.filter(|key| !key.trim().is_empty()),
        }
    }
}

#[async_trait]
impl ProviderAdapter for GeminiProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::ClinicalModel
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
        let mut body = image_payload(image);
        body["analysis_type"] = params.focus.as_str().into();
        body["tier"] = params.tier.as_str().into();
        body["locale"] = params.locale.as_str().into();

        debug!(provider = PROVIDER_NAME, tier = %params.tier, "Querying clinical analysis gateway");

        let response: GeminiResponse = send_json(
            self.client
                .post(format!("{}/api/analyze/clinical", self.base_url))
                .header("x-api-key", api_key)
                .json(&body),
            timeout,
        )
        .await?;

        translate(response, elapsed_ms(start))
    }
}

fn translate(
    response: GeminiResponse,
    processing_time_ms: u64,
) -> Result<ProviderResult, ProviderFailure> {
    let overall = normalize_confidence(response.confidence, DEFAULT_CONFIDENCE);
    let mut severity = SeverityMap::new();
    let mut confidence = ConfidenceMap::new();

    for (label, value) in &response.severity {
        let Some(metric) = SkinMetric::from_label(label) else {
            warn!(provider = PROVIDER_NAME, label = %label, "Dropping unknown concern label");
            continue;
        };
        if !value.is_finite() {
            continue;
        }
        severity.insert(metric, clamp_severity(*value));
        let metric_confidence = response
            .metric_confidence
            .get(label)
            .copied()
            .map(|c| normalize_confidence(Some(c), overall))
            .unwrap_or(overall);
        confidence.insert(metric, metric_confidence);
    }

    if severity.is_empty() {
        return Err(ProviderFailure::InvalidResponse(
            "clinical model returned no severities".to_string(),
        ));
    }

    Ok(ProviderResult {
        provider_name: PROVIDER_NAME.to_string(),
        severity,
        confidence,
        processing_time_ms,
    })
}
