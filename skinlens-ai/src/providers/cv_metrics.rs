//! Local computer-vision metrics provider
//!
//! Talks to the in-house CV service, which runs classic detectors (spot
//! detection, pore analysis, wrinkle detection, texture, redness) and returns
//! one reading per detector. Serves every tier and is the cheapest provider.

use super::{
    image_payload, send_json, trim_base_url, ProviderAdapter, ProviderFailure, ProviderKind,
    ProviderParams,
};
use crate::fusion::canonical_mapper::{clamp_severity, normalize_confidence};
use crate::types::{ImageHandle, ProviderResult, SeverityMap, SkinMetric};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use skinlens_common::time::elapsed_ms;
use std::time::{Duration, Instant};
use tracing::debug;

pub const PROVIDER_NAME: &str = "cv-metrics";

/// Confidence assumed when the service omits one
const DEFAULT_CONFIDENCE: f64 = 0.75;

#[derive(Debug, Deserialize)]
struct SeverityReading {
    severity: f64,
}

#[derive(Debug, Deserialize)]
struct TextureReading {
    /// 0 (rough) - 10 (smooth)
    smoothness: f64,
}

/// Native CV service response
#[derive(Debug, Deserialize)]
struct CvMetricsResponse {
    #[serde(default)]
    spots: Option<SeverityReading>,
    #[serde(default)]
    pores: Option<SeverityReading>,
    #[serde(default)]
    wrinkles: Option<SeverityReading>,
    #[serde(default)]
    texture: Option<TextureReading>,
    #[serde(default)]
    redness: Option<SeverityReading>,
    #[serde(default)]
    confidence: Option<f64>,
}

/// Computer-vision metrics client
pub struct CvMetricsProvider {
    client: Client,
    /// Service base URL; the provider is unavailable without one
    base_url: Option<String>,
}

impl CvMetricsProvider {
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
impl ProviderAdapter for CvMetricsProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::CvMetrics
    }

    fn is_available(&self) -> bool {
        self.base_url.is_some()
    }

    async fn invoke(
        &self,
        image: &ImageHandle,
        params: &ProviderParams,
        timeout: Duration,
    ) -> Result<ProviderResult, ProviderFailure> {
        let base_url = self.base_url.as_deref().ok_or_else(|| {
            ProviderFailure::InvalidResponse("CV service URL not configured".to_string())
        })?;

        let start = Instant::now();
        let mut body = image_payload(image);
        body["focus"] = params.focus.as_str().into();

        debug!(provider = PROVIDER_NAME, focus = params.focus.as_str(), "Querying CV metrics service");

        let response: CvMetricsResponse = send_json(
            self.client.post(format!("{}/analyze", base_url)).json(&body),
            timeout,
        )
        .await?;

        translate(response, elapsed_ms(start))
    }
}

fn translate(
    response: CvMetricsResponse,
    processing_time_ms: u64,
) -> Result<ProviderResult, ProviderFailure> {
    let mut severity = SeverityMap::new();

    let mut put = |metric: SkinMetric, value: f64| {
        if value.is_finite() {
            severity.insert(metric, clamp_severity(value));
        }
    };

    if let Some(spots) = &response.spots {
        put(SkinMetric::Spots, spots.severity);
        // Spot detector also drives pigmentation
        put(SkinMetric::Pigmentation, spots.severity);
    }
    if let Some(pores) = &response.pores {
        put(SkinMetric::Pores, pores.severity);
    }
    if let Some(wrinkles) = &response.wrinkles {
        put(SkinMetric::Wrinkles, wrinkles.severity);
    }
    if let Some(texture) = &response.texture {
        put(SkinMetric::Texture, 10.0 - texture.smoothness);
    }
    if let Some(redness) = &response.redness {
        put(SkinMetric::Redness, redness.severity);
    }

    if severity.is_empty() {
        return Err(ProviderFailure::InvalidResponse(
            "CV service returned no metrics".to_string(),
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
