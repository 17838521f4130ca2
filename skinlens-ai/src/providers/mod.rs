//! Provider adapters - uniform wrappers around external analysis capabilities
//!
//! Every adapter translates its provider's native response into canonical
//! [`SkinMetric`](crate::types::SkinMetric) severities and reports failures
//! through the shared [`ProviderFailure`] taxonomy. Adapters never see the
//! cache, the breaker or other providers.

use crate::types::{AnalysisFocus, AnalysisRequest, AnalysisTier, ImageHandle, ProviderResult};
use async_trait::async_trait;
use base64::Engine;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub mod cv_metrics;
pub mod gemini;
pub mod huggingface;

pub use cv_metrics::CvMetricsProvider;
pub use gemini::GeminiProvider;
pub use huggingface::HuggingFaceProvider;

/// Longest provider error body carried into a failure message
const MAX_ERROR_BODY: usize = 200;

/// Provider invocation failure
///
/// Always recovered inside the executor; never surfaces to callers.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProviderFailure {
    #[error("provider call timed out")]
    Timeout,

    #[error("provider rate limit exceeded")]
    RateLimited,

    #[error("invalid provider response: {0}")]
    InvalidResponse(String),

    #[error("provider rejected credentials: {0}")]
    AuthError(String),
}

impl ProviderFailure {
    /// Stable kind name used in events and logs
    pub fn kind(&self) -> &'static str {
        match self {
            ProviderFailure::Timeout => "timeout",
            ProviderFailure::RateLimited => "rate_limited",
            ProviderFailure::InvalidResponse(_) => "invalid_response",
            ProviderFailure::AuthError(_) => "auth_error",
        }
    }

    /// Map a non-success HTTP status to a failure
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                ProviderFailure::AuthError(format!("HTTP {}", status))
            }
            StatusCode::TOO_MANY_REQUESTS => ProviderFailure::RateLimited,
            _ => {
                let body: String = body.chars().take(MAX_ERROR_BODY).collect();
                ProviderFailure::InvalidResponse(format!("HTTP {}: {}", status, body))
            }
        }
    }

    /// Map a transport or decode error to a failure
    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderFailure::Timeout
        } else if let Some(status) = err.status() {
            ProviderFailure::from_status(status, "")
        } else {
            ProviderFailure::InvalidResponse(err.to_string())
        }
    }
}

/// Provider family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    /// Local computer-vision metrics service
    CvMetrics,
    /// General-purpose hosted vision model
    GeneralModel,
    /// Clinical-grade hosted model
    ClinicalModel,
}

/// Per-request parameters forwarded to a provider
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderParams {
    pub tier: AnalysisTier,
    pub focus: AnalysisFocus,
    pub locale: String,
}

impl From<&AnalysisRequest> for ProviderParams {
    fn from(request: &AnalysisRequest) -> Self {
        Self {
            tier: request.tier(),
            focus: request.focus(),
            locale: request.locale().to_string(),
        }
    }
}

/// Provider adapter trait - every external analysis capability implements this
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Provider identifier (e.g., "cv-metrics", "huggingface")
    fn name(&self) -> &str;

    fn kind(&self) -> ProviderKind;

    /// Check if the provider is usable (credentials and endpoint configured)
    fn is_available(&self) -> bool {
        true
    }

    /// Analyze one image
    ///
    /// # Returns
    /// * `Ok(ProviderResult)` - Canonical severities with per-metric confidence
    /// * `Err(ProviderFailure)` - Recovered by the executor (next provider or fallback)
    async fn invoke(
        &self,
        image: &ImageHandle,
        params: &ProviderParams,
        timeout: Duration,
    ) -> Result<ProviderResult, ProviderFailure>;
}

/// Registration record for one provider. Read-only after startup.
#[derive(Clone)]
pub struct ProviderDescriptor {
    pub name: String,
    pub kind: ProviderKind,
    /// Lower is tried first
    pub priority: u32,
    pub capability_tiers: Vec<AnalysisTier>,
    /// Historical accuracy of this provider (0-1)
    pub baseline_accuracy: f64,
    pub adapter: Arc<dyn ProviderAdapter>,
}

impl ProviderDescriptor {
    pub fn new(
        adapter: Arc<dyn ProviderAdapter>,
        priority: u32,
        capability_tiers: &[AnalysisTier],
        baseline_accuracy: f64,
    ) -> Self {
        Self {
            name: adapter.name().to_string(),
            kind: adapter.kind(),
            priority,
            capability_tiers: capability_tiers.to_vec(),
            baseline_accuracy: baseline_accuracy.clamp(0.0, 1.0),
            adapter,
        }
    }

    pub fn is_available(&self) -> bool {
        self.adapter.is_available()
    }

    pub fn serves(&self, tier: AnalysisTier) -> bool {
        self.capability_tiers.contains(&tier)
    }
}

impl fmt::Debug for ProviderDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderDescriptor")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("priority", &self.priority)
            .field("capability_tiers", &self.capability_tiers)
            .field("baseline_accuracy", &self.baseline_accuracy)
            .finish()
    }
}

/// JSON fragment describing the image for a provider request body
pub(crate) fn image_payload(image: &ImageHandle) -> Value {
    match image {
        ImageHandle::Bytes(bytes) => json!({
            "image_base64": base64::engine::general_purpose::STANDARD.encode(bytes),
        }),
        ImageHandle::Uri(uri) => json!({ "image_url": uri }),
    }
}

/// Send a prepared request and decode a JSON body, mapping every failure mode
pub(crate) async fn send_json<T: DeserializeOwned>(
    request: reqwest::RequestBuilder,
    timeout: Duration,
) -> Result<T, ProviderFailure> {
    let response = request
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| ProviderFailure::from_reqwest(&e))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ProviderFailure::from_status(status, &body));
    }

    response.json::<T>().await.map_err(|e| {
        if e.is_timeout() {
            ProviderFailure::Timeout
        } else {
            ProviderFailure::InvalidResponse(format!("undecodable body: {}", e))
        }
    })
}

/// Strip trailing slashes so `format!("{}/path", base)` never doubles them
pub(crate) fn trim_base_url(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SeverityMap;

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            ProviderFailure::from_status(StatusCode::UNAUTHORIZED, ""),
            ProviderFailure::AuthError(_)
        ));
        assert!(matches!(
            ProviderFailure::from_status(StatusCode::FORBIDDEN, ""),
            ProviderFailure::AuthError(_)
        ));
        assert_eq!(
            ProviderFailure::from_status(StatusCode::TOO_MANY_REQUESTS, ""),
            ProviderFailure::RateLimited
        );
        assert!(matches!(
            ProviderFailure::from_status(StatusCode::BAD_GATEWAY, "upstream down"),
            ProviderFailure::InvalidResponse(msg) if msg.contains("upstream down")
        ));
    }

    #[test]
    fn test_error_body_is_truncated() {
        let body = "x".repeat(1_000);
        match ProviderFailure::from_status(StatusCode::INTERNAL_SERVER_ERROR, &body) {
            ProviderFailure::InvalidResponse(msg) => assert!(msg.len() < 300),
            other => panic!("unexpected failure {:?}", other),
        }
    }

    #[test]
    fn test_failure_kind_names() {
        assert_eq!(ProviderFailure::Timeout.kind(), "timeout");
        assert_eq!(ProviderFailure::RateLimited.kind(), "rate_limited");
        assert_eq!(ProviderFailure::InvalidResponse(String::new()).kind(), "invalid_response");
        assert_eq!(ProviderFailure::AuthError(String::new()).kind(), "auth_error");
    }

    #[test]
    fn test_image_payload_shapes() {
        let bytes = ImageHandle::Bytes(Arc::from(vec![0xffu8, 0xd8, 0xff]));
        assert_eq!(image_payload(&bytes)["image_base64"], "/9j/");

        let uri = ImageHandle::Uri("https://images.example/a.jpg".to_string());
        assert_eq!(image_payload(&uri)["image_url"], "https://images.example/a.jpg");
    }

    #[test]
    fn test_descriptor_defaults() {
        struct Dummy;

        #[async_trait]
        impl ProviderAdapter for Dummy {
            fn name(&self) -> &str {
                "dummy"
            }

            fn kind(&self) -> ProviderKind {
                ProviderKind::CvMetrics
            }

            async fn invoke(
                &self,
                _image: &ImageHandle,
                _params: &ProviderParams,
                _timeout: Duration,
            ) -> Result<ProviderResult, ProviderFailure> {
                Ok(ProviderResult::uniform("dummy", SeverityMap::new(), 1.0, 0))
            }
        }

        let descriptor =
            ProviderDescriptor::new(Arc::new(Dummy), 5, &[AnalysisTier::Basic], 1.4);
        assert_eq!(descriptor.name, "dummy");
        assert!(descriptor.is_available());
        assert!(descriptor.serves(AnalysisTier::Basic));
        assert!(!descriptor.serves(AnalysisTier::Clinical));
        assert_eq!(descriptor.baseline_accuracy, 1.0);
    }

    #[test]
    fn test_trim_base_url() {
        assert_eq!(trim_base_url("http://localhost:8000/"), "http://localhost:8000");
        assert_eq!(trim_base_url("http://localhost:8000"), "http://localhost:8000");
    }
}
