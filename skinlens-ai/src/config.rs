//! Configuration resolution for skinlens-ai
//!
//! Provider credentials and service endpoints resolve with ENV → TOML
//! priority. Orchestration policy comes from the TOML `[orchestration]` and
//! `[cache]` sections and is converted here into runtime durations.

use crate::executor::circuit_breaker::BreakerPolicy;
use skinlens_common::config::TomlConfig;
use skinlens_common::time::millis_to_duration;
use std::time::Duration;
use tracing::{info, warn};

pub const HUGGINGFACE_API_KEY_ENV: &str = "SKINLENS_HUGGINGFACE_API_KEY";
pub const GEMINI_API_KEY_ENV: &str = "SKINLENS_GEMINI_API_KEY";
pub const CV_SERVICE_URL_ENV: &str = "SKINLENS_CV_SERVICE_URL";
pub const ENRICHMENT_SERVICE_URL_ENV: &str = "SKINLENS_ENRICHMENT_SERVICE_URL";

/// Resolved provider credentials and endpoints
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderCredentials {
    pub cv_service_url: Option<String>,
    pub huggingface_api_key: Option<String>,
    pub huggingface_base_url: Option<String>,
    pub gemini_api_key: Option<String>,
    pub gemini_base_url: Option<String>,
    pub enrichment_service_url: Option<String>,
}

impl ProviderCredentials {
    /// Resolve every credential from the environment and the TOML config
    pub fn resolve(toml_config: &TomlConfig) -> Self {
        let providers = &toml_config.providers;
        Self {
            cv_service_url: resolve_setting(
                "CV service URL",
                CV_SERVICE_URL_ENV,
                providers.cv_service_url.as_deref(),
            ),
            huggingface_api_key: resolve_setting(
                "Hugging Face API key",
                HUGGINGFACE_API_KEY_ENV,
                providers.huggingface_api_key.as_deref(),
            ),
            huggingface_base_url: providers
                .huggingface_base_url
                .clone()
                .filter(|v| is_valid_value(v)),
            gemini_api_key: resolve_setting(
                "Gemini API key",
                GEMINI_API_KEY_ENV,
                providers.gemini_api_key.as_deref(),
            ),
            gemini_base_url: providers.gemini_base_url.clone().filter(|v| is_valid_value(v)),
            enrichment_service_url: resolve_setting(
                "enrichment service URL",
                ENRICHMENT_SERVICE_URL_ENV,
                providers.enrichment_service_url.as_deref(),
            ),
        }
    }
}

/// Resolve one setting with ENV → TOML priority
///
/// Warns when both sources carry a value. Returns `None` (provider
/// unavailable) when neither does.
pub fn resolve_setting(label: &str, env_var: &str, toml_value: Option<&str>) -> Option<String> {
    let env_value = std::env::var(env_var).ok().filter(|v| is_valid_value(v));
    let toml_value = toml_value.filter(|v| is_valid_value(v));

    if env_value.is_some() && toml_value.is_some() {
        warn!(
            "{} found in environment and TOML config. Using environment ({}).",
            label, env_var
        );
    }

    if let Some(value) = env_value {
        info!("{} loaded from environment variable", label);
        return Some(value);
    }

    if let Some(value) = toml_value {
        info!("{} loaded from TOML config", label);
        return Some(value.to_string());
    }

    info!("{} not configured", label);
    None
}

/// Validate a setting value (non-empty, non-whitespace)
pub fn is_valid_value(value: &str) -> bool {
    !value.trim().is_empty()
}

/// Runtime orchestration policy
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorConfig {
    pub provider_timeout: Duration,
    pub overall_deadline: Duration,
    pub enrichment_timeout: Duration,
    /// Maximum concurrent providers for the clinical tier
    pub clinical_fanout: usize,
    pub partial_ensemble_penalty: f64,
    pub breaker: BreakerPolicy,
    pub cache_ttl: Duration,
    pub fallback_ttl: Duration,
    pub cache_capacity: usize,
    pub sweep_interval: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::from_toml(&TomlConfig::default())
    }
}

impl OrchestratorConfig {
    pub fn from_toml(toml_config: &TomlConfig) -> Self {
        let orchestration = &toml_config.orchestration;
        let cache = &toml_config.cache;

        let penalty = orchestration.partial_ensemble_penalty;
        let partial_ensemble_penalty = if (0.0..=1.0).contains(&penalty) {
            penalty
        } else {
            warn!(
                "partial_ensemble_penalty {} outside [0,1], clamping",
                penalty
            );
            penalty.clamp(0.0, 1.0)
        };

        Self {
            provider_timeout: millis_to_duration(orchestration.provider_timeout_ms),
            overall_deadline: millis_to_duration(orchestration.overall_deadline_ms),
            enrichment_timeout: millis_to_duration(orchestration.enrichment_timeout_ms),
            clinical_fanout: orchestration.clinical_fanout.max(1),
            partial_ensemble_penalty,
            breaker: BreakerPolicy {
                failure_threshold: orchestration.breaker_failure_threshold.max(1),
                window: millis_to_duration(orchestration.breaker_window_ms),
                cooldown: millis_to_duration(orchestration.breaker_cooldown_ms),
            },
            cache_ttl: Duration::from_secs(cache.ttl_seconds),
            // Never outlive a real result
            fallback_ttl: Duration::from_secs(cache.fallback_ttl_seconds.min(cache.ttl_seconds)),
            cache_capacity: cache.capacity.max(1),
            sweep_interval: Duration::from_secs(cache.sweep_interval_seconds.max(1)),
        }
    }
}
