//! Provider registry
//!
//! Holds the descriptors registered at startup. Read-only afterwards, so it is
//! shared behind an `Arc` without locking.

use crate::config::ProviderCredentials;
use crate::providers::{
    cv_metrics, gemini, huggingface, CvMetricsProvider, GeminiProvider, HuggingFaceProvider,
    ProviderDescriptor,
};
use crate::types::AnalysisTier;
use reqwest::Client;
use std::sync::Arc;
use tracing::info;

const ALL_TIERS: [AnalysisTier; 3] = AnalysisTier::ALL;
const MODEL_TIERS: [AnalysisTier; 2] = [AnalysisTier::Enhanced, AnalysisTier::Clinical];

#[derive(Debug, Clone, Default)]
pub struct ProviderRegistry {
    descriptors: Vec<ProviderDescriptor>,
}

impl ProviderRegistry {
    pub fn new(descriptors: Vec<ProviderDescriptor>) -> Self {
        Self { descriptors }
    }

    /// Registry of the compiled-in providers
    ///
    /// Providers missing their credential or endpoint are still registered and
    /// report themselves unavailable.
    pub fn from_credentials(client: Client, credentials: &ProviderCredentials) -> Self {
        let cv = CvMetricsProvider::new(client.clone(), credentials.cv_service_url.clone());
        let hf = HuggingFaceProvider::new(
            client.clone(),
            credentials.huggingface_api_key.clone(),
            credentials.huggingface_base_url.clone(),
        );
        let gemini = GeminiProvider::new(
            client,
            credentials.gemini_api_key.clone(),
            credentials.gemini_base_url.clone(),
        );

        let registry = Self::new(vec![
            ProviderDescriptor::new(Arc::new(cv), 10, &ALL_TIERS, 0.70),
            ProviderDescriptor::new(Arc::new(hf), 20, &MODEL_TIERS, 0.80),
            ProviderDescriptor::new(Arc::new(gemini), 30, &MODEL_TIERS, 0.85),
        ]);

        info!(
            available = ?registry.available_names(),
            "Registered providers: {}, {}, {}",
            cv_metrics::PROVIDER_NAME,
            huggingface::PROVIDER_NAME,
            gemini::PROVIDER_NAME
        );
        registry
    }

    /// Available providers serving `tier`, ascending by priority then name
    pub fn eligible_providers(&self, tier: AnalysisTier) -> Vec<ProviderDescriptor> {
        let mut eligible: Vec<ProviderDescriptor> = self
            .descriptors
            .iter()
            .filter(|d| d.serves(tier) && d.is_available())
            .cloned()
            .collect();
        eligible.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.name.cmp(&b.name)));
        eligible
    }

    pub fn descriptors(&self) -> &[ProviderDescriptor] {
        &self.descriptors
    }

    pub fn priority_of(&self, name: &str) -> Option<u32> {
        self.descriptors
            .iter()
            .find(|d| d.name == name)
            .map(|d| d.priority)
    }

    /// Names of every available provider, ascending by priority
    pub fn available_names(&self) -> Vec<String> {
        let mut available: Vec<&ProviderDescriptor> =
            self.descriptors.iter().filter(|d| d.is_available()).collect();
        available.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.name.cmp(&b.name)));
        available.into_iter().map(|d| d.name.clone()).collect()
    }
}
