//! Test doubles for providers and enrichment phases
#![allow(dead_code)]

use async_trait::async_trait;
use skinlens_ai::config::OrchestratorConfig;
use skinlens_ai::enrichment::{EnrichmentAdapter, EnrichmentError};
use skinlens_ai::executor::circuit_breaker::BreakerPolicy;
use skinlens_ai::providers::{
    ProviderAdapter, ProviderDescriptor, ProviderFailure, ProviderKind, ProviderParams,
};
use skinlens_ai::registry::ProviderRegistry;
use skinlens_ai::types::{
    AnalysisTier, DepthEstimate, EnrichmentKind, EnrichmentPayload, EnrichmentResult,
    ImageHandle, LightingCondition, LightingScenario, LightingSimulation, ProviderResult,
    SeverityMap, SkinMetric,
};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// What a mock provider does when invoked
#[derive(Debug, Clone)]
pub enum Behavior {
    Succeed { severity: SeverityMap, confidence: f64 },
    Fail(ProviderFailure),
}

/// Provider that answers from a script after an optional delay
pub struct MockProvider {
    name: String,
    delay: Duration,
    behavior: Mutex<Behavior>,
    calls: AtomicUsize,
}

impl MockProvider {
    pub fn new(name: &str, behavior: Behavior) -> Arc<Self> {
        Self::with_delay(name, behavior, Duration::ZERO)
    }

    pub fn with_delay(name: &str, behavior: Behavior, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            delay,
            behavior: Mutex::new(behavior),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn succeeding(name: &str, metrics: &[(SkinMetric, f64)], confidence: f64) -> Arc<Self> {
        Self::new(
            name,
            Behavior::Succeed {
                severity: severity(metrics),
                confidence,
            },
        )
    }

    pub fn failing(name: &str, failure: ProviderFailure) -> Arc<Self> {
        Self::new(name, Behavior::Fail(failure))
    }

    pub fn set_behavior(&self, behavior: Behavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderAdapter for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::GeneralModel
    }

    async fn invoke(
        &self,
        _image: &ImageHandle,
        _params: &ProviderParams,
        _timeout: Duration,
    ) -> Result<ProviderResult, ProviderFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let behavior = self.behavior.lock().unwrap().clone();
        match behavior {
            Behavior::Succeed {
                severity,
                confidence,
            } => Ok(ProviderResult::uniform(&self.name, severity, confidence, 5)),
            Behavior::Fail(failure) => Err(failure),
        }
    }
}

/// Enrichment phase that answers after `delay`
pub struct MockEnrichment {
    kind: EnrichmentKind,
    delay: Duration,
    calls: AtomicUsize,
}

impl MockEnrichment {
    pub fn new(kind: EnrichmentKind, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            kind,
            delay,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EnrichmentAdapter for MockEnrichment {
    fn kind(&self) -> EnrichmentKind {
        self.kind
    }

    async fn enrich(
        &self,
        _image: &ImageHandle,
        base_scores: &SeverityMap,
        _timeout: Duration,
    ) -> Result<EnrichmentResult, EnrichmentError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;

        let payload = match self.kind {
            EnrichmentKind::Lighting => EnrichmentPayload::Lighting(LightingSimulation {
                scenarios: vec![LightingScenario {
                    condition: LightingCondition::Daylight,
                    visibility: base_scores.keys().map(|m| (*m, 0.5)).collect(),
                    quality_score: 80.0,
                }],
            }),
            EnrichmentKind::Depth => EnrichmentPayload::Depth(DepthEstimate {
                mean_depth_mm: 0.3,
                metric_depth_mm: BTreeMap::new(),
                mesh_vertices: 468,
            }),
        };
        Ok(EnrichmentResult {
            payload,
            confidence: 0.7,
        })
    }
}

pub fn severity(metrics: &[(SkinMetric, f64)]) -> SeverityMap {
    metrics.iter().copied().collect()
}

pub fn descriptor(
    provider: &Arc<MockProvider>,
    priority: u32,
    tiers: &[AnalysisTier],
    accuracy: f64,
) -> ProviderDescriptor {
    let adapter: Arc<dyn ProviderAdapter> = provider.clone();
    ProviderDescriptor::new(adapter, priority, tiers, accuracy)
}

/// Registry where every provider serves every tier, priority in list order
pub fn registry(providers: &[&Arc<MockProvider>]) -> ProviderRegistry {
    ProviderRegistry::new(
        providers
            .iter()
            .enumerate()
            .map(|(i, p)| descriptor(p, (i as u32 + 1) * 10, &AnalysisTier::ALL, 0.8))
            .collect(),
    )
}

/// Short timeouts so paused-clock tests finish instantly
pub fn test_config() -> OrchestratorConfig {
    OrchestratorConfig {
        provider_timeout: Duration::from_millis(200),
        overall_deadline: Duration::from_millis(500),
        enrichment_timeout: Duration::from_millis(100),
        clinical_fanout: 3,
        partial_ensemble_penalty: 0.85,
        breaker: BreakerPolicy {
            failure_threshold: 3,
            window: Duration::from_secs(60),
            cooldown: Duration::from_secs(30),
        },
        cache_ttl: Duration::from_secs(60),
        fallback_ttl: Duration::from_secs(5),
        cache_capacity: 100,
        sweep_interval: Duration::from_secs(1),
    }
}
