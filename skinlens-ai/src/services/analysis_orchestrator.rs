//! Orchestration facade - the single entry point for skin analysis
//!
//! `analyze` validates the request, then either serves it from the result
//! cache, joins an identical in-flight analysis, or runs the pipeline:
//!
//! 1. Registry: eligible providers for the tier
//! 2. Executor: sequential fallback or clinical fan-out
//! 3. Merger (or the deterministic fallback when nothing succeeded)
//! 4. Enrichment (only after a real provider succeeded)
//! 5. Canonical mapping
//! 6. Record store (best-effort)
//!
//! One overall deadline covers both the provider and enrichment phases.
//! Provider unavailability never reaches the caller; only validation and
//! cache faults do.

use crate::config::OrchestratorConfig;
use crate::db::RecordStore;
use crate::enrichment::{run_enrichment, EnrichmentAdapter};
use crate::error::AnalysisError;
use crate::executor::ProviderExecutor;
use crate::fusion::{fallback_ensemble, merge, CanonicalMapper, PercentileModel};
use crate::registry::ProviderRegistry;
use crate::services::result_cache::{CacheSource, CacheStats, ResultCache, TtlPolicy};
use crate::types::{AnalysisRecord, AnalysisRequest, CacheKey, EnrichmentSet};
use skinlens_common::events::{AnalysisEvent, EventBus};
use skinlens_common::time::{elapsed_ms, now};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

struct Pipeline {
    registry: Arc<ProviderRegistry>,
    executor: ProviderExecutor,
    enrichers: Vec<Arc<dyn EnrichmentAdapter>>,
    mapper: CanonicalMapper,
    store: Option<Arc<dyn RecordStore>>,
    event_bus: EventBus,
    config: OrchestratorConfig,
}

/// Builder for [`AnalysisOrchestrator`]
pub struct OrchestratorBuilder {
    registry: ProviderRegistry,
    config: OrchestratorConfig,
    enrichers: Vec<Arc<dyn EnrichmentAdapter>>,
    percentiles: PercentileModel,
    store: Option<Arc<dyn RecordStore>>,
    event_bus: Option<EventBus>,
}

impl OrchestratorBuilder {
    pub fn enrichment(mut self, adapter: Arc<dyn EnrichmentAdapter>) -> Self {
        self.enrichers.push(adapter);
        self
    }

    pub fn percentile_model(mut self, percentiles: PercentileModel) -> Self {
        self.percentiles = percentiles;
        self
    }

    pub fn record_store(mut self, store: Arc<dyn RecordStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn build(self) -> AnalysisOrchestrator {
        let event_bus = self.event_bus.unwrap_or_else(|| EventBus::new(100));
        let executor = ProviderExecutor::new(
            self.config.provider_timeout,
            self.config.overall_deadline,
            self.config.clinical_fanout,
            self.config.breaker,
            event_bus.clone(),
        );

        AnalysisOrchestrator {
            cache: ResultCache::new(self.config.cache_capacity),
            pipeline: Arc::new(Pipeline {
                registry: Arc::new(self.registry),
                executor,
                enrichers: self.enrichers,
                mapper: CanonicalMapper::new(self.percentiles),
                store: self.store,
                event_bus,
                config: self.config,
            }),
        }
    }
}

/// Cheap to clone; clones share the cache, breaker and registry
#[derive(Clone)]
pub struct AnalysisOrchestrator {
    pipeline: Arc<Pipeline>,
    cache: ResultCache,
}

impl AnalysisOrchestrator {
    pub fn builder(registry: ProviderRegistry, config: OrchestratorConfig) -> OrchestratorBuilder {
        OrchestratorBuilder {
            registry,
            config,
            enrichers: Vec::new(),
            percentiles: PercentileModel::default(),
            store: None,
            event_bus: None,
        }
    }

    /// Analyze one image
    ///
    /// # Errors
    /// * `AnalysisError::InvalidRequest` - structural validation failed
    /// * `AnalysisError::Cache` - the result cache is unusable
    pub async fn analyze(
        &self,
        request: AnalysisRequest,
    ) -> Result<Arc<AnalysisRecord>, AnalysisError> {
        request.validate()?;
        let key = request.cache_key();

        let pipeline = Arc::clone(&self.pipeline);
        let task_key = key.clone();
        let ttl = TtlPolicy {
            ttl: self.pipeline.config.cache_ttl,
            fallback_ttl: self.pipeline.config.fallback_ttl,
        };
        let (record, source) = self
            .cache
            .get_or_compute(&key, ttl, move || async move {
                Ok(Arc::new(pipeline.run(&request, &task_key).await))
            })
            .await?;

        match source {
            CacheSource::Hit => {
                debug!(cache_key = %key, record_id = %record.id, "Served analysis from cache");
                self.pipeline.event_bus.emit_lossy(AnalysisEvent::CacheHit {
                    cache_key: key.to_string(),
                    record_id: record.id,
                    timestamp: now(),
                });
            }
            CacheSource::Coalesced => {
                debug!(cache_key = %key, record_id = %record.id, "Shared in-flight analysis");
            }
            CacheSource::Computed => {}
        }

        Ok(record)
    }

    /// Drop any cached result for the request, then analyze it again
    pub async fn analyze_fresh(
        &self,
        request: AnalysisRequest,
    ) -> Result<Arc<AnalysisRecord>, AnalysisError> {
        request.validate()?;
        self.cache.invalidate(&request.cache_key())?;
        self.analyze(request).await
    }

    /// Drop the cached result for `request`; returns whether one existed
    pub fn invalidate(&self, request: &AnalysisRequest) -> Result<bool, AnalysisError> {
        self.cache.invalidate(&request.cache_key())
    }

    pub fn invalidate_key(&self, key: &CacheKey) -> Result<bool, AnalysisError> {
        self.cache.invalidate(key)
    }

    pub fn cache_stats(&self) -> Result<CacheStats, AnalysisError> {
        self.cache.stats()
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.pipeline.registry
    }

    pub fn executor(&self) -> &ProviderExecutor {
        &self.pipeline.executor
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.pipeline.event_bus
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.pipeline.config
    }

    /// Start the periodic expired-entry sweep
    pub fn spawn_cache_sweeper(&self, cancel: CancellationToken) -> JoinHandle<()> {
        self.cache
            .spawn_sweeper(self.pipeline.config.sweep_interval, cancel)
    }
}

impl Pipeline {
    async fn run(&self, request: &AnalysisRequest, key: &CacheKey) -> AnalysisRecord {
        let started = std::time::Instant::now();
        let deadline = Instant::now() + self.config.overall_deadline;
        let tier = request.tier();

        info!(cache_key = %key, tier = %tier, focus = request.focus().as_str(), "Starting analysis");
        self.event_bus.emit_lossy(AnalysisEvent::AnalysisStarted {
            cache_key: key.to_string(),
            tier: tier.to_string(),
            timestamp: now(),
        });

        let eligible = self.registry.eligible_providers(tier);
        if eligible.is_empty() {
            warn!(tier = %tier, "No provider available for tier");
        }

        let outcome = self.executor.execute_until(&eligible, request, deadline).await;
        let invoked = outcome.invoked();

        let (ensemble, enrichment) = match merge(
            outcome.successes,
            outcome.requested,
            self.config.partial_ensemble_penalty,
        ) {
            Some(ensemble) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                let enrichment = run_enrichment(
                    &self.enrichers,
                    request.image(),
                    &ensemble.overall_score,
                    self.config.enrichment_timeout.min(remaining),
                    &self.event_bus,
                )
                .await;
                (ensemble, enrichment)
            }
            None => {
                warn!(
                    cache_key = %key,
                    attempted = invoked,
                    "No provider succeeded, using fallback analysis"
                );
                self.event_bus.emit_lossy(AnalysisEvent::FallbackUsed {
                    cache_key: key.to_string(),
                    attempted: invoked,
                    timestamp: now(),
                });
                (fallback_ensemble(), EnrichmentSet::default())
            }
        };

        let record = self
            .mapper
            .to_record(ensemble, tier, request.focus(), enrichment);

        if let Some(store) = &self.store {
            if let Err(e) = store.save(&record).await {
                warn!(record_id = %record.id, "Failed to persist analysis record: {}", e);
            }
        }

        let elapsed = elapsed_ms(started);
        info!(
            record_id = %record.id,
            providers = ?record.provider_provenance,
            confidence = record.confidence,
            elapsed_ms = elapsed,
            "Analysis completed"
        );
        self.event_bus.emit_lossy(AnalysisEvent::AnalysisCompleted {
            record_id: record.id,
            providers: record.provider_provenance.clone(),
            confidence: record.confidence,
            elapsed_ms: elapsed,
            timestamp: now(),
        });

        record
    }
}
