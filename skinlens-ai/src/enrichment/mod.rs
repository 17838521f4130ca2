//! Best-effort enrichment phases (lighting simulation, depth estimation)
//!
//! Enrichment runs only after a real provider succeeded. Phases run
//! concurrently, each under its own short timeout capped by what is left of
//! the request deadline. A failed, timed-out or unconfigured phase is simply absent from the record; it never fails the
//! request and never touches scores or confidence.

pub mod depth;
pub mod lighting;

pub use depth::DepthEstimator;
pub use lighting::LightingSimulator;

use crate::types::{EnrichmentKind, EnrichmentResult, EnrichmentSet, ImageHandle, SeverityMap};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use skinlens_common::events::{AnalysisEvent, EventBus};
use skinlens_common::time::now;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EnrichmentError {
    #[error("enrichment timed out")]
    Timeout,

    #[error("enrichment service not configured")]
    Unavailable,

    #[error("enrichment failed: {0}")]
    Failed(String),
}

#[async_trait]
pub trait EnrichmentAdapter: Send + Sync {
    fn kind(&self) -> EnrichmentKind;

    fn is_available(&self) -> bool {
        true
    }

    /// Enrich one analysis
    ///
    /// `base_scores` are the merged severities; adapters read them but the
    /// record's scores are never replaced by enrichment output.
    async fn enrich(
        &self,
        image: &ImageHandle,
        base_scores: &SeverityMap,
        timeout: Duration,
    ) -> Result<EnrichmentResult, EnrichmentError>;
}

/// Run every available adapter concurrently and collect what succeeded
///
/// A zero `timeout` means the request deadline is spent: every available
/// phase is reported absent without being invoked.
pub async fn run_enrichment(
    adapters: &[Arc<dyn EnrichmentAdapter>],
    image: &ImageHandle,
    base_scores: &SeverityMap,
    timeout: Duration,
    event_bus: &EventBus,
) -> EnrichmentSet {
    let available = adapters.iter().filter(|adapter| {
        let available = adapter.is_available();
        if !available {
            debug!(kind = %adapter.kind(), "Skipping unconfigured enrichment");
        }
        available
    });

    if timeout.is_zero() {
        for adapter in available {
            warn!(kind = %adapter.kind(), "Request deadline elapsed, skipping enrichment");
            absent(event_bus, adapter.kind(), "request deadline elapsed");
        }
        return EnrichmentSet::default();
    }

    let runs = available
        .map(|adapter| async move {
            let outcome =
                match tokio::time::timeout(timeout, adapter.enrich(image, base_scores, timeout))
                    .await
                {
                    Ok(outcome) => outcome,
                    Err(_) => Err(EnrichmentError::Timeout),
                };
            (adapter.kind(), outcome)
        });

    let mut set = EnrichmentSet::default();
    for (kind, outcome) in futures::future::join_all(runs).await {
        match outcome {
            Ok(result) if result.kind() == kind => set.insert(result),
            Ok(result) => {
                warn!(
                    expected = %kind,
                    actual = %result.kind(),
                    "Enrichment adapter returned the wrong kind, discarding"
                );
                absent(event_bus, kind, "mismatched enrichment kind");
            }
            Err(err) => {
                warn!(kind = %kind, "Enrichment absent: {}", err);
                absent(event_bus, kind, &err.to_string());
            }
        }
    }
    set
}

fn absent(event_bus: &EventBus, kind: EnrichmentKind, reason: &str) {
    event_bus.emit_lossy(AnalysisEvent::EnrichmentAbsent {
        kind: kind.to_string(),
        reason: reason.to_string(),
        timestamp: now(),
    });
}

/// POST a JSON body to the enrichment service and decode the reply
pub(crate) async fn post_enrichment<T: DeserializeOwned>(
    request: reqwest::RequestBuilder,
    timeout: Duration,
) -> Result<T, EnrichmentError> {
    let response = request.timeout(timeout).send().await.map_err(map_reqwest)?;

    let status = response.status();
    if !status.is_success() {
        return Err(EnrichmentError::Failed(format!("HTTP {}", status)));
    }

    response.json::<T>().await.map_err(map_reqwest)
}

fn map_reqwest(err: reqwest::Error) -> EnrichmentError {
    if err.is_timeout() {
        EnrichmentError::Timeout
    } else {
        EnrichmentError::Failed(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DepthEstimate, EnrichmentPayload, LightingSimulation};
    use std::collections::BTreeMap;

    struct SlowDepth;

    #[async_trait]
    impl EnrichmentAdapter for SlowDepth {
        fn kind(&self) -> EnrichmentKind {
            EnrichmentKind::Depth
        }

        async fn enrich(
            &self,
            _image: &ImageHandle,
            _base_scores: &SeverityMap,
            _timeout: Duration,
        ) -> Result<EnrichmentResult, EnrichmentError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(EnrichmentResult {
                payload: EnrichmentPayload::Depth(DepthEstimate {
                    mean_depth_mm: 0.3,
                    metric_depth_mm: BTreeMap::new(),
                    mesh_vertices: 468,
                }),
                confidence: 0.6,
            })
        }
    }

    struct InstantLighting;

    #[async_trait]
    impl EnrichmentAdapter for InstantLighting {
        fn kind(&self) -> EnrichmentKind {
            EnrichmentKind::Lighting
        }

        async fn enrich(
            &self,
            _image: &ImageHandle,
            _base_scores: &SeverityMap,
            _timeout: Duration,
        ) -> Result<EnrichmentResult, EnrichmentError> {
            Ok(EnrichmentResult {
                payload: EnrichmentPayload::Lighting(LightingSimulation { scenarios: Vec::new() }),
                confidence: 0.8,
            })
        }
    }

    struct Unconfigured;

    #[async_trait]
    impl EnrichmentAdapter for Unconfigured {
        fn kind(&self) -> EnrichmentKind {
            EnrichmentKind::Lighting
        }

        fn is_available(&self) -> bool {
            false
        }

        async fn enrich(
            &self,
            _image: &ImageHandle,
            _base_scores: &SeverityMap,
            _timeout: Duration,
        ) -> Result<EnrichmentResult, EnrichmentError> {
            Err(EnrichmentError::Unavailable)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_leaves_phase_absent() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let adapters: Vec<Arc<dyn EnrichmentAdapter>> = vec![Arc::new(SlowDepth), Arc::new(Unconfigured)];
        let image = ImageHandle::Uri("https://images.example/a.jpg".to_string());

        let set = run_enrichment(&adapters, &image, &SeverityMap::new(), Duration::from_secs(3), &bus).await;

        assert!(set.is_empty());
        match rx.try_recv().unwrap() {
            AnalysisEvent::EnrichmentAbsent { kind, .. } => assert_eq!(kind, "depth"),
            other => panic!("unexpected event {:?}", other),
        }
        // Unconfigured adapters are skipped silently
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_spent_deadline_skips_every_phase() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let adapters: Vec<Arc<dyn EnrichmentAdapter>> =
            vec![Arc::new(InstantLighting), Arc::new(Unconfigured)];
        let image = ImageHandle::Uri("https://images.example/a.jpg".to_string());

        let set = run_enrichment(&adapters, &image, &SeverityMap::new(), Duration::ZERO, &bus).await;

        // Even an adapter that answers immediately is not consulted
        assert!(set.is_empty());
        match rx.try_recv().unwrap() {
            AnalysisEvent::EnrichmentAbsent { kind, reason, .. } => {
                assert_eq!(kind, "lighting");
                assert_eq!(reason, "request deadline elapsed");
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert!(rx.try_recv().is_err());
    }
}
