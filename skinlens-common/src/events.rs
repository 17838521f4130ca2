//! Event types and EventBus for the SkinLens event system
//!
//! The orchestration core emits an [`AnalysisEvent`] at each notable step of a
//! request (cache hit, provider attempt, circuit opened, ...). Events are
//! broadcast to any number of subscribers and serialize cleanly for SSE.
//! Emitting with no subscribers is not an error for the emitter; the event is
//! simply dropped.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Analysis pipeline events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AnalysisEvent {
    /// A request missed the cache and its computation started
    AnalysisStarted {
        cache_key: String,
        tier: String,
        timestamp: DateTime<Utc>,
    },

    /// A request was served from a fresh cache entry
    CacheHit {
        cache_key: String,
        record_id: Uuid,
        timestamp: DateTime<Utc>,
    },

    /// A provider invocation began
    ProviderAttempted {
        provider: String,
        tier: String,
        timestamp: DateTime<Utc>,
    },

    /// A provider invocation failed (recovered locally)
    ProviderFailed {
        provider: String,
        /// Failure kind: timeout, rate_limited, invalid_response, auth_error
        kind: String,
        message: String,
        timestamp: DateTime<Utc>,
    },

    /// A provider's circuit opened; it is excluded until `cooldown_ms` elapses
    CircuitOpened {
        provider: String,
        consecutive_failures: u32,
        cooldown_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// An enrichment phase produced nothing for this request
    EnrichmentAbsent {
        /// Enrichment kind: lighting or depth
        kind: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// Every eligible provider failed; the built-in default record was produced
    FallbackUsed {
        cache_key: String,
        attempted: usize,
        timestamp: DateTime<Utc>,
    },

    /// A canonical record was produced
    AnalysisCompleted {
        record_id: Uuid,
        providers: Vec<String>,
        confidence: f64,
        elapsed_ms: u64,
        timestamp: DateTime<Utc>,
    },
}

impl AnalysisEvent {
    /// Event type name used as the SSE `event:` field
    pub fn event_type(&self) -> &'static str {
        match self {
            AnalysisEvent::AnalysisStarted { .. } => "AnalysisStarted",
            AnalysisEvent::CacheHit { .. } => "CacheHit",
            AnalysisEvent::ProviderAttempted { .. } => "ProviderAttempted",
            AnalysisEvent::ProviderFailed { .. } => "ProviderFailed",
            AnalysisEvent::CircuitOpened { .. } => "CircuitOpened",
            AnalysisEvent::EnrichmentAbsent { .. } => "EnrichmentAbsent",
            AnalysisEvent::FallbackUsed { .. } => "FallbackUsed",
            AnalysisEvent::AnalysisCompleted { .. } => "AnalysisCompleted",
        }
    }
}

/// Broadcast bus for [`AnalysisEvent`]s
///
/// Cloning the bus is cheap; all clones share one channel.
///
/// # Examples
///
/// ```
/// use skinlens_common::events::{AnalysisEvent, EventBus};
///
/// let bus = EventBus::new(100);
/// let mut rx = bus.subscribe();
/// bus.emit_lossy(AnalysisEvent::FallbackUsed {
///     cache_key: "abc".to_string(),
///     attempted: 2,
///     timestamp: chrono::Utc::now(),
/// });
/// assert!(rx.try_recv().is_ok());
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<AnalysisEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus buffering up to `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<AnalysisEvent> {
        self.tx.subscribe()
    }

    /// Emit an event, returning the number of subscribers that received it
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: AnalysisEvent,
    ) -> Result<usize, broadcast::error::SendError<AnalysisEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring the no-subscriber case
    pub fn emit_lossy(&self, event: AnalysisEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
