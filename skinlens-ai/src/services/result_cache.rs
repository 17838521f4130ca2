//! Result cache - content-addressed, TTL-bound, LRU-bounded, request-coalescing
//!
//! At most one computation runs per key. The computation is spawned on its
//! own task and shared, so a caller that gives up (client disconnect, dropped
//! future) does not strand the others waiting on it. Only successful
//! computations are stored, fallback records for a shorter time.
//!
//! The state mutex is held only for short, non-async critical sections.

use crate::error::AnalysisError;
use crate::types::{AnalysisRecord, CacheKey};
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

pub type ComputeResult = Result<Arc<AnalysisRecord>, AnalysisError>;

type InFlight = Shared<BoxFuture<'static, ComputeResult>>;

/// Where a `get_or_compute` answer came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
    /// Fresh stored entry
    Hit,
    /// Joined a computation another caller started
    Coalesced,
    /// This caller started the computation
    Computed,
}

/// Cache counters
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub coalesced: u64,
    pub evictions: u64,
    pub size: usize,
    pub in_flight: usize,
    pub capacity: usize,
    /// hits / (hits + misses + coalesced), 0 when unused
    pub hit_rate: f64,
}

/// How long a computed record stays fresh
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TtlPolicy {
    pub ttl: Duration,
    /// Applies to fallback records so providers are retried soon after an outage
    pub fallback_ttl: Duration,
}

impl TtlPolicy {
    pub fn for_record(&self, record: &AnalysisRecord) -> Duration {
        if record.is_fallback {
            self.fallback_ttl
        } else {
            self.ttl
        }
    }
}

impl From<Duration> for TtlPolicy {
    fn from(ttl: Duration) -> Self {
        Self {
            ttl,
            fallback_ttl: ttl,
        }
    }
}

struct CacheEntry {
    record: Arc<AnalysisRecord>,
    expires_at: Instant,
    last_access: u64,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<CacheKey, CacheEntry>,
    in_flight: HashMap<CacheKey, InFlight>,
    tick: u64,
    hits: u64,
    misses: u64,
    coalesced: u64,
    evictions: u64,
}

impl CacheState {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    /// Fresh record for `key`, removing it if expired
    fn fresh(&mut self, key: &CacheKey, now: Instant) -> Option<Arc<AnalysisRecord>> {
        let expired = match self.entries.get(key) {
            Some(entry) => entry.expires_at <= now,
            None => return None,
        };
        if expired {
            self.entries.remove(key);
            return None;
        }

        let tick = self.next_tick();
        self.entries.get_mut(key).map(|entry| {
            entry.last_access = tick;
            Arc::clone(&entry.record)
        })
    }

    fn store(&mut self, key: CacheKey, record: Arc<AnalysisRecord>, expires_at: Instant, capacity: usize) {
        let tick = self.next_tick();
        self.entries.insert(
            key,
            CacheEntry {
                record,
                expires_at,
                last_access: tick,
            },
        );

        if self.entries.len() > capacity {
            self.sweep(Instant::now());
        }
        while self.entries.len() > capacity {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_access)
                .map(|(key, _)| key.clone());
            match oldest {
                Some(key) => {
                    self.entries.remove(&key);
                    self.evictions += 1;
                    debug!(cache_key = %key, "Evicted least recently used analysis");
                }
                None => break,
            }
        }
    }

    fn sweep(&mut self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        before - self.entries.len()
    }
}

#[derive(Clone)]
pub struct ResultCache {
    state: Arc<Mutex<CacheState>>,
    capacity: usize,
}

impl ResultCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(CacheState::default())),
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, CacheState>, AnalysisError> {
        self.state.lock().map_err(|_| {
            error!("Result cache lock poisoned");
            AnalysisError::Cache("result cache lock poisoned".to_string())
        })
    }

    /// Fresh record for `key`; expired entries are removed and count as misses
    pub fn get(&self, key: &CacheKey) -> Result<Option<Arc<AnalysisRecord>>, AnalysisError> {
        let mut state = self.lock()?;
        let record = state.fresh(key, Instant::now());
        if record.is_some() {
            state.hits += 1;
        } else {
            state.misses += 1;
        }
        Ok(record)
    }

    /// Return the fresh record for `key`, join the in-flight computation for
    /// it, or start `compute` exactly once and store its success for `ttl`
    pub async fn get_or_compute<F, Fut>(
        &self,
        key: &CacheKey,
        ttl: impl Into<TtlPolicy>,
        compute: F,
    ) -> Result<(Arc<AnalysisRecord>, CacheSource), AnalysisError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ComputeResult> + Send + 'static,
    {
        let ttl = ttl.into();
        let (in_flight, source) = {
            let mut state = self.lock()?;

            if let Some(record) = state.fresh(key, Instant::now()) {
                state.hits += 1;
                return Ok((record, CacheSource::Hit));
            }

            if let Some(in_flight) = state.in_flight.get(key) {
                let in_flight = in_flight.clone();
                state.coalesced += 1;
                debug!(cache_key = %key, "Joining in-flight analysis");
                (in_flight, CacheSource::Coalesced)
            } else {
                state.misses += 1;
                let in_flight = self.spawn_computation(key.clone(), ttl, compute());
                state.in_flight.insert(key.clone(), in_flight.clone());
                (in_flight, CacheSource::Computed)
            }
        };

        let record = in_flight.await?;
        Ok((record, source))
    }

    fn spawn_computation<Fut>(&self, key: CacheKey, ttl: TtlPolicy, computation: Fut) -> InFlight
    where
        Fut: Future<Output = ComputeResult> + Send + 'static,
    {
        let state = Arc::clone(&self.state);
        let capacity = self.capacity;
        let task_key = key.clone();

        // The spawned task blocks on the state lock until the caller has
        // registered the in-flight entry, so removal always follows insertion
        let handle: JoinHandle<ComputeResult> = tokio::spawn(async move {
            let result = computation.await;
            match state.lock() {
                Ok(mut state) => {
                    state.in_flight.remove(&task_key);
                    if let Ok(record) = &result {
                        let expires_at = Instant::now() + ttl.for_record(record);
                        state.store(task_key, Arc::clone(record), expires_at, capacity);
                    }
                }
                Err(_) => error!(cache_key = %task_key, "Result cache lock poisoned, result not stored"),
            }
            result
        });

        let state = Arc::clone(&self.state);
        async move {
            match handle.await {
                Ok(result) => result,
                Err(join_error) => {
                    error!(cache_key = %key, "Analysis task aborted: {}", join_error);
                    if let Ok(mut state) = state.lock() {
                        state.in_flight.remove(&key);
                    }
                    Err(AnalysisError::Cache(format!(
                        "analysis task aborted: {}",
                        join_error
                    )))
                }
            }
        }
        .boxed()
        .shared()
    }

    /// Remove the entry for `key`; returns whether one existed
    ///
    /// An in-flight computation for the key is not cancelled.
    pub fn invalidate(&self, key: &CacheKey) -> Result<bool, AnalysisError> {
        let removed = self.lock()?.entries.remove(key).is_some();
        if removed {
            debug!(cache_key = %key, "Invalidated cached analysis");
        }
        Ok(removed)
    }

    /// Remove every expired entry, returning how many were removed
    pub fn sweep_expired(&self) -> Result<usize, AnalysisError> {
        Ok(self.lock()?.sweep(Instant::now()))
    }

    /// Periodically sweep expired entries until `cancel` fires
    pub fn spawn_sweeper(&self, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // First tick completes immediately
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("Cache sweeper stopped");
                        break;
                    }
                    _ = ticker.tick() => match cache.sweep_expired() {
                        Ok(0) => {}
                        Ok(removed) => debug!(removed, "Swept expired analyses"),
                        Err(e) => {
                            error!("Cache sweep failed: {}", e);
                            break;
                        }
                    },
                }
            }
        })
    }

    pub fn stats(&self) -> Result<CacheStats, AnalysisError> {
        let state = self.lock()?;
        let lookups = state.hits + state.misses + state.coalesced;
        Ok(CacheStats {
            hits: state.hits,
            misses: state.misses,
            coalesced: state.coalesced,
            evictions: state.evictions,
            size: state.entries.len(),
            in_flight: state.in_flight.len(),
            capacity: self.capacity,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                state.hits as f64 / lookups as f64
            },
        })
    }

    pub fn len(&self) -> usize {
        self.lock().map(|state| state.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
