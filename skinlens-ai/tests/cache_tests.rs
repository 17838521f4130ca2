//! Result cache behavior: TTL, LRU bound, coalescing, sweeping

use skinlens_ai::fusion::{fallback_ensemble, CanonicalMapper};
use skinlens_ai::services::{CacheSource, ResultCache};
use skinlens_ai::types::{AnalysisFocus, AnalysisRecord, AnalysisTier, CacheKey, EnrichmentSet};
use skinlens_ai::AnalysisError;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const TTL: Duration = Duration::from_secs(60);

fn record() -> Arc<AnalysisRecord> {
    Arc::new(CanonicalMapper::default().to_record(
        fallback_ensemble(),
        AnalysisTier::Basic,
        AnalysisFocus::Full,
        EnrichmentSet::default(),
    ))
}

fn key(name: &str) -> CacheKey {
    CacheKey::from_raw(name)
}

async fn insert(cache: &ResultCache, name: &str, ttl: Duration) -> Arc<AnalysisRecord> {
    let (record, source) = cache
        .get_or_compute(&key(name), ttl, || async { Ok(record()) })
        .await
        .unwrap();
    assert_eq!(source, CacheSource::Computed);
    record
}

#[tokio::test(start_paused = true)]
async fn test_hit_returns_same_record() {
    let cache = ResultCache::new(10);
    let stored = insert(&cache, "a", TTL).await;

    let (record, source) = cache
        .get_or_compute(&key("a"), TTL, || async {
            Err(AnalysisError::Cache("stored entry must be served".to_string()))
        })
        .await
        .unwrap();

    assert_eq!(source, CacheSource::Hit);
    assert_eq!(record.id, stored.id);
    assert_eq!(cache.get(&key("a")).unwrap().map(|r| r.id), Some(stored.id));
}

#[tokio::test(start_paused = true)]
async fn test_expired_entry_is_recomputed() {
    let cache = ResultCache::new(10);
    let first = insert(&cache, "a", Duration::from_secs(10)).await;

    tokio::time::advance(Duration::from_secs(11)).await;
    assert!(cache.get(&key("a")).unwrap().is_none());

    let second = insert(&cache, "a", Duration::from_secs(10)).await;
    assert_ne!(first.id, second.id);
}

#[tokio::test(start_paused = true)]
async fn test_least_recently_used_is_evicted() {
    let cache = ResultCache::new(2);
    insert(&cache, "a", TTL).await;
    insert(&cache, "b", TTL).await;

    // Touch "a" so "b" becomes least recently used
    assert!(cache.get(&key("a")).unwrap().is_some());
    insert(&cache, "c", TTL).await;

    assert_eq!(cache.len(), 2);
    assert!(cache.get(&key("a")).unwrap().is_some());
    assert!(cache.get(&key("b")).unwrap().is_none());
    assert!(cache.get(&key("c")).unwrap().is_some());
    assert_eq!(cache.stats().unwrap().evictions, 1);
}

#[tokio::test(start_paused = true)]
async fn test_expired_entries_are_evicted_before_live_ones() {
    let cache = ResultCache::new(2);
    insert(&cache, "short", Duration::from_secs(5)).await;
    insert(&cache, "long", TTL).await;
    // "long" is now the least recently used entry
    assert!(cache.get(&key("short")).unwrap().is_some());

    tokio::time::advance(Duration::from_secs(6)).await;
    insert(&cache, "new", TTL).await;

    assert!(cache.get(&key("long")).unwrap().is_some());
    assert!(cache.get(&key("new")).unwrap().is_some());
    assert_eq!(cache.stats().unwrap().evictions, 0);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_callers_share_one_computation() {
    let cache = ResultCache::new(10);
    let computations = Arc::new(AtomicUsize::new(0));

    let callers = (0..5).map(|_| {
        let computations = Arc::clone(&computations);
        let cache = cache.clone();
        async move {
            cache
                .get_or_compute(&key("a"), TTL, move || async move {
                    computations.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    Ok(record())
                })
                .await
                .unwrap()
        }
    });
    let results = futures::future::join_all(callers).await;

    assert_eq!(computations.load(Ordering::SeqCst), 1);
    assert_eq!(results[0].1, CacheSource::Computed);
    assert!(results[1..].iter().all(|(_, s)| *s == CacheSource::Coalesced));
    assert!(results.iter().all(|(r, _)| r.id == results[0].0.id));

    let stats = cache.stats().unwrap();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.coalesced, 4);
    assert_eq!(stats.in_flight, 0);
    assert_eq!(stats.size, 1);
}

#[tokio::test(start_paused = true)]
async fn test_failures_are_not_cached() {
    let cache = ResultCache::new(10);
    let computations = Arc::new(AtomicUsize::new(0));

    for _ in 0..2 {
        let counter = Arc::clone(&computations);
        let result = cache
            .get_or_compute(&key("a"), TTL, move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(AnalysisError::InvalidRequest("boom".to_string()))
            })
            .await;
        assert!(matches!(result, Err(AnalysisError::InvalidRequest(_))));
    }

    assert_eq!(computations.load(Ordering::SeqCst), 2);
    assert!(cache.is_empty());
    assert_eq!(cache.stats().unwrap().in_flight, 0);
}

#[tokio::test(start_paused = true)]
async fn test_invalidate() {
    let cache = ResultCache::new(10);
    insert(&cache, "a", TTL).await;

    assert!(cache.invalidate(&key("a")).unwrap());
    assert!(!cache.invalidate(&key("a")).unwrap());
    assert!(cache.get(&key("a")).unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_sweep_removes_only_expired() {
    let cache = ResultCache::new(10);
    insert(&cache, "a", Duration::from_secs(5)).await;
    insert(&cache, "b", Duration::from_secs(5)).await;
    insert(&cache, "c", TTL).await;

    tokio::time::advance(Duration::from_secs(6)).await;

    assert_eq!(cache.sweep_expired().unwrap(), 2);
    assert_eq!(cache.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_background_sweeper_stops_on_cancel() {
    let cache = ResultCache::new(10);
    insert(&cache, "a", Duration::from_secs(2)).await;

    let cancel = CancellationToken::new();
    let sweeper = cache.spawn_sweeper(Duration::from_secs(1), cancel.clone());

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(cache.is_empty());

    cancel.cancel();
    sweeper.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_stats_hit_rate() {
    let cache = ResultCache::new(10);
    assert_eq!(cache.stats().unwrap().hit_rate, 0.0);

    insert(&cache, "a", TTL).await;
    cache.get(&key("a")).unwrap();
    cache.get(&key("a")).unwrap();
    cache.get(&key("a")).unwrap();

    let stats = cache.stats().unwrap();
    assert_eq!(stats.hits, 3);
    assert_eq!(stats.misses, 1);
    assert!((stats.hit_rate - 0.75).abs() < 1e-9);
    assert_eq!(stats.capacity, 10);
}
