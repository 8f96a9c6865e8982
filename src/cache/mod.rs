//! Process-wide response cache for remote feed calls.
//!
//! Entries are keyed by operation name plus the canonical (name-sorted)
//! encoding of the request parameters and live for a per-operation TTL.
//! Failed fetches are never stored. Concurrent misses on the same key are
//! collapsed into one remote call.

use crate::clock::Clock;
use crate::errors::FetchError;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tracing::debug;

/// Request parameters as sent to the remote endpoint
pub type Params = [(&'static str, String)];

struct CacheEntry {
    value: Value,
    created_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn is_live(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.created_at) < self.ttl
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

pub struct ResponseCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    in_flight: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    clock: Arc<dyn Clock>,
    hits: AtomicU64,
    misses: AtomicU64,
}

/// Canonical key: `op?` followed by the JSON encoding of the parameters
/// sorted by name then value, so no value can spill into another pair
pub fn cache_key(operation: &str, params: &Params) -> String {
    let mut pairs: Vec<(&str, &str)> = params.iter().map(|(k, v)| (*k, v.as_str())).collect();
    pairs.sort_unstable();
    let encoded = serde_json::to_string(&pairs).unwrap_or_default();
    format!("{}?{}", operation, encoded)
}

impl ResponseCache {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
            clock,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Return the live entry for (`operation`, `params`) or run `fetch`,
    /// store its success and return it.
    pub async fn get_or_fetch<F, Fut>(
        &self,
        operation: &str,
        params: &Params,
        ttl: Duration,
        fetch: F,
    ) -> Result<Value, FetchError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, FetchError>>,
    {
        let key = cache_key(operation, params);
        if let Some(value) = self.lookup(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!(key = %key, "cache hit");
            return Ok(value);
        }

        let gate = self.gate(&key);
        let result = {
            let _turn = gate.lock().await;
            // Another caller may have filled the slot while we waited
            if let Some(value) = self.lookup(&key) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, "cache hit after wait");
                Ok(value)
            } else {
                self.misses.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, "cache miss");
                let fetched = fetch().await;
                if let Ok(value) = &fetched {
                    self.store(key.clone(), value.clone(), ttl);
                }
                fetched
            }
        };
        self.release_gate(&key, gate);
        result
    }

    fn lookup(&self, key: &str) -> Option<Value> {
        let now = self.clock.now();
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone())
    }

    fn store(&self, key: String, value: Value, ttl: Duration) {
        let entry = CacheEntry {
            value,
            created_at: self.clock.now(),
            ttl,
        };
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key, entry);
    }

    fn gate(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        in_flight.entry(key.to_string()).or_default().clone()
    }

    fn release_gate(&self, key: &str, gate: Arc<tokio::sync::Mutex<()>>) {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        // The map holds one reference and we hold another; anything more is a waiter
        let idle = in_flight
            .get(key)
            .is_some_and(|held| Arc::ptr_eq(held, &gate) && Arc::strong_count(&gate) <= 2);
        if idle {
            in_flight.remove(key);
        }
    }

    /// Drop every entry belonging to `operation`; returns how many went
    pub fn invalidate_operation(&self, operation: &str) -> usize {
        let prefix = format!("{}?", operation);
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(&prefix));
        before - entries.len()
    }

    pub fn clear(&self) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.clear();
    }

    /// Remove stale entries; returns how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|_, entry| entry.is_live(now));
        before - entries.len()
    }

    pub fn stats(&self) -> CacheStats {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        CacheStats {
            entries: entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::domain::ApodRange;
    use crate::services::apod_range_params;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    const HOUR: Duration = Duration::from_secs(3600);

    fn cache_with_clock() -> (ResponseCache, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        (ResponseCache::new(clock.clone()), clock)
    }

    async fn counted(counter: &AtomicUsize, value: Value) -> Result<Value, FetchError> {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(value)
    }

    #[test]
    fn test_key_is_order_independent() {
        let a = cache_key("apod.range", &[("start_date", "1".into()), ("end_date", "2".into())]);
        let b = cache_key("apod.range", &[("end_date", "2".into()), ("start_date", "1".into())]);
        assert_eq!(a, b);
        assert_eq!(a, r#"apod.range?[["end_date","2"],["start_date","1"]]"#);
    }

    #[test]
    fn test_key_values_cannot_forge_other_params() {
        let forged = cache_key("images.search", &[("q", "moon&page=2".into()), ("page", "1".into())]);
        let honest = cache_key(
            "images.search",
            &[("q", "moon".into()), ("page", "2".into()), ("page", "1".into())],
        );
        assert_ne!(forged, honest);

        let quoted = cache_key("images.search", &[("q", r#"a","b"#.into())]);
        assert_ne!(quoted, cache_key("images.search", &[("q", "a".into()), ("q", "b".into())]));
    }

    #[test]
    fn test_key_separates_operations() {
        let params = [("q", "moon".to_string())];
        assert_ne!(cache_key("images.search", &params), cache_key("images.asset", &params));
    }

    #[tokio::test]
    async fn test_hit_within_ttl_suppresses_fetch() {
        let (cache, clock) = cache_with_clock();
        let calls = AtomicUsize::new(0);
        let params = [("date", "2024-01-01".to_string())];

        let first = cache
            .get_or_fetch("apod.single", &params, HOUR, || counted(&calls, json!({"n": 1})))
            .await
            .unwrap();
        clock.advance(Duration::from_secs(59 * 60));
        let second = cache
            .get_or_fetch("apod.single", &params, HOUR, || counted(&calls, json!({"n": 2})))
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(first, second);
        assert_eq!(cache.stats().hits, 1);
        assert_eq!(cache.stats().misses, 1);
    }

    #[tokio::test]
    async fn test_expired_entry_refetches_once() {
        let (cache, clock) = cache_with_clock();
        let calls = AtomicUsize::new(0);
        let params = [("date", "2024-01-01".to_string())];

        cache
            .get_or_fetch("apod.single", &params, HOUR, || counted(&calls, json!(1)))
            .await
            .unwrap();
        clock.advance(HOUR);
        let refreshed = cache
            .get_or_fetch("apod.single", &params, HOUR, || counted(&calls, json!(2)))
            .await
            .unwrap();
        let again = cache
            .get_or_fetch("apod.single", &params, HOUR, || counted(&calls, json!(3)))
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(refreshed, json!(2));
        assert_eq!(again, json!(2));
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() {
        let (cache, _clock) = cache_with_clock();
        let calls = AtomicUsize::new(0);
        let params = [("q", "nebula".to_string())];

        for _ in 0..2 {
            let err = cache
                .get_or_fetch("images.search", &params, HOUR, || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(FetchError::Status {
                        operation: "images.search".into(),
                        status: 503,
                    })
                })
                .await;
            assert!(matches!(err, Err(FetchError::Status { status: 503, .. })));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let ok = cache
            .get_or_fetch("images.search", &params, HOUR, || counted(&calls, json!([])))
            .await;
        assert!(ok.is_ok());
        assert_eq!(cache.stats().entries, 1);
    }

    #[tokio::test]
    async fn test_reversed_range_shares_entry() {
        let (cache, _clock) = cache_with_clock();
        let calls = AtomicUsize::new(0);
        let d1 = "2024-01-01".parse().unwrap();
        let d2 = "2024-01-09".parse().unwrap();

        let forward = apod_range_params(ApodRange::new(d1, d2), true);
        let reversed = apod_range_params(ApodRange::new(d2, d1), true);

        cache
            .get_or_fetch("apod.range", &forward, HOUR, || counted(&calls, json!([])))
            .await
            .unwrap();
        cache
            .get_or_fetch("apod.range", &reversed, HOUR, || counted(&calls, json!([])))
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_misses_fetch_once() {
        let (cache, _clock) = cache_with_clock();
        let cache = Arc::new(cache);
        let calls = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let calls = calls.clone();
            tasks.push(tokio::spawn(async move {
                cache
                    .get_or_fetch("neo.feed", &[("start_date", "2024-01-01".into())], HOUR, || async {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok(json!({"element_count": 3}))
                    })
                    .await
            }));
        }
        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap(), json!({"element_count": 3}));
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalidate_and_purge() {
        let (cache, clock) = cache_with_clock();
        let calls = AtomicUsize::new(0);

        cache
            .get_or_fetch("events.list", &[("days", "30".into())], Duration::from_secs(600), || {
                counted(&calls, json!(1))
            })
            .await
            .unwrap();
        cache
            .get_or_fetch("events.categories", &[], Duration::from_secs(1200), || {
                counted(&calls, json!(2))
            })
            .await
            .unwrap();

        clock.advance(Duration::from_secs(700));
        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.stats().entries, 1);

        assert_eq!(cache.invalidate_operation("events.categories"), 1);
        assert_eq!(cache.stats().entries, 0);
    }
}
