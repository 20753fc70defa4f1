//! Time-limited memoization of report computations
//!
//! [`CachedComputation::get_or_compute`] returns a fresh cached value when one
//! exists and otherwise runs the computation, stores the result for the TTL
//! of its operation class and returns it.
//!
//! There is no request coalescing. Two concurrent misses on the same key both
//! run the computation and both write; the later write wins. Results are
//! identical for identical inputs, so the only cost is duplicated work.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::Result;

/// Key/value store with per-entry expiry.
///
/// TTLs are advisory: a store may drop entries early and callers must treat
/// any miss as normal.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Option<Value>;
    async fn set(&self, key: &str, value: Value, ttl: Duration);
}

struct CacheEntry {
    value: Value,
    expires_at: Instant,
}

/// Process-local store backed by a concurrent map. Expired entries are
/// dropped when read and swept on every write.
#[derive(Default)]
pub struct InMemoryCacheStore {
    entries: DashMap<String, CacheEntry>,
}

impl InMemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops every expired entry
    pub fn purge_expired(&self) {
        let now = Instant::now();
        self.entries.retain(|_, entry| entry.expires_at > now);
    }
}

#[async_trait]
impl CacheStore for InMemoryCacheStore {
    async fn get(&self, key: &str) -> Option<Value> {
        let now = Instant::now();
        match self.entries.get(key) {
            Some(entry) if now < entry.expires_at => return Some(entry.value.clone()),
            Some(_) => {}
            None => return None,
        }
        self.entries.remove_if(key, |_, entry| entry.expires_at <= now);
        None
    }

    async fn set(&self, key: &str, value: Value, ttl: Duration) {
        let entry = CacheEntry {
            value,
            expires_at: Instant::now() + ttl,
        };
        self.purge_expired();
        self.entries.insert(key.to_string(), entry);
    }
}

/// Deterministic cache key: `namespace:` followed by the parameters as a
/// JSON object with sorted keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn derive<I, K>(namespace: &str, params: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let sorted: BTreeMap<String, Value> =
            params.into_iter().map(|(k, v)| (k.into(), v)).collect();
        let canonical = serde_json::to_string(&sorted).unwrap_or_default();
        CacheKey(format!("{}:{}", namespace, canonical))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// TTL class of an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlClass {
    Report,
    Dashboard,
    DrillDown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheTtls {
    pub report_secs: u64,
    pub dashboard_secs: u64,
    pub drill_down_secs: u64,
}

impl Default for CacheTtls {
    fn default() -> Self {
        Self {
            report_secs: 300,
            dashboard_secs: 180,
            drill_down_secs: 120,
        }
    }
}

impl CacheTtls {
    pub fn ttl(&self, class: TtlClass) -> Duration {
        let secs = match class {
            TtlClass::Report => self.report_secs,
            TtlClass::Dashboard => self.dashboard_secs,
            TtlClass::DrillDown => self.drill_down_secs,
        };
        Duration::from_secs(secs)
    }
}

#[derive(Clone)]
pub struct CachedComputation {
    store: Arc<dyn CacheStore>,
}

impl CachedComputation {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self { store }
    }

    /// Returns the cached value for `key` or computes, stores and returns it.
    ///
    /// Errors from `compute` are returned as-is and nothing is stored. A
    /// cached value that no longer deserializes as `T` counts as a miss.
    pub async fn get_or_compute<T, F, Fut>(&self, key: &CacheKey, ttl: Duration, compute: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Some(cached) = self.store.get(key.as_str()).await {
            match serde_json::from_value::<T>(cached) {
                Ok(value) => {
                    debug!(key = %key, "cache hit");
                    return Ok(value);
                }
                Err(e) => warn!(key = %key, error = %e, "discarding undecodable cache entry"),
            }
        }

        debug!(key = %key, ttl_secs = ttl.as_secs(), "cache miss");
        let value = compute().await?;
        match serde_json::to_value(&value) {
            Ok(json) => self.store.set(key.as_str(), json, ttl).await,
            Err(e) => warn!(key = %key, error = %e, "result not cacheable"),
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AnalyticsError;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn computation() -> (CachedComputation, Arc<InMemoryCacheStore>) {
        let store = Arc::new(InMemoryCacheStore::new());
        (CachedComputation::new(store.clone()), store)
    }

    #[test]
    fn test_key_is_order_independent() {
        let a = CacheKey::derive(
            "route_efficiency",
            vec![("route_key", json!("R1")), ("client_key", json!("C1"))],
        );
        let b = CacheKey::derive(
            "route_efficiency",
            vec![("client_key", json!("C1")), ("route_key", json!("R1"))],
        );
        assert_eq!(a, b);
        assert_eq!(a.as_str(), r#"route_efficiency:{"client_key":"C1","route_key":"R1"}"#);

        let other = CacheKey::derive("bottlenecks", vec![("route_key", json!("R1"))]);
        assert_ne!(a, other);
    }

    #[tokio::test(start_paused = true)]
    async fn test_compute_runs_once_within_ttl() {
        let (cache, _) = computation();
        let calls = AtomicUsize::new(0);
        let key = CacheKey::derive("kpis", vec![("branch_key", json!("B1"))]);

        let counter = &calls;
        let compute = move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, AnalyticsError>(vec![1.5, 2.5])
        };

        let first: Vec<f64> = cache.get_or_compute(&key, Duration::from_secs(300), compute).await.unwrap();
        let second: Vec<f64> = cache.get_or_compute(&key, Duration::from_secs(300), compute).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_after_ttl() {
        let (cache, store) = computation();
        let calls = AtomicUsize::new(0);
        let key = CacheKey::derive("kpis", Vec::<(String, Value)>::new());
        let counter = &calls;
        let compute = move || async move { Ok::<_, AnalyticsError>(counter.fetch_add(1, Ordering::SeqCst)) };

        let ttl = Duration::from_secs(120);
        assert_eq!(cache.get_or_compute(&key, ttl, compute).await.unwrap(), 0);
        tokio::time::advance(Duration::from_secs(119)).await;
        assert_eq!(cache.get_or_compute(&key, ttl, compute).await.unwrap(), 0);
        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(cache.get_or_compute(&key, ttl, compute).await.unwrap(), 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_errors_are_not_cached() {
        let (cache, store) = computation();
        let key = CacheKey::derive("drill_down", vec![("entity_key", json!("R404"))]);

        let result: Result<u32> = cache
            .get_or_compute(&key, Duration::from_secs(60), || async {
                Err(AnalyticsError::not_found("route", "R404"))
            })
            .await;
        assert!(matches!(result, Err(AnalyticsError::NotFound { .. })));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_undecodable_entry_is_a_miss() {
        let (cache, store) = computation();
        let key = CacheKey::derive("kpis", vec![("x", json!(1))]);
        store.set(key.as_str(), json!("not a number"), Duration::from_secs(60)).await;

        let value: u32 = cache
            .get_or_compute(&key, Duration::from_secs(60), || async { Ok(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);
        assert_eq!(store.get(key.as_str()).await, Some(json!(7)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let store = InMemoryCacheStore::new();
        store.set("a", json!(1), Duration::from_secs(10)).await;
        store.set("b", json!(2), Duration::from_secs(100)).await;
        tokio::time::advance(Duration::from_secs(50)).await;
        store.purge_expired();
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("b").await, Some(json!(2)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_sweeps_expired_entries() {
        let store = InMemoryCacheStore::new();
        store.set("stale", json!(1), Duration::from_secs(10)).await;
        tokio::time::advance(Duration::from_secs(11)).await;
        store.set("fresh", json!(2), Duration::from_secs(10)).await;
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("fresh").await, Some(json!(2)));
    }

    #[test]
    fn test_ttl_classes() {
        let ttls = CacheTtls::default();
        assert_eq!(ttls.ttl(TtlClass::Report), Duration::from_secs(300));
        assert!(ttls.ttl(TtlClass::DrillDown) < ttls.ttl(TtlClass::Dashboard));
    }
}
