use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::BoxError;

/// Key-value cache of opaque byte blobs.
#[async_trait]
pub trait CacheGateway: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, BoxError>;

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), BoxError>;

    /// Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<(), BoxError>;

    async fn exists(&self, key: &str) -> Result<bool, BoxError>;
}

/// Whole-view catalog caches. Keys never embed request-supplied values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKey {
    Upcoming,
    Popular,
    FirstPage,
}

impl CacheKey {
    /// Every cached catalog view; cleared by catalog edits.
    pub const CATALOG: [CacheKey; 3] = [CacheKey::Upcoming, CacheKey::Popular, CacheKey::FirstPage];

    /// Views ranked by paid bookings; cleared when a booking is paid.
    pub const RANKING: [CacheKey; 1] = [CacheKey::Popular];

    pub fn as_str(&self) -> &'static str {
        match self {
            CacheKey::Upcoming => "catalog:upcoming",
            CacheKey::Popular => "catalog:popular",
            CacheKey::FirstPage => "catalog:movies-all-first-page",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidationFailure {
    pub key: String,
    pub reason: String,
}

/// Outcome of a best-effort invalidation. Failed deletions do not fail the
/// write that triggered them; they are reported here and logged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvalidationReport {
    pub cleared: Vec<String>,
    pub failed: Vec<InvalidationFailure>,
}

impl InvalidationReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Read-through cache over a [`CacheGateway`], serializing values as JSON.
///
/// There is no single-flight: concurrent misses on one key each run their fetch.
#[derive(Clone)]
pub struct CacheAside {
    cache: Arc<dyn CacheGateway>,
    namespace: String,
}

impl CacheAside {
    pub fn new(cache: Arc<dyn CacheGateway>, namespace: impl Into<String>) -> Self {
        Self {
            cache,
            namespace: namespace.into(),
        }
    }

    pub fn gateway(&self) -> Arc<dyn CacheGateway> {
        Arc::clone(&self.cache)
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Fully qualified cache key for a catalog view.
    pub fn key(&self, key: CacheKey) -> String {
        qualify(&self.namespace, key.as_str())
    }

    /// Returns the cached value for `key`, or runs `fetch` and caches its result.
    ///
    /// Cache errors and undecodable entries count as misses. Fetch errors are
    /// returned unchanged and nothing is cached.
    pub async fn resolve<T, E, F, Fut>(&self, key: &str, ttl: Duration, fetch: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(hit) = self.lookup::<T>(key).await {
            debug!(key, "cache hit");
            return Ok(hit);
        }

        debug!(key, "cache miss");
        let value = fetch().await?;
        self.populate(key, &value, ttl).await;
        Ok(value)
    }

    /// Deletes every key unconditionally. Must only be called after the
    /// triggering write has committed.
    pub async fn invalidate(&self, keys: &[CacheKey]) -> InvalidationReport {
        let mut report = InvalidationReport::default();

        for key in keys {
            let key = self.key(*key);
            match self.cache.delete(&key).await {
                Ok(()) => report.cleared.push(key),
                Err(e) => {
                    warn!(key = %key, error = %e, "failed to invalidate cache key");
                    report.failed.push(InvalidationFailure {
                        key,
                        reason: e.to_string(),
                    });
                }
            }
        }

        report
    }

    async fn lookup<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let bytes = match self.cache.get(key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                warn!(key, error = %e, "cache read failed, falling back to store");
                return None;
            }
        };

        match serde_json::from_slice(&bytes) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key, error = %e, "discarding undecodable cache entry");
                None
            }
        }
    }

    async fn populate<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        let bytes = match serde_json::to_vec(value) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(key, error = %e, "failed to serialize value for cache");
                return;
            }
        };

        if let Err(e) = self.cache.set(key, &bytes, ttl).await {
            warn!(key, error = %e, "failed to populate cache");
        }
    }
}

pub(crate) fn qualify(namespace: &str, key: &str) -> String {
    if namespace.is_empty() {
        key.to_string()
    } else {
        format!("{namespace}:{key}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryCache;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const TTL: Duration = Duration::from_secs(60);

    fn manager() -> (Arc<MemoryCache>, CacheAside) {
        let cache = Arc::new(MemoryCache::new());
        let aside = CacheAside::new(cache.clone(), "test");
        (cache, aside)
    }

    #[test]
    fn test_keys_are_namespaced() {
        let (_, aside) = manager();
        assert_eq!(aside.key(CacheKey::Upcoming), "test:catalog:upcoming");
        assert_eq!(
            CacheAside::new(Arc::new(MemoryCache::new()), "").key(CacheKey::Popular),
            "catalog:popular"
        );
    }

    #[tokio::test]
    async fn test_miss_populates_and_hit_skips_fetch() {
        let (cache, aside) = manager();
        let counter = AtomicUsize::new(0);
        let calls = &counter;

        let fetch = move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, BoxError>(vec![1, 2, 3])
        };

        let first: Vec<i32> = aside.resolve("k", TTL, fetch).await.unwrap();
        let second: Vec<i32> = aside.resolve("k", TTL, fetch).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(cache.contains("k"));
    }

    #[tokio::test]
    async fn test_fetch_error_propagates_and_caches_nothing() {
        let (cache, aside) = manager();

        let result: Result<Vec<i32>, String> = aside
            .resolve("k", TTL, || async { Err("db down".to_string()) })
            .await;

        assert_eq!(result.unwrap_err(), "db down");
        assert!(!cache.contains("k"));
    }

    #[tokio::test]
    async fn test_undecodable_entry_is_a_miss() {
        let (cache, aside) = manager();
        cache.set("k", b"not json", TTL).await.unwrap();

        let value: Vec<i32> = aside
            .resolve("k", TTL, || async { Ok::<_, BoxError>(vec![7]) })
            .await
            .unwrap();

        assert_eq!(value, vec![7]);
        assert_eq!(cache.raw("k").unwrap(), b"[7]".to_vec());
    }

    #[tokio::test]
    async fn test_cache_outage_degrades_to_store() {
        let (cache, aside) = manager();
        cache.set_offline(true);
        let counter = AtomicUsize::new(0);
        let calls = &counter;

        for _ in 0..2 {
            let value: String = aside
                .resolve("k", TTL, move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, BoxError>("fresh".to_string())
                })
                .await
                .unwrap();
            assert_eq!(value, "fresh");
        }

        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_invalidate_reports_soft_failures() {
        let (cache, aside) = manager();
        cache.fail_deletes_for(&aside.key(CacheKey::Popular));

        let report = aside.invalidate(&CacheKey::CATALOG).await;

        assert!(!report.is_clean());
        assert_eq!(report.cleared.len(), 2);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].key, "test:catalog:popular");
    }
}
