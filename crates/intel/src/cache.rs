use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use moka::future::Cache;

use crate::error::IntelError;
use crate::finding::Finding;
use crate::provider::IntelProvider;

/// Per-provider TTL/LRU cache over `(provider, ioc)` keys.
///
/// Each provider gets its own [`moka`] cache so TTLs can differ. Lookups
/// for the same key coalesce into a single provider call via
/// `try_get_with`, and a cache hit preserves the `is_mocked` flag of the
/// original finding.
pub struct IntelCache {
    caches: HashMap<String, Cache<String, Finding>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl IntelCache {
    /// Build one cache per provider from `(name, ttl, capacity)` triples.
    #[must_use]
    pub fn new(providers: impl IntoIterator<Item = (String, Duration, u64)>) -> Self {
        let caches = providers
            .into_iter()
            .map(|(name, ttl, capacity)| {
                let cache = Cache::builder()
                    .max_capacity(capacity)
                    .time_to_live(ttl)
                    .build();
                (name, cache)
            })
            .collect();
        Self {
            caches,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Look up `(provider, ip)`, calling the provider on a miss.
    ///
    /// Concurrent callers for the same key coalesce into one call. A
    /// provider without a configured cache is called directly.
    pub async fn get_or_fetch(
        &self,
        provider: &Arc<dyn IntelProvider>,
        ip: IpAddr,
    ) -> Result<Finding, IntelError> {
        let Some(cache) = self.caches.get(provider.name()) else {
            return provider.check_ip(ip).await;
        };

        let key = ip.to_string();
        if let Some(found) = cache.get(&key).await {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(found);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let provider = Arc::clone(provider);
        cache
            .try_get_with(key, async move { provider.check_ip(ip).await })
            .await
            .map_err(|e: Arc<IntelError>| match e.as_ref() {
                IntelError::Http(m) => IntelError::Http(m.clone()),
                IntelError::Malformed(m) => IntelError::Malformed(m.clone()),
                IntelError::RateLimited => IntelError::RateLimited,
                IntelError::Disabled => IntelError::Disabled,
                IntelError::Timeout => IntelError::Timeout,
            })
    }

    /// Look up `(provider, ip)` without triggering a fetch on miss.
    pub async fn peek(&self, provider: &str, ip: IpAddr) -> Option<Finding> {
        let cache = self.caches.get(provider)?;
        let found = cache.get(&ip.to_string()).await;
        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        }
        found
    }

    /// Pre-seed a finding, e.g. from a shared intel feed.
    pub async fn seed(&self, provider: &str, ip: IpAddr, finding: Finding) {
        if let Some(cache) = self.caches.get(provider) {
            cache.insert(ip.to_string(), finding).await;
        }
    }

    #[must_use]
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU64;

    use async_trait::async_trait;

    use super::*;

    struct CountingProvider {
        calls: AtomicU64,
        fail: bool,
    }

    #[async_trait]
    impl IntelProvider for CountingProvider {
        fn name(&self) -> &str {
            "counting"
        }

        async fn check_ip(&self, ip: IpAddr) -> Result<Finding, IntelError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(IntelError::Http("boom".into()));
            }
            Ok(Finding::new(
                "counting",
                serde_json::json!({ "ip": ip.to_string() }),
                0.5,
            ))
        }
    }

    fn cache_for(name: &str) -> IntelCache {
        IntelCache::new([(name.to_owned(), Duration::from_secs(3600), 1000)])
    }

    #[tokio::test]
    async fn hit_avoids_second_call() {
        let cache = cache_for("counting");
        let provider: Arc<dyn IntelProvider> = Arc::new(CountingProvider {
            calls: AtomicU64::new(0),
            fail: false,
        });
        let ip: IpAddr = "203.0.113.7".parse().unwrap();

        cache.get_or_fetch(&provider, ip).await.unwrap();
        cache.get_or_fetch(&provider, ip).await.unwrap();

        assert_eq!(cache.hits(), 1);
        assert_eq!(cache.misses(), 1);
    }

    #[tokio::test]
    async fn seeded_finding_short_circuits_provider() {
        let cache = cache_for("counting");
        let provider: Arc<dyn IntelProvider> = Arc::new(CountingProvider {
            calls: AtomicU64::new(0),
            fail: true, // would error if actually called
        });
        let ip: IpAddr = "203.0.113.7".parse().unwrap();
        cache
            .seed(
                "counting",
                ip,
                Finding::new("counting", serde_json::json!({}), 0.95),
            )
            .await;

        let found = cache.get_or_fetch(&provider, ip).await.unwrap();
        assert!((found.normalized_score - 0.95).abs() < f64::EPSILON);
        assert!(!found.is_mocked);
    }

    #[tokio::test]
    async fn error_is_not_cached_as_a_finding() {
        let cache = cache_for("counting");
        let provider: Arc<dyn IntelProvider> = Arc::new(CountingProvider {
            calls: AtomicU64::new(0),
            fail: true,
        });
        let ip: IpAddr = "203.0.113.9".parse().unwrap();

        assert!(cache.get_or_fetch(&provider, ip).await.is_err());
        assert!(cache.get_or_fetch(&provider, ip).await.is_err());
    }

    #[tokio::test]
    async fn unknown_provider_falls_through() {
        let cache = cache_for("other");
        let counting = Arc::new(CountingProvider {
            calls: AtomicU64::new(0),
            fail: false,
        });
        let provider: Arc<dyn IntelProvider> = Arc::clone(&counting) as Arc<dyn IntelProvider>;
        let ip: IpAddr = "203.0.113.7".parse().unwrap();

        cache.get_or_fetch(&provider, ip).await.unwrap();
        cache.get_or_fetch(&provider, ip).await.unwrap();
        assert_eq!(counting.calls.load(Ordering::SeqCst), 2, "no cache configured");
    }
}
