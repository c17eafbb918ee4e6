//! Embedding cache
//!
//! Memoizes embedder output per query time so bursts of identical queries
//! embed once.

use crate::config::CacheSettings;
use crate::engine::Embedder;
use chrono::{DateTime, Utc};
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;

/// Cache of query vectors keyed by query time (milliseconds since epoch)
#[derive(Clone)]
pub struct EmbeddingCache {
    cache: Cache<i64, Arc<Vec<f32>>>,
}

impl EmbeddingCache {
    /// Create a cache with the given TTL and entry bound
    pub fn new(ttl_seconds: u64, max_capacity: u64) -> Self {
        let cache = Cache::builder()
            .time_to_live(Duration::from_secs(ttl_seconds))
            .max_capacity(max_capacity)
            .build();

        Self { cache }
    }

    pub fn from_settings(settings: &CacheSettings) -> Self {
        Self::new(settings.embedding_ttl_secs, settings.embedding_capacity)
    }

    /// Cached vector for `query_time`, embedding it on a miss.
    ///
    /// Concurrent misses for the same key run the embedder once. Failures
    /// are not cached.
    pub async fn get_or_embed(
        &self,
        embedder: &dyn Embedder,
        query_time: DateTime<Utc>,
    ) -> anyhow::Result<Arc<Vec<f32>>> {
        self.cache
            .try_get_with(query_time.timestamp_millis(), async {
                embedder.embed(query_time).await.map(Arc::new)
            })
            .await
            .map_err(|e| anyhow::anyhow!("embedding failed: {:#}", e))
    }

    pub async fn get(&self, query_time: &DateTime<Utc>) -> Option<Arc<Vec<f32>>> {
        self.cache.get(&query_time.timestamp_millis()).await
    }
}

impl Default for EmbeddingCache {
    fn default() -> Self {
        Self::from_settings(&CacheSettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingEmbedder {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl Embedder for CountingEmbedder {
        fn dimension(&self) -> usize {
            2
        }

        async fn embed(&self, query_time: DateTime<Utc>) -> anyhow::Result<Vec<f32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("sensor feed offline");
            }
            Ok(vec![query_time.timestamp() as f32, 1.0])
        }
    }

    #[tokio::test]
    async fn test_embedding_memoized() {
        let cache = EmbeddingCache::new(60, 100);
        let embedder = CountingEmbedder {
            calls: AtomicUsize::new(0),
            fail: false,
        };
        let t = Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap();

        let a = cache.get_or_embed(&embedder, t).await.unwrap();
        let b = cache.get_or_embed(&embedder, t).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);
        assert!(cache.get(&t).await.is_some());

        let other = t + chrono::Duration::hours(6);
        cache.get_or_embed(&embedder, other).await.unwrap();
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failures_not_cached() {
        let cache = EmbeddingCache::new(60, 100);
        let embedder = CountingEmbedder {
            calls: AtomicUsize::new(0),
            fail: true,
        };
        let t = Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap();

        assert!(cache.get_or_embed(&embedder, t).await.is_err());
        assert!(cache.get_or_embed(&embedder, t).await.is_err());
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 2);
        assert!(cache.get(&t).await.is_none());
    }
}
