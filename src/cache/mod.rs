//! Short-TTL read cache
//!
//! In-process cache for list endpoints, backed by `moka`. Write paths call
//! [`TtlCache::clear`] after any mutation that could stale a cached listing.

use std::time::Duration;

use moka::future::Cache;

/// Key under which the full expert listing is cached
pub const EXPERT_LIST_KEY: &str = "experts:all";

const MAX_ENTRIES: u64 = 1_000;

/// Keyed cache whose entries expire `ttl` after insertion
pub struct TtlCache<V: Clone + Send + Sync + 'static> {
    inner: Cache<String, V>,
}

impl<V: Clone + Send + Sync + 'static> TtlCache<V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(MAX_ENTRIES)
                .time_to_live(ttl)
                .build(),
        }
    }

    pub async fn get(&self, key: &str) -> Option<V> {
        self.inner.get(key).await
    }

    pub async fn set(&self, key: impl Into<String>, value: V) {
        self.inner.insert(key.into(), value).await;
    }

    /// Drop every entry; later reads miss immediately
    pub async fn clear(&self) {
        self.inner.invalidate_all();
        self.inner.run_pending_tasks().await;
    }

    /// Live entries
    pub async fn len(&self) -> u64 {
        self.inner.run_pending_tasks().await;
        self.inner.entry_count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_and_get() {
        let cache: TtlCache<Vec<u32>> = TtlCache::new(Duration::from_secs(300));

        cache.set("k", vec![1, 2, 3]).await;

        assert_eq!(cache.get("k").await, Some(vec![1, 2, 3]));
        assert_eq!(cache.get("other").await, None);
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_entries_expire() {
        let cache: TtlCache<String> = TtlCache::new(Duration::from_millis(50));
        cache.set("k", "a".to_string()).await;

        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(cache.get("k").await, None);
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_clear() {
        let cache: TtlCache<u8> = TtlCache::new(Duration::from_secs(60));
        cache.set("a", 1).await;
        cache.set("b", 2).await;

        cache.clear().await;

        assert_eq!(cache.get("a").await, None);
        assert!(cache.is_empty().await);
    }
}
