//! In-process cache backed by a `HashMap` with lazy expiry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::Cache;
use crate::Result;

/// TTL-aware in-memory cache.
///
/// Clones share the same storage. Expired entries are dropped when they are
/// next read or scanned.
#[derive(Clone, Default)]
pub struct MemoryCache {
    inner: Arc<RwLock<HashMap<String, Entry>>>,
}

struct Entry {
    value: String,
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, live or not yet collected.
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn set_ex(&self, key: &str, ttl: Duration, value: String) -> Result<()> {
        let entry = Entry {
            value,
            expires_at: Instant::now() + ttl,
        };
        self.inner.write().await.insert(key.to_string(), entry);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = Instant::now();
        {
            let map = self.inner.read().await;
            match map.get(key) {
                Some(entry) if entry.is_live(now) => return Ok(Some(entry.value.clone())),
                Some(_) => {}
                None => return Ok(None),
            }
        }

        // Expired: collect it under the write lock.
        let mut map = self.inner.write().await;
        if map.get(key).is_some_and(|e| !e.is_live(now)) {
            map.remove(key);
        }
        Ok(None)
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        let now = Instant::now();
        let mut map = self.inner.write().await;
        map.retain(|_, entry| entry.is_live(now));

        let mut keys: Vec<String> = map
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_and_get() {
        let cache = MemoryCache::new();
        cache
            .set_ex("webhook:1", Duration::from_secs(60), "payload".to_string())
            .await
            .unwrap();

        assert_eq!(cache.get("webhook:1").await.unwrap(), Some("payload".to_string()));
        assert_eq!(cache.get("webhook:2").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_expired_entry_is_dropped() {
        let cache = MemoryCache::new();
        cache
            .set_ex("short", Duration::from_millis(10), "x".to_string())
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(cache.get("short").await.unwrap(), None);
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_keys_by_prefix() {
        let cache = MemoryCache::new();
        let ttl = Duration::from_secs(60);
        cache.set_ex("webhook:config:b", ttl, "{}".into()).await.unwrap();
        cache.set_ex("webhook:config:a", ttl, "{}".into()).await.unwrap();
        cache.set_ex("webhook:abc", ttl, "{}".into()).await.unwrap();
        cache
            .set_ex("webhook:config:gone", Duration::ZERO, "{}".into())
            .await
            .unwrap();

        let keys = cache.keys("webhook:config:").await.unwrap();
        assert_eq!(keys, vec!["webhook:config:a", "webhook:config:b"]);
    }

    #[tokio::test]
    async fn test_clones_share_storage() {
        let cache = MemoryCache::new();
        let other = cache.clone();
        cache
            .set_ex("k", Duration::from_secs(60), "v".into())
            .await
            .unwrap();
        assert_eq!(other.get("k").await.unwrap(), Some("v".to_string()));
    }
}
