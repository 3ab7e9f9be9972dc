//! Key-value cache with TTL semantics.
//!
//! Servers receive the cache as an `Arc<dyn Cache>` so the in-process
//! [`MemoryCache`] can be swapped for a networked store without touching the
//! handlers.
//!
//! ## Key layout
//!
//! ```text
//! webhook:<delivery_id>          1 hour    received delivery
//! webhook:error:<delivery_id>    24 hours  handler failure record
//! webhook:config:<project_id>    7 days    hook registered by setup_webhooks
//! repo:config:<project_id>       30 days   repository connected to a project
//! pr:config:<repo_id>            30 days   PR automation config
//! ```

pub mod memory;

use std::time::Duration;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};

use crate::Result;

pub use memory::MemoryCache;

pub const WEBHOOK_EVENT_TTL: Duration = Duration::from_secs(3600);
pub const WEBHOOK_ERROR_TTL: Duration = Duration::from_secs(86_400);
pub const WEBHOOK_CONFIG_TTL: Duration = Duration::from_secs(86_400 * 7);
pub const REPO_CONFIG_TTL: Duration = Duration::from_secs(86_400 * 30);
pub const PR_CONFIG_TTL: Duration = Duration::from_secs(86_400 * 30);

/// Cache capability injected into servers.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Store `value` under `key`, expiring after `ttl`.
    async fn set_ex(&self, key: &str, ttl: Duration, value: String) -> Result<()>;

    /// Fetch a live value.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// List live keys starting with `prefix`, sorted.
    async fn keys(&self, prefix: &str) -> Result<Vec<String>>;
}

/// Serialize `value` as JSON and store it.
pub async fn put_json<T: Serialize + ?Sized>(
    cache: &dyn Cache,
    key: &str,
    ttl: Duration,
    value: &T,
) -> Result<()> {
    let raw = serde_json::to_string(value)?;
    cache.set_ex(key, ttl, raw).await
}

/// Fetch and deserialize a JSON value.
pub async fn get_json<T: DeserializeOwned>(cache: &dyn Cache, key: &str) -> Result<Option<T>> {
    match cache.get(key).await? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

/// Fetch every JSON value stored under `prefix`, skipping entries that fail to
/// parse.
pub async fn scan_json<T: DeserializeOwned>(cache: &dyn Cache, prefix: &str) -> Result<Vec<T>> {
    let mut values = Vec::new();
    for key in cache.keys(prefix).await? {
        match get_json(cache, &key).await {
            Ok(Some(value)) => values.push(value),
            Ok(None) => {}
            Err(e) => tracing::warn!(key = %key, error = %e, "cache_entry_unreadable"),
        }
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Entry {
        name: String,
    }

    #[tokio::test]
    async fn test_json_helpers() {
        let cache = MemoryCache::new();
        put_json(&cache, "repo:config:p1", REPO_CONFIG_TTL, &Entry { name: "a".into() })
            .await
            .unwrap();
        put_json(&cache, "repo:config:p2", REPO_CONFIG_TTL, &Entry { name: "b".into() })
            .await
            .unwrap();
        cache
            .set_ex("repo:config:broken", REPO_CONFIG_TTL, "not json".to_string())
            .await
            .unwrap();

        let one: Option<Entry> = get_json(&cache, "repo:config:p1").await.unwrap();
        assert_eq!(one, Some(Entry { name: "a".into() }));

        let all: Vec<Entry> = scan_json(&cache, "repo:config:").await.unwrap();
        assert_eq!(all.len(), 2);
    }
}
