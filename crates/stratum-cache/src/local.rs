//! Local-only cache mode.
//!
//! The same `Cache` contract served entirely from a bounded in-process
//! map. No shared tier, no broadcasts; useful for single-instance
//! deployments and as the degraded mode when Redis is not available.

use std::time::Duration;

use async_trait::async_trait;
use moka::future::Cache as MokaCache;
use serde_json::Value;

use stratum_core::{CachedValue, Result, encode_token};

use crate::Cache;

/// A purely in-process cache with the tiered cache's value semantics
/// (tokens, null sentinel included).
pub struct LocalCache {
    name: String,
    store: MokaCache<String, String>,
}

impl LocalCache {
    pub fn new(name: impl Into<String>, max_size: u64, ttl: Duration) -> Self {
        Self {
            name: name.into(),
            store: MokaCache::builder()
                .max_capacity(max_size)
                .time_to_live(ttl)
                .build(),
        }
    }

    /// Approximate number of entries. Diagnostic only.
    pub fn entry_count(&self) -> u64 {
        self.store.entry_count()
    }

    /// Flush pending maintenance so entry counts are exact.
    pub async fn sync(&self) {
        self.store.run_pending_tasks().await;
    }
}

#[async_trait]
impl Cache for LocalCache {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &str) -> Result<Option<CachedValue>> {
        match self.store.get(key).await {
            Some(token) => Ok(Some(CachedValue::from_token(&token)?)),
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, value: Option<Value>) -> Result<()> {
        let token = encode_token(value.as_ref())?;
        self.store.insert(key.to_string(), token).await;
        Ok(())
    }

    async fn put_if_absent(&self, key: &str, value: Option<Value>) -> Result<Option<CachedValue>> {
        let token = encode_token(value.as_ref())?;
        let entry = self
            .store
            .entry(key.to_string())
            .or_insert_with(async { token })
            .await;
        if entry.is_fresh() {
            Ok(None)
        } else {
            Ok(Some(CachedValue::from_token(entry.value())?))
        }
    }

    async fn evict(&self, key: &str) -> Result<()> {
        self.store.invalidate(key).await;
        Ok(())
    }

    async fn evict_if_present(&self, key: &str) -> Result<bool> {
        let present = self.store.contains_key(key);
        if present {
            self.store.invalidate(key).await;
        }
        Ok(present)
    }

    async fn clear(&self) -> Result<()> {
        self.store.invalidate_all();
        Ok(())
    }

    async fn invalidate(&self) -> Result<bool> {
        self.clear().await?;
        Ok(true)
    }

    async fn evict_local(&self, key: &str) {
        self.store.invalidate(key).await;
    }

    async fn clear_local(&self) {
        self.store.invalidate_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cache() -> LocalCache {
        LocalCache::new("unit", 100, Duration::from_secs(60))
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let cache = cache();
        cache.put("k", Some(json!({"a": 1}))).await.unwrap();

        let value = cache.get("k").await.unwrap().expect("present");
        assert_eq!(value.get(), Some(&json!({"a": 1})));
    }

    #[tokio::test]
    async fn test_put_null_is_cached_null_not_absent() {
        let cache = cache();
        cache.put("missing", None).await.unwrap();

        let value = cache.get("missing").await.unwrap().expect("present");
        assert!(value.is_null());
    }

    #[tokio::test]
    async fn test_get_absent() {
        let cache = cache();
        assert!(cache.get("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_put_if_absent_keeps_first_value() {
        let cache = cache();
        let first = cache.put_if_absent("k", Some(json!("a"))).await.unwrap();
        assert!(first.is_none());

        let second = cache.put_if_absent("k", Some(json!("b"))).await.unwrap();
        let existing = second.expect("existing value");
        assert_eq!(existing.get(), Some(&json!("a")));

        let value = cache.get("k").await.unwrap().unwrap();
        assert_eq!(value.get(), Some(&json!("a")));
    }

    #[tokio::test]
    async fn test_evict_if_present_reports_presence() {
        let cache = cache();
        cache.put("k", Some(json!(1))).await.unwrap();

        assert!(cache.evict_if_present("k").await.unwrap());
        assert!(!cache.evict_if_present("k").await.unwrap());
        assert!(cache.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_evict_is_idempotent() {
        let cache = cache();
        cache.put("k", Some(json!(1))).await.unwrap();
        cache.evict("k").await.unwrap();
        cache.evict("k").await.unwrap();
        assert!(cache.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_clear_empties_everything() {
        let cache = cache();
        for i in 0..5 {
            cache.put(&format!("k{i}"), Some(json!(i))).await.unwrap();
        }
        assert!(cache.invalidate().await.unwrap());
        cache.sync().await;
        assert_eq!(cache.entry_count(), 0);
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let cache = LocalCache::new("unit", 100, Duration::from_millis(50));
        cache.put("k", Some(json!(1))).await.unwrap();
        assert!(cache.get("k").await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(cache.get("k").await.unwrap().is_none());
    }
}
