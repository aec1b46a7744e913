//! Registry of tiered caches.
//!
//! A manager owns the shared component set (L2 adapter, lock manager,
//! publisher, policy tree) and hands out one `TieredCache` per name. In
//! static mode the set of names is fixed at construction; in dynamic
//! mode caches appear on first use.

use std::sync::Arc;

use dashmap::DashMap;
use deadpool_redis::Pool;
use tracing::info;

use stratum_config::CacheConfig;

use crate::Cache;
use crate::listen::{CacheRegistry, InvalidationListener};
use crate::lock::LockManager;
use crate::publish::InvalidationPublisher;
use crate::remote::RemoteStore;
use crate::tiered::TieredCache;

/// Creates and hands out named tiered caches.
pub struct TieredCacheManager {
    remote: Arc<RemoteStore>,
    locks: Arc<LockManager>,
    publisher: Arc<InvalidationPublisher>,
    config: Arc<CacheConfig>,
    caches: CacheRegistry,
    dynamic: bool,
}

impl TieredCacheManager {
    /// Build a manager with default components over `pool`.
    pub fn new(pool: Pool, config: CacheConfig) -> Self {
        let remote = Arc::new(RemoteStore::new(pool.clone()));
        let locks = Arc::new(LockManager::new(pool.clone()));
        let publisher = Arc::new(InvalidationPublisher::new(pool));
        Self::with_components(remote, locks, publisher, config)
    }

    /// Build a manager from explicit components. Lets embedders swap in
    /// a pre-configured lock manager or a publisher with a distinct
    /// identity.
    pub fn with_components(
        remote: Arc<RemoteStore>,
        locks: Arc<LockManager>,
        publisher: Arc<InvalidationPublisher>,
        config: CacheConfig,
    ) -> Self {
        let dynamic = config.cache_names.is_empty();
        let manager = Self {
            remote,
            locks,
            publisher,
            config: Arc::new(config),
            caches: Arc::new(DashMap::new()),
            dynamic,
        };

        for name in &manager.config.cache_names {
            manager
                .caches
                .insert(name.clone(), manager.build_cache(name));
        }
        info!(
            mode = if manager.dynamic { "dynamic" } else { "static" },
            caches = manager.caches.len(),
            "tiered cache manager ready"
        );
        manager
    }

    fn build_cache(&self, name: &str) -> Arc<TieredCache> {
        let strategy = self.config.strategy_for(name);
        Arc::new(TieredCache::new(
            name,
            strategy,
            Arc::clone(&self.config),
            Arc::clone(&self.remote),
            Arc::clone(&self.locks),
            Arc::clone(&self.publisher),
        ))
    }

    /// Look up a cache by name behind the `Cache` contract.
    ///
    /// Static mode returns `None` for unknown names; dynamic mode
    /// creates the cache on first use, with concurrent callers observing
    /// the same instance.
    pub fn get_cache(&self, name: &str) -> Option<Arc<dyn Cache>> {
        self.get_tiered_cache(name).map(|c| c as Arc<dyn Cache>)
    }

    /// Same lookup, but with the full tiered API (read-through loader,
    /// stats).
    pub fn get_tiered_cache(&self, name: &str) -> Option<Arc<TieredCache>> {
        if let Some(cache) = self.caches.get(name) {
            return Some(Arc::clone(cache.value()));
        }
        if !self.dynamic {
            return None;
        }
        Some(Arc::clone(
            self.caches
                .entry(name.to_string())
                .or_insert_with(|| self.build_cache(name))
                .value(),
        ))
    }

    /// Names of the currently live caches.
    pub fn cache_names(&self) -> Vec<String> {
        self.caches.iter().map(|e| e.key().clone()).collect()
    }

    /// Every live tiered cache, for metrics/diagnostic consumers.
    pub fn all_tiered_caches(&self) -> Vec<Arc<TieredCache>> {
        self.caches.iter().map(|e| Arc::clone(e.value())).collect()
    }

    /// Build the invalidation listener bound to this manager's caches.
    /// The URL must point at the same Redis the pool uses; pooled
    /// connections cannot subscribe.
    pub fn listener(&self, redis_url: impl Into<String>) -> InvalidationListener {
        InvalidationListener::new(redis_url.into(), Arc::clone(&self.caches))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratum_config::{CacheOverrides, ClearMode};

    // deadpool creates connections lazily, so registry behavior is
    // testable without a reachable server
    fn offline_pool() -> Pool {
        deadpool_redis::Config::from_url("redis://127.0.0.1:1")
            .create_pool(Some(deadpool_redis::Runtime::Tokio1))
            .expect("create pool")
    }

    #[tokio::test]
    async fn test_static_mode_precreates_and_rejects_unknown() {
        let config = CacheConfig {
            cache_names: vec!["user_info".to_string(), "sys_config".to_string()],
            ..Default::default()
        };
        let manager = TieredCacheManager::new(offline_pool(), config);

        let mut names = manager.cache_names();
        names.sort();
        assert_eq!(names, vec!["sys_config", "user_info"]);

        assert!(manager.get_cache("user_info").is_some());
        assert!(manager.get_cache("unknown").is_none());
        assert!(manager.get_tiered_cache("unknown").is_none());
    }

    #[tokio::test]
    async fn test_dynamic_mode_creates_on_first_use() {
        let manager = TieredCacheManager::new(offline_pool(), CacheConfig::default());
        assert!(manager.cache_names().is_empty());

        let first = manager.get_tiered_cache("orders").expect("created");
        let second = manager.get_tiered_cache("orders").expect("reused");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(manager.cache_names(), vec!["orders"]);
    }

    #[tokio::test]
    async fn test_caches_carry_their_strategies() {
        let mut config = CacheConfig::default();
        config.caches.insert(
            "short_lived".to_string(),
            CacheOverrides {
                remote_ttl_ms: Some(5_000),
                clear_mode: Some(ClearMode::Full),
                ..Default::default()
            },
        );
        let manager = TieredCacheManager::new(offline_pool(), config);

        let cache = manager.get_tiered_cache("short_lived").unwrap();
        assert_eq!(cache.strategy().remote_ttl_ms, 5_000);
        assert_eq!(cache.strategy().clear_mode, ClearMode::Full);

        let other = manager.get_tiered_cache("other").unwrap();
        assert_eq!(other.strategy().remote_ttl_ms, 3_600_000);
        assert_eq!(other.strategy().clear_mode, ClearMode::Safe);
    }

    #[tokio::test]
    async fn test_all_tiered_caches_reflects_registry() {
        let manager = TieredCacheManager::new(offline_pool(), CacheConfig::default());
        manager.get_tiered_cache("a").unwrap();
        manager.get_tiered_cache("b").unwrap();
        assert_eq!(manager.all_tiered_caches().len(), 2);
    }
}
