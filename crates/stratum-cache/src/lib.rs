//! Two-tier caching for horizontally scaled services.
//!
//! ## Architecture
//!
//! - **L1 (moka)**: in-process, bounded, write-TTL-evicting, per instance
//! - **L2 (Redis)**: one hash per cache with per-field TTLs, shared
//! - **Pub/Sub**: best-effort cross-instance invalidation
//!
//! ```text
//! get(key) → L1 (moka) → L2 (Redis hash) → loader (under lock)
//!               ↓              ↓                 ↓
//!           <1µs latency   ~ms latency     source of truth
//! ```
//!
//! Cache misses that reach the loader are single-flighted twice: once in
//! process through the L1 compute primitive and once across processes
//! through a distributed lock with watchdog renewal. Confirmed absences
//! are cached with a null sentinel so missing keys cannot hammer the
//! source, and shared-tier TTLs are randomized so entries written
//! together do not expire together.
//!
//! ## Example
//!
//! ```ignore
//! let pool = stratum_cache::connect("redis://localhost:6379", 10, 5000)?;
//! let manager = TieredCacheManager::new(pool, CacheConfig::default());
//! manager.listener("redis://localhost:6379").start();
//!
//! let users = manager.get_tiered_cache("user_info").unwrap();
//! let user = users
//!     .get_with("user_7", || async { load_user("user_7").await })
//!     .await?;
//! ```

use async_trait::async_trait;
use serde_json::Value;

use stratum_core::Result;

pub mod listen;
pub mod local;
pub mod lock;
pub mod manager;
pub mod publish;
pub mod remote;
pub mod tiered;

pub use listen::InvalidationListener;
pub use local::LocalCache;
pub use lock::{LockGuard, LockManager};
pub use manager::TieredCacheManager;
pub use publish::{INVALIDATION_CHANNEL, InvalidationPublisher};
pub use remote::{RemoteCache, RemoteStore, randomize_ttl};
pub use tiered::{CacheStatsSnapshot, TieredCache};

// Re-export the shared vocabulary so embedders depend on one crate.
pub use stratum_config::{
    CacheConfig, CacheOverrides, CacheStrategy, ClearMode, FallbackStrategy,
};
pub use stratum_core::{
    CacheError, CacheMessage, CachedValue, MessageKind, NULL_SENTINEL, instance_id,
};

/// The cache contract every mode implements.
///
/// Tiered, remote-only and local-only caches expose the same surface;
/// picking one is a constructor-time decision. Read-through loading is
/// not part of the object-safe contract; it lives on [`TieredCache`],
/// generic over the loader.
#[async_trait]
pub trait Cache: Send + Sync {
    fn name(&self) -> &str;

    /// Wrapper of the stored value (`CachedValue::is_null()` for a
    /// cached absence), or `None` when the cache holds nothing.
    async fn get(&self, key: &str) -> Result<Option<CachedValue>>;

    /// Store a value; `None` stores the null sentinel.
    async fn put(&self, key: &str, value: Option<Value>) -> Result<()>;

    /// Store only when absent; returns the pre-existing value if any.
    async fn put_if_absent(&self, key: &str, value: Option<Value>)
    -> Result<Option<CachedValue>>;

    async fn evict(&self, key: &str) -> Result<()>;

    /// Evict and report whether anything was there.
    async fn evict_if_present(&self, key: &str) -> Result<bool>;

    async fn clear(&self) -> Result<()>;

    /// Clear and confirm.
    async fn invalidate(&self) -> Result<bool>;

    /// Drop a key from the local tier only, without broadcasting.
    /// Invoked by the invalidation listener.
    async fn evict_local(&self, key: &str);

    /// Drop the whole local tier only, without broadcasting.
    /// Invoked by the invalidation listener.
    async fn clear_local(&self);
}

/// Build a Redis pool with bounded waits, sized for cache traffic.
pub fn connect(url: &str, pool_size: usize, timeout_ms: u64) -> Result<deadpool_redis::Pool> {
    use std::time::Duration;

    let mut redis_config = deadpool_redis::Config::from_url(url);
    let pool_config = redis_config.pool.get_or_insert_with(Default::default);
    pool_config.max_size = pool_size;
    pool_config.timeouts.wait = Some(Duration::from_millis(timeout_ms));
    pool_config.timeouts.create = Some(Duration::from_millis(timeout_ms));
    pool_config.timeouts.recycle = Some(Duration::from_millis(timeout_ms));

    redis_config
        .create_pool(Some(deadpool_redis::Runtime::Tokio1))
        .map_err(|e| stratum_core::CacheError::configuration(format!("failed to create redis pool: {e}")))
}
