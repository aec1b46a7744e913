//! The two-tier read-through / write-through cache engine.
//!
//! ## Read path
//!
//! ```text
//! get(key)          -> L1 (moka) -> L2 (Redis hash) -> absent
//! get_with(key, f)  -> L1 compute-if-absent -> L2 -> loader under lock
//! ```
//!
//! Read-through loads are single-flighted twice: concurrent calls in
//! this process coalesce on the L1 compute primitive, and concurrent
//! processes coalesce on a distributed lock. The loser of the lock race
//! either re-reads what the winner stored, errors out, or (FALLBACK)
//! loads on its own, depending on the cache's strategy.
//!
//! ## Write path
//!
//! Writes go to L2 first so a failure never leaves a fresh L1 in front
//! of a stale L2. Local drops are then broadcast as EVICT/CLEAR messages
//! so peer processes shed their stale L1 entries and re-read from L2 on
//! demand.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use moka::future::Cache as MokaCache;
use serde_json::Value;
use tracing::{debug, warn};

use stratum_config::{CacheConfig, CacheStrategy, ClearMode, FallbackStrategy};
use stratum_core::{CacheError, CachedValue, NULL_SENTINEL, Result, decode_token, encode_token};

use crate::Cache;
use crate::lock::LockManager;
use crate::publish::InvalidationPublisher;
use crate::remote::{RemoteStore, randomize_ttl};

/// One named cache: a bounded local tier in front of a shared Redis
/// hash, coordinated with peer processes through a distributed lock and
/// an invalidation channel.
pub struct TieredCache {
    name: String,
    strategy: CacheStrategy,
    config: Arc<CacheConfig>,
    local: MokaCache<String, String>,
    remote: Arc<RemoteStore>,
    locks: Arc<LockManager>,
    publisher: Arc<InvalidationPublisher>,
    stats: TieredCacheStats,
}

impl TieredCache {
    pub(crate) fn new(
        name: impl Into<String>,
        strategy: CacheStrategy,
        config: Arc<CacheConfig>,
        remote: Arc<RemoteStore>,
        locks: Arc<LockManager>,
        publisher: Arc<InvalidationPublisher>,
    ) -> Self {
        let local = MokaCache::builder()
            .max_capacity(strategy.local_max_size)
            .time_to_live(Duration::from_millis(strategy.local_ttl_ms))
            .build();
        Self {
            name: name.into(),
            strategy,
            config,
            local,
            remote,
            locks,
            publisher,
            stats: TieredCacheStats::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn strategy(&self) -> &CacheStrategy {
        &self.strategy
    }

    /// Probe both tiers without loading.
    ///
    /// A hit in L2 back-fills L1 with the raw stored token, sentinel
    /// included, so the next read is local.
    pub async fn get(&self, key: &str) -> Result<Option<CachedValue>> {
        if let Some(token) = self.local.get(key).await {
            self.stats.l1_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Some(CachedValue::from_token(&token)?));
        }
        self.stats.l1_misses.fetch_add(1, Ordering::Relaxed);

        match self.remote.get(&self.name, key).await? {
            Some(token) => {
                self.stats.l2_hits.fetch_add(1, Ordering::Relaxed);
                self.local.insert(key.to_string(), token.clone()).await;
                Ok(Some(CachedValue::from_token(&token)?))
            }
            None => {
                self.stats.l2_misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    /// Read-through: return the cached value or load it.
    ///
    /// `Ok(None)` means the source of truth confirmed the key absent,
    /// either now or within the sentinel's TTL. Concurrent calls for the
    /// same key in this process share one execution; across processes,
    /// the distributed lock elects one loader.
    ///
    /// # Errors
    ///
    /// [`CacheError::LockContended`] under lock pressure with the THROW
    /// strategy; [`CacheError::ValueRetrieval`] when the loader fails.
    pub async fn get_with<F, Fut, E>(&self, key: &str, loader: F) -> Result<Option<Value>>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = std::result::Result<Option<Value>, E>> + Send,
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        // approximate: the compute primitive does not report hit vs fill
        if self.local.contains_key(key) {
            self.stats.l1_hits.fetch_add(1, Ordering::Relaxed);
        }
        let token = self
            .local
            .try_get_with(key.to_string(), self.load_token(key, loader))
            .await
            .map_err(CacheError::coalesced)?;
        decode_token(&token)
    }

    /// The L1 compute-if-absent mapping: L2 first, loader under the
    /// distributed lock on an L2 miss. Whatever comes back is the token
    /// the local tier keeps.
    async fn load_token<F, Fut, E>(&self, key: &str, loader: F) -> Result<String>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = std::result::Result<Option<Value>, E>> + Send,
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        self.stats.l1_misses.fetch_add(1, Ordering::Relaxed);
        if let Some(token) = self.remote.get(&self.name, key).await? {
            self.stats.l2_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(token);
        }
        self.stats.l2_misses.fetch_add(1, Ordering::Relaxed);
        self.load_under_lock(key, loader).await
    }

    async fn load_under_lock<F, Fut, E>(&self, key: &str, loader: F) -> Result<String>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = std::result::Result<Option<Value>, E>> + Send,
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let lock_key = self.lock_key(key);
        let wait = Duration::from_millis(self.config.remote.lock_wait_time_ms);

        match self.locks.try_lock(&lock_key, wait).await? {
            Some(guard) => {
                let result = self.load_and_store(key, loader).await;
                if let Err(e) = guard.release().await {
                    warn!(cache = %self.name, key = %key, error = %e, "failed to release load lock");
                }
                result
            }
            None => {
                // someone else may have finished while we waited
                if let Some(token) = self.remote.get(&self.name, key).await? {
                    return Ok(token);
                }
                match self.strategy.fallback_strategy {
                    FallbackStrategy::Throw => {
                        Err(CacheError::lock_contended(&self.name, key))
                    }
                    FallbackStrategy::Fallback => {
                        debug!(cache = %self.name, key = %key, "lock contended, loading without it");
                        self.run_loader_and_store(key, loader).await
                    }
                }
            }
        }
    }

    async fn load_and_store<F, Fut, E>(&self, key: &str, loader: F) -> Result<String>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = std::result::Result<Option<Value>, E>> + Send,
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        // double-check: another holder may have stored while we queued
        if let Some(token) = self.remote.get(&self.name, key).await? {
            return Ok(token);
        }
        self.run_loader_and_store(key, loader).await
    }

    async fn run_loader_and_store<F, Fut, E>(&self, key: &str, loader: F) -> Result<String>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = std::result::Result<Option<Value>, E>> + Send,
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let loaded = loader()
            .await
            .map_err(|e| CacheError::value_retrieval(key, e))?;
        self.stats.loads.fetch_add(1, Ordering::Relaxed);

        let (token, ttl_ms) = self.token_and_ttl(loaded.as_ref())?;
        self.remote.put(&self.name, key, &token, ttl_ms).await?;
        debug!(cache = %self.name, key = %key, ttl_ms, "stored loaded value");
        Ok(token)
    }

    /// Write through both tiers. `None` stores the null sentinel.
    ///
    /// L2 is written first; an L2 failure aborts before L1 is touched.
    /// Peers receive an EVICT and re-read the new value from L2 on
    /// demand.
    pub async fn put(&self, key: &str, value: Option<Value>) -> Result<()> {
        let (token, ttl_ms) = self.token_and_ttl(value.as_ref())?;
        self.remote.put(&self.name, key, &token, ttl_ms).await?;
        self.local.insert(key.to_string(), token).await;
        self.publisher.publish_evict(&self.name, key);
        Ok(())
    }

    /// Store only if the shared tier has no entry yet. Returns the
    /// existing value when one was already present.
    ///
    /// The atomicity lives in L2; L1 is last-writer-wins, which is
    /// weaker but only widens a window peers already tolerate.
    pub async fn put_if_absent(
        &self,
        key: &str,
        value: Option<Value>,
    ) -> Result<Option<CachedValue>> {
        let (token, ttl_ms) = self.token_and_ttl(value.as_ref())?;
        match self
            .remote
            .put_if_absent(&self.name, key, &token, ttl_ms)
            .await?
        {
            Some(existing) => {
                self.local.insert(key.to_string(), existing.clone()).await;
                Ok(Some(CachedValue::from_token(&existing)?))
            }
            None => {
                self.local.insert(key.to_string(), token).await;
                self.publisher.publish_evict(&self.name, key);
                Ok(None)
            }
        }
    }

    /// Drop `key` from both tiers and tell peers to do the same.
    ///
    /// L2 goes first: evicting L1 first would let a concurrent local
    /// reader repopulate it from the still-present L2 entry.
    pub async fn evict(&self, key: &str) -> Result<()> {
        self.remote.evict(&self.name, key).await?;
        self.local.invalidate(key).await;
        self.publisher.publish_evict(&self.name, key);
        Ok(())
    }

    /// Evict and report whether either tier actually held the key.
    pub async fn evict_if_present(&self, key: &str) -> Result<bool> {
        let present =
            self.local.contains_key(key) || self.remote.exists(&self.name, key).await?;
        if present {
            self.evict(key).await?;
        }
        Ok(present)
    }

    /// Clear this cache according to its clear mode.
    ///
    /// SAFE drops only local tiers (here and, via broadcast, on peers)
    /// and lets L2 drain through TTLs. FULL also deletes the whole L2
    /// hash.
    pub async fn clear(&self) -> Result<()> {
        match self.strategy.clear_mode {
            ClearMode::Safe => {
                self.local.invalidate_all();
            }
            ClearMode::Full => {
                self.remote.clear(&self.name).await?;
                self.local.invalidate_all();
            }
        }
        self.publisher.publish_clear(&self.name);
        Ok(())
    }

    pub async fn invalidate(&self) -> Result<bool> {
        self.clear().await?;
        Ok(true)
    }

    /// Drop `key` from the local tier only. Message-handler API; does
    /// not publish.
    pub async fn evict_local(&self, key: &str) {
        self.local.invalidate(key).await;
    }

    /// Drop every local entry. Message-handler API; does not publish.
    pub fn clear_local(&self) {
        self.local.invalidate_all();
    }

    /// Per-tier counters for metrics consumers.
    pub fn stats(&self) -> CacheStatsSnapshot {
        self.stats.snapshot(&self.name)
    }

    /// Approximate number of local entries. Diagnostic only.
    pub fn local_entry_count(&self) -> u64 {
        self.local.entry_count()
    }

    /// Flush pending local maintenance so entry counts are exact.
    /// Intended for tests and diagnostics.
    pub async fn sync_local(&self) {
        self.local.run_pending_tasks().await;
    }

    fn lock_key(&self, key: &str) -> String {
        format!("{}lock:{}:{}", self.config.cache_prefix, self.name, key)
    }

    fn token_and_ttl(&self, value: Option<&Value>) -> Result<(String, u64)> {
        let token = encode_token(value)?;
        let ttl_ms = if token == NULL_SENTINEL {
            self.config.remote.null_value_ttl_ms
        } else {
            randomize_ttl(self.strategy.remote_ttl_ms, self.config.remote.ttl_random_factor)
        };
        Ok((token, ttl_ms))
    }
}

#[async_trait]
impl Cache for TieredCache {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &str) -> Result<Option<CachedValue>> {
        TieredCache::get(self, key).await
    }

    async fn put(&self, key: &str, value: Option<Value>) -> Result<()> {
        TieredCache::put(self, key, value).await
    }

    async fn put_if_absent(&self, key: &str, value: Option<Value>) -> Result<Option<CachedValue>> {
        TieredCache::put_if_absent(self, key, value).await
    }

    async fn evict(&self, key: &str) -> Result<()> {
        TieredCache::evict(self, key).await
    }

    async fn evict_if_present(&self, key: &str) -> Result<bool> {
        TieredCache::evict_if_present(self, key).await
    }

    async fn clear(&self) -> Result<()> {
        TieredCache::clear(self).await
    }

    async fn invalidate(&self) -> Result<bool> {
        TieredCache::invalidate(self).await
    }

    async fn evict_local(&self, key: &str) {
        TieredCache::evict_local(self, key).await;
    }

    async fn clear_local(&self) {
        TieredCache::clear_local(self);
    }
}

/// Hit/miss counters, updated with relaxed atomics.
#[derive(Default)]
struct TieredCacheStats {
    l1_hits: AtomicU64,
    l1_misses: AtomicU64,
    l2_hits: AtomicU64,
    l2_misses: AtomicU64,
    loads: AtomicU64,
}

impl TieredCacheStats {
    fn snapshot(&self, name: &str) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            name: name.to_string(),
            l1_hits: self.l1_hits.load(Ordering::Relaxed),
            l1_misses: self.l1_misses.load(Ordering::Relaxed),
            l2_hits: self.l2_hits.load(Ordering::Relaxed),
            l2_misses: self.l2_misses.load(Ordering::Relaxed),
            loads: self.loads.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of one cache's counters.
#[derive(Debug, Clone)]
pub struct CacheStatsSnapshot {
    pub name: String,
    pub l1_hits: u64,
    pub l1_misses: u64,
    pub l2_hits: u64,
    pub l2_misses: u64,
    pub loads: u64,
}

impl CacheStatsSnapshot {
    /// Share of reads answered without leaving the process.
    pub fn l1_hit_rate(&self) -> f64 {
        let total = self.l1_hits + self.l1_misses;
        if total == 0 {
            0.0
        } else {
            self.l1_hits as f64 / total as f64
        }
    }
}
