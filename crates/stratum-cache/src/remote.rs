//! Shared-tier adapter: one Redis hash per cache.
//!
//! Every cache maps to a single hash whose fields are the stringified
//! keys and whose values are stored tokens (JSON or the null sentinel).
//! Per-field TTLs use `HPEXPIRE`, so writes go through small Lua scripts
//! to keep the set-and-expire pair atomic. Requires Redis >= 7.4 for
//! field expiration.

use std::sync::Arc;

use async_trait::async_trait;
use deadpool_redis::Pool;
use rand::Rng;
use redis::{AsyncCommands, Script};
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use stratum_core::{CachedValue, Result, encode_token};

use crate::Cache;

/// Atomic HSET + per-field HPEXPIRE.
const PUT_SCRIPT: &str = r#"
redis.call('HSET', KEYS[1], ARGV[1], ARGV[2])
redis.call('HPEXPIRE', KEYS[1], ARGV[3], 'FIELDS', 1, ARGV[1])
return 1
"#;

/// Return the existing field if present, otherwise store with TTL.
const PUT_IF_ABSENT_SCRIPT: &str = r#"
local existing = redis.call('HGET', KEYS[1], ARGV[1])
if existing then
    return existing
end
redis.call('HSET', KEYS[1], ARGV[1], ARGV[2])
redis.call('HPEXPIRE', KEYS[1], ARGV[3], 'FIELDS', 1, ARGV[1])
return false
"#;

/// Typed access to the shared Redis tier.
pub struct RemoteStore {
    pool: Pool,
    supports_unlink: OnceCell<bool>,
}

impl RemoteStore {
    pub fn new(pool: Pool) -> Self {
        Self {
            pool,
            supports_unlink: OnceCell::new(),
        }
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Read the raw stored token for `(cache, key)`.
    pub async fn get(&self, cache: &str, key: &str) -> Result<Option<String>> {
        let mut conn = self.pool.get().await?;
        let token: Option<String> = conn.hget(cache, key).await?;
        Ok(token)
    }

    /// Store `token` for `(cache, key)` with a per-field TTL.
    pub async fn put(&self, cache: &str, key: &str, token: &str, ttl_ms: u64) -> Result<()> {
        let mut conn = self.pool.get().await?;
        Script::new(PUT_SCRIPT)
            .key(cache)
            .arg(key)
            .arg(token)
            .arg(ttl_ms)
            .invoke_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    /// Atomically store `token` only if the field is absent. Returns the
    /// existing token when one was already present.
    pub async fn put_if_absent(
        &self,
        cache: &str,
        key: &str,
        token: &str,
        ttl_ms: u64,
    ) -> Result<Option<String>> {
        let mut conn = self.pool.get().await?;
        let existing: Option<String> = Script::new(PUT_IF_ABSENT_SCRIPT)
            .key(cache)
            .arg(key)
            .arg(token)
            .arg(ttl_ms)
            .invoke_async(&mut conn)
            .await?;
        Ok(existing)
    }

    /// Remove a single field.
    pub async fn evict(&self, cache: &str, key: &str) -> Result<()> {
        let mut conn = self.pool.get().await?;
        let _: () = conn.hdel(cache, key).await?;
        Ok(())
    }

    pub async fn exists(&self, cache: &str, key: &str) -> Result<bool> {
        let mut conn = self.pool.get().await?;
        let exists: bool = conn.hexists(cache, key).await?;
        Ok(exists)
    }

    /// Drop the whole hash for `cache`, preferring the non-blocking
    /// UNLINK when the server supports it.
    pub async fn clear(&self, cache: &str) -> Result<()> {
        let mut conn = self.pool.get().await?;
        if self.supports_unlink().await {
            let _: () = redis::cmd("UNLINK").arg(cache).query_async(&mut conn).await?;
        } else {
            let _: () = conn.del(cache).await?;
        }
        debug!(cache = %cache, "cleared remote hash");
        Ok(())
    }

    /// Whether the server supports UNLINK (Redis >= 4). Probed once per
    /// adapter; any probe failure means DEL from then on.
    pub async fn supports_unlink(&self) -> bool {
        *self
            .supports_unlink
            .get_or_init(|| async {
                match self.probe_unlink().await {
                    Ok(supported) => {
                        debug!(supported, "probed UNLINK support");
                        supported
                    }
                    Err(e) => {
                        warn!(error = %e, "failed to probe UNLINK support, using DEL");
                        false
                    }
                }
            })
            .await
    }

    async fn probe_unlink(&self) -> Result<bool> {
        let mut conn = self.pool.get().await?;
        let info: String = redis::cmd("INFO")
            .arg("server")
            .query_async(&mut conn)
            .await?;
        Ok(parse_major_version(&info).is_some_and(|major| major >= 4))
    }
}

/// Extract the major server version from an `INFO server` payload.
fn parse_major_version(info: &str) -> Option<u32> {
    let line = info.lines().find(|l| l.starts_with("redis_version:"))?;
    let version = line.trim_start_matches("redis_version:").trim();
    version.split('.').next()?.parse().ok()
}

/// Spread a TTL by up to `base * factor` in either direction so that
/// entries written together do not all expire together. Never returns
/// less than 1 ms for a positive base; a zero base or non-positive
/// factor passes through unchanged.
pub fn randomize_ttl(base_ms: u64, factor: f64) -> u64 {
    if base_ms == 0 || factor <= 0.0 {
        return base_ms;
    }
    let spread = (base_ms as f64 * factor) as i64;
    if spread == 0 {
        return base_ms;
    }
    let jitter = rand::thread_rng().gen_range(-spread..=spread);
    (base_ms as i64 + jitter).max(1) as u64
}

/// A cache backed by the shared tier only: no local entries, every read
/// is a network round trip. Useful when a process cannot afford local
/// staleness at all.
pub struct RemoteCache {
    name: String,
    store: Arc<RemoteStore>,
    ttl_ms: u64,
    null_ttl_ms: u64,
    ttl_random_factor: f64,
}

impl RemoteCache {
    pub fn new(
        name: impl Into<String>,
        store: Arc<RemoteStore>,
        ttl_ms: u64,
        null_ttl_ms: u64,
        ttl_random_factor: f64,
    ) -> Self {
        Self {
            name: name.into(),
            store,
            ttl_ms,
            null_ttl_ms,
            ttl_random_factor,
        }
    }

    fn token_and_ttl(&self, value: Option<&serde_json::Value>) -> Result<(String, u64)> {
        let token = encode_token(value)?;
        let ttl = match value {
            Some(_) => randomize_ttl(self.ttl_ms, self.ttl_random_factor),
            None => self.null_ttl_ms,
        };
        Ok((token, ttl))
    }
}

#[async_trait]
impl Cache for RemoteCache {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &str) -> Result<Option<CachedValue>> {
        match self.store.get(&self.name, key).await? {
            Some(token) => Ok(Some(CachedValue::from_token(&token)?)),
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, value: Option<serde_json::Value>) -> Result<()> {
        let (token, ttl) = self.token_and_ttl(value.as_ref())?;
        self.store.put(&self.name, key, &token, ttl).await
    }

    async fn put_if_absent(
        &self,
        key: &str,
        value: Option<serde_json::Value>,
    ) -> Result<Option<CachedValue>> {
        let (token, ttl) = self.token_and_ttl(value.as_ref())?;
        match self.store.put_if_absent(&self.name, key, &token, ttl).await? {
            Some(existing) => Ok(Some(CachedValue::from_token(&existing)?)),
            None => Ok(None),
        }
    }

    async fn evict(&self, key: &str) -> Result<()> {
        self.store.evict(&self.name, key).await
    }

    async fn evict_if_present(&self, key: &str) -> Result<bool> {
        if self.store.exists(&self.name, key).await? {
            self.store.evict(&self.name, key).await?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn clear(&self) -> Result<()> {
        self.store.clear(&self.name).await
    }

    async fn invalidate(&self) -> Result<bool> {
        self.clear().await?;
        Ok(true)
    }

    async fn evict_local(&self, _key: &str) {
        // no local tier
    }

    async fn clear_local(&self) {
        // no local tier
    }
}
