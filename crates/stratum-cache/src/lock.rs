//! Distributed locks over Redis with automatic lease renewal.
//!
//! A lock is a plain `SET key token NX PX lease` with a random owner
//! token. While a guard is alive, a background watchdog task keeps
//! extending the lease, so holders never have to size a lease to their
//! slowest loader. Release and extension are owner-guarded Lua scripts:
//! only the process whose token is still stored may touch the key.

use std::time::Duration;

use deadpool_redis::Pool;
use redis::Script;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use stratum_core::Result;

/// Initial lease; the watchdog extends it while the guard is held.
const DEFAULT_LEASE_MS: u64 = 30_000;

/// Pause between acquisition attempts while waiting for a lock.
const RETRY_INTERVAL_MS: u64 = 50;

const RELEASE_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
"#;

const EXTEND_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('PEXPIRE', KEYS[1], ARGV[2])
end
return 0
"#;

/// Acquires distributed locks on a shared Redis.
pub struct LockManager {
    pool: Pool,
    lease_ms: u64,
}

impl LockManager {
    pub fn new(pool: Pool) -> Self {
        Self::with_lease(pool, DEFAULT_LEASE_MS)
    }

    /// Override the lease length. Shorter leases recover faster from
    /// crashed holders at the price of more renewal traffic.
    pub fn with_lease(pool: Pool, lease_ms: u64) -> Self {
        Self { pool, lease_ms }
    }

    /// Try to acquire `key`, waiting at most `wait`. Returns `None` when
    /// the lock stayed contended for the whole window.
    pub async fn try_lock(&self, key: &str, wait: Duration) -> Result<Option<LockGuard>> {
        let token = Uuid::new_v4().to_string();
        let deadline = Instant::now() + wait;

        loop {
            if self.attempt(key, &token).await? {
                debug!(key = %key, "acquired lock");
                return Ok(Some(self.guard(key, token)));
            }
            let now = Instant::now();
            if now >= deadline {
                debug!(key = %key, wait_ms = wait.as_millis() as u64, "lock wait timed out");
                return Ok(None);
            }
            let remaining = deadline - now;
            tokio::time::sleep(remaining.min(Duration::from_millis(RETRY_INTERVAL_MS))).await;
        }
    }

    async fn attempt(&self, key: &str, token: &str) -> Result<bool> {
        let mut conn = self.pool.get().await?;
        let acquired: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(token)
            .arg("NX")
            .arg("PX")
            .arg(self.lease_ms)
            .query_async(&mut conn)
            .await?;
        Ok(acquired.is_some())
    }

    fn guard(&self, key: &str, token: String) -> LockGuard {
        let watchdog = tokio::spawn(renew_loop(
            self.pool.clone(),
            key.to_string(),
            token.clone(),
            self.lease_ms,
        ));
        LockGuard {
            pool: self.pool.clone(),
            key: key.to_string(),
            token,
            watchdog,
        }
    }
}

async fn renew_loop(pool: Pool, key: String, token: String, lease_ms: u64) {
    let interval = Duration::from_millis((lease_ms / 3).max(1));
    loop {
        tokio::time::sleep(interval).await;
        match extend(&pool, &key, &token, lease_ms).await {
            Ok(true) => {}
            Ok(false) => {
                // lost the key (expired or taken over); nothing left to renew
                debug!(key = %key, "lock no longer held, stopping watchdog");
                return;
            }
            Err(e) => {
                warn!(key = %key, error = %e, "failed to extend lock lease");
            }
        }
    }
}

async fn extend(pool: &Pool, key: &str, token: &str, lease_ms: u64) -> Result<bool> {
    let mut conn = pool.get().await?;
    let extended: i64 = Script::new(EXTEND_SCRIPT)
        .key(key)
        .arg(token)
        .arg(lease_ms)
        .invoke_async(&mut conn)
        .await?;
    Ok(extended == 1)
}

/// A held distributed lock. Dropping the guard stops the watchdog and
/// lets the lease expire on its own; calling [`LockGuard::release`]
/// frees the key immediately.
pub struct LockGuard {
    pool: Pool,
    key: String,
    token: String,
    watchdog: JoinHandle<()>,
}

impl LockGuard {
    /// Release the lock if this guard still owns it. A lease that
    /// already expired (and was possibly re-acquired elsewhere) is left
    /// alone.
    pub async fn release(&self) -> Result<()> {
        self.watchdog.abort();
        let mut conn = self.pool.get().await?;
        let released: i64 = Script::new(RELEASE_SCRIPT)
            .key(&self.key)
            .arg(&self.token)
            .invoke_async(&mut conn)
            .await?;
        if released == 0 {
            debug!(key = %self.key, "lock already expired at release");
        }
        Ok(())
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.watchdog.abort();
    }
}
