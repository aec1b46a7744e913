//! Fire-and-forget publication of invalidation messages.
//!
//! Publication must never slow down the write path: the message is
//! handed to a spawned task and the caller returns immediately. Failures
//! are logged and swallowed; the publishing process has already updated
//! its own tiers, and peers fall back to their local TTLs.

use deadpool_redis::Pool;
use redis::AsyncCommands;
use tracing::{debug, warn};

use stratum_core::{CacheMessage, instance_id};

/// The shared pub/sub topic for invalidation messages.
pub const INVALIDATION_CHANNEL: &str = "cache:invalidate";

/// Publishes evict/clear messages for all caches of one process.
pub struct InvalidationPublisher {
    pool: Pool,
    instance_id: String,
}

impl InvalidationPublisher {
    pub fn new(pool: Pool) -> Self {
        Self::with_instance_id(pool, instance_id())
    }

    /// Publish under an explicit identity instead of this process's own.
    /// Lets tests (and embedders running several logical instances in
    /// one process) exercise peer-message handling.
    pub fn with_instance_id(pool: Pool, instance_id: impl Into<String>) -> Self {
        Self {
            pool,
            instance_id: instance_id.into(),
        }
    }

    pub fn publish_evict(&self, cache_name: &str, key: &str) {
        self.publish(CacheMessage::evict_from(&self.instance_id, cache_name, key));
    }

    pub fn publish_clear(&self, cache_name: &str) {
        self.publish(CacheMessage::clear_from(&self.instance_id, cache_name));
    }

    fn publish(&self, message: CacheMessage) {
        let payload = match serde_json::to_string(&message) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(cache = %message.cache_name, error = %e, "failed to encode invalidation message");
                return;
            }
        };

        let pool = self.pool.clone();
        tokio::spawn(async move {
            match pool.get().await {
                Ok(mut conn) => {
                    if let Err(e) = conn
                        .publish::<_, _, ()>(INVALIDATION_CHANNEL, &payload)
                        .await
                    {
                        warn!(
                            cache = %message.cache_name,
                            error = %e,
                            "failed to publish invalidation"
                        );
                    } else {
                        debug!(
                            cache = %message.cache_name,
                            kind = ?message.kind,
                            "published invalidation"
                        );
                    }
                }
                Err(e) => {
                    warn!(error = %e, "failed to get redis connection for invalidation publish");
                }
            }
        });
    }
}
