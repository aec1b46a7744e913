//! Subscription side of cross-instance invalidation.
//!
//! One dedicated pub/sub connection per process listens on the shared
//! channel and translates peer messages into local-only drops on the
//! addressed cache. The listener never mutates the shared tier: the
//! publishing process already did, and echoing the mutation would loop.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures_util::StreamExt;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use stratum_core::{CacheError, CacheMessage, MessageKind, Result};

use crate::publish::INVALIDATION_CHANNEL;
use crate::tiered::TieredCache;

pub(crate) type CacheRegistry = Arc<DashMap<String, Arc<TieredCache>>>;

/// Listens for peer invalidations and applies them locally.
pub struct InvalidationListener {
    redis_url: String,
    registry: CacheRegistry,
}

impl InvalidationListener {
    pub(crate) fn new(redis_url: String, registry: CacheRegistry) -> Self {
        Self {
            redis_url,
            registry,
        }
    }

    /// Spawn the subscription loop. The task reconnects with a short
    /// backoff whenever the connection drops and runs for the life of
    /// the process.
    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                if let Err(e) = self.run().await {
                    error!(error = %e, "cache invalidation listener error, reconnecting in 5s");
                    sleep(Duration::from_secs(5)).await;
                }
            }
        })
    }

    async fn run(&self) -> Result<()> {
        // pooled connections cannot SUBSCRIBE; use a dedicated client
        let client = redis::Client::open(self.redis_url.as_str())?;
        let mut pubsub = client.get_async_pubsub().await?;
        pubsub.subscribe(INVALIDATION_CHANNEL).await?;

        info!(channel = INVALIDATION_CHANNEL, "subscribed to cache invalidation channel");

        let mut stream = pubsub.on_message();
        while let Some(msg) = stream.next().await {
            let payload: String = match msg.get_payload() {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(error = %e, "failed to read invalidation payload");
                    continue;
                }
            };
            match serde_json::from_str::<CacheMessage>(&payload) {
                Ok(message) => self.dispatch(message).await,
                Err(e) => {
                    warn!(error = %e, payload = %payload, "failed to parse invalidation message");
                }
            }
        }

        warn!("invalidation pub/sub stream ended");
        Err(CacheError::SubscriptionEnded)
    }

    async fn dispatch(&self, message: CacheMessage) {
        if message.is_from_current_instance() {
            debug!(cache = %message.cache_name, "skipping self-originated invalidation");
            return;
        }

        let Some(cache) = self
            .registry
            .get(&message.cache_name)
            .map(|entry| Arc::clone(entry.value()))
        else {
            debug!(cache = %message.cache_name, "invalidation for unknown cache, discarding");
            return;
        };

        match message.kind {
            MessageKind::Evict => match message.key {
                Some(key) => {
                    debug!(cache = %message.cache_name, key = %key, "applying peer evict");
                    cache.evict_local(&key).await;
                }
                None => {
                    warn!(cache = %message.cache_name, "EVICT message without key, discarding");
                }
            },
            MessageKind::Clear => {
                debug!(cache = %message.cache_name, "applying peer clear");
                cache.clear_local();
            }
        }
    }
}
