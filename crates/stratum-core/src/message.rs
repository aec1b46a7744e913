//! Invalidation messages exchanged between cache instances.
//!
//! Messages are published on a shared Redis channel whenever a process
//! mutates a cache entry. The wire form is stable JSON so that any
//! process built from this crate family (or a compatible implementation)
//! can interoperate: `{"instanceId": "...", "type": "EVICT",
//! "cacheName": "...", "key": "..."}`.

use serde::{Deserialize, Serialize};

use crate::instance::instance_id;

/// The kind of invalidation a message requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageKind {
    /// Drop a single key from the receiver's local tier.
    Evict,
    /// Drop every key of the named cache from the receiver's local tier.
    Clear,
}

/// A cross-instance cache invalidation message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheMessage {
    /// Identity of the process that published the message.
    pub instance_id: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    /// Name of the cache the message addresses.
    pub cache_name: String,
    /// Key to evict; absent for CLEAR messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

impl CacheMessage {
    /// Build an EVICT message for `(cache_name, key)` stamped with this
    /// process's identity.
    pub fn evict(cache_name: impl Into<String>, key: impl Into<String>) -> Self {
        Self::evict_from(instance_id(), cache_name, key)
    }

    /// Build a CLEAR message for `cache_name` stamped with this process's
    /// identity.
    pub fn clear(cache_name: impl Into<String>) -> Self {
        Self::clear_from(instance_id(), cache_name)
    }

    /// Build an EVICT message carrying an explicit publisher identity.
    pub fn evict_from(
        instance_id: impl Into<String>,
        cache_name: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            instance_id: instance_id.into(),
            kind: MessageKind::Evict,
            cache_name: cache_name.into(),
            key: Some(key.into()),
        }
    }

    /// Build a CLEAR message carrying an explicit publisher identity.
    pub fn clear_from(instance_id: impl Into<String>, cache_name: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            kind: MessageKind::Clear,
            cache_name: cache_name.into(),
            key: None,
        }
    }

    /// True iff the message was published by this process.
    pub fn is_from_current_instance(&self) -> bool {
        self.instance_id == instance_id()
    }
}
