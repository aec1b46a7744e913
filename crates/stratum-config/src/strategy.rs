//! Effective per-cache strategy.

use serde::{Deserialize, Serialize};

/// Behavior when the distributed load lock cannot be acquired within the
/// configured wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FallbackStrategy {
    /// Surface the pressure to the caller as a lock-contention error.
    Throw,
    /// Run the loader anyway and write the result back to the shared
    /// tier. Concurrent fallback loaders may overwrite each other; this
    /// trade favors availability over a single authoritative write.
    Fallback,
}

/// What `clear()` does to the shared tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClearMode {
    /// Drop only the local tier and broadcast; the shared tier drains
    /// through its TTLs. Cannot stampede the data source.
    Safe,
    /// Delete the whole shared hash as well.
    Full,
}

/// The fully resolved policy for one named cache. Every field is
/// concrete; unset overrides have already been filled from the global
/// defaults.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CacheStrategy {
    /// Base TTL for real values in the shared tier, before randomization.
    pub remote_ttl_ms: u64,
    /// Write-TTL for local entries.
    pub local_ttl_ms: u64,
    /// Maximum number of local entries.
    pub local_max_size: u64,
    pub fallback_strategy: FallbackStrategy,
    pub clear_mode: ClearMode,
}
