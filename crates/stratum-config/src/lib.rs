//! Configuration management for the stratum two-tier cache.
//!
//! The configuration is a tree of global defaults plus per-cache
//! overrides. Consumers never read the tree directly on the hot path;
//! instead [`CacheConfig::strategy_for`] materializes a fully populated
//! [`CacheStrategy`] for any cache name by overlaying the overrides on
//! the defaults.

pub mod settings;
pub mod strategy;

pub use settings::{CacheConfig, CacheOverrides, LocalConfig, RemoteConfig};
pub use strategy::{CacheStrategy, ClearMode, FallbackStrategy};

/// Error types for configuration operations
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load cache configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid cache configuration: {0}")]
    Validation(String),
}

impl ConfigError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}

/// Result type for configuration operations
pub type Result<T> = std::result::Result<T, ConfigError>;
