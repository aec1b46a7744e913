//! Configuration tree with serde defaults.
//!
//! Loadable from a `[cache.tiered]` TOML table. Every field has a
//! default so an empty tree is a valid, working configuration.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::strategy::{CacheStrategy, ClearMode, FallbackStrategy};
use crate::{ConfigError, Result};

/// Global cache configuration with per-cache overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Whether the tiered cache should be wired in at all. Consulted by
    /// embedders at composition time.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Prefix prepended to distributed lock keys.
    #[serde(default = "default_cache_prefix")]
    pub cache_prefix: String,

    /// Predefined cache names. Non-empty means static mode: the manager
    /// pre-creates these caches and refuses unknown names. Empty means
    /// dynamic mode with lazy creation.
    #[serde(default)]
    pub cache_names: Vec<String>,

    #[serde(default)]
    pub local: LocalConfig,

    #[serde(default)]
    pub remote: RemoteConfig,

    #[serde(default = "default_fallback_strategy")]
    pub default_fallback_strategy: FallbackStrategy,

    #[serde(default = "default_clear_mode")]
    pub default_clear_mode: ClearMode,

    /// Per-cache overrides keyed by cache name.
    #[serde(default)]
    pub caches: HashMap<String, CacheOverrides>,
}

/// Defaults for the in-process tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalConfig {
    /// Maximum number of entries per cache.
    #[serde(default = "default_local_maximum_size")]
    pub maximum_size: u64,

    /// Write-TTL in milliseconds.
    #[serde(default = "default_local_expire_after_write_ms")]
    pub expire_after_write_ms: u64,
}

/// Defaults for the shared Redis tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Base TTL for real values, in milliseconds.
    #[serde(default = "default_remote_ttl_ms")]
    pub default_ttl_ms: u64,

    /// Fixed TTL for null-sentinel entries, in milliseconds. Never
    /// randomized.
    #[serde(default = "default_null_value_ttl_ms")]
    pub null_value_ttl_ms: u64,

    /// Randomization factor applied to real-value TTLs, in `[0, 1]`.
    /// Spreads expirations to avoid mass simultaneous reloads.
    #[serde(default = "default_ttl_random_factor")]
    pub ttl_random_factor: f64,

    /// How long a loader waits for the distributed lock.
    #[serde(default = "default_lock_wait_time_ms")]
    pub lock_wait_time_ms: u64,
}

/// Per-cache overrides; unset fields inherit the global defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheOverrides {
    pub remote_ttl_ms: Option<u64>,
    pub local_ttl_ms: Option<u64>,
    pub local_max_size: Option<u64>,
    pub fallback_strategy: Option<FallbackStrategy>,
    pub clear_mode: Option<ClearMode>,
}

fn default_enabled() -> bool {
    true
}

fn default_cache_prefix() -> String {
    "cache:".to_string()
}

fn default_local_maximum_size() -> u64 {
    1000
}

fn default_local_expire_after_write_ms() -> u64 {
    5 * 60 * 1000
}

fn default_remote_ttl_ms() -> u64 {
    60 * 60 * 1000
}

fn default_null_value_ttl_ms() -> u64 {
    60 * 1000
}

fn default_ttl_random_factor() -> f64 {
    0.1
}

fn default_lock_wait_time_ms() -> u64 {
    500
}

fn default_fallback_strategy() -> FallbackStrategy {
    FallbackStrategy::Throw
}

fn default_clear_mode() -> ClearMode {
    ClearMode::Safe
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            cache_prefix: default_cache_prefix(),
            cache_names: Vec::new(),
            local: LocalConfig::default(),
            remote: RemoteConfig::default(),
            default_fallback_strategy: default_fallback_strategy(),
            default_clear_mode: default_clear_mode(),
            caches: HashMap::new(),
        }
    }
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            maximum_size: default_local_maximum_size(),
            expire_after_write_ms: default_local_expire_after_write_ms(),
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            default_ttl_ms: default_remote_ttl_ms(),
            null_value_ttl_ms: default_null_value_ttl_ms(),
            ttl_random_factor: default_ttl_random_factor(),
            lock_wait_time_ms: default_lock_wait_time_ms(),
        }
    }
}

impl CacheConfig {
    /// Resolve the effective strategy for `name`.
    ///
    /// Starts from the per-name overrides (if any) and fills every unset
    /// field from the global defaults. Pure; safe to call repeatedly.
    pub fn strategy_for(&self, name: &str) -> CacheStrategy {
        let overrides = self.caches.get(name);
        CacheStrategy {
            remote_ttl_ms: overrides
                .and_then(|o| o.remote_ttl_ms)
                .unwrap_or(self.remote.default_ttl_ms),
            local_ttl_ms: overrides
                .and_then(|o| o.local_ttl_ms)
                .unwrap_or(self.local.expire_after_write_ms),
            local_max_size: overrides
                .and_then(|o| o.local_max_size)
                .unwrap_or(self.local.maximum_size),
            fallback_strategy: overrides
                .and_then(|o| o.fallback_strategy)
                .unwrap_or(self.default_fallback_strategy),
            clear_mode: overrides
                .and_then(|o| o.clear_mode)
                .unwrap_or(self.default_clear_mode),
        }
    }

    /// Load the `[cache.tiered]` table from a configuration file. A file
    /// without that table yields the defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .build()?;

        let config = match settings.get::<Self>("cache.tiered") {
            Ok(config) => config,
            Err(config::ConfigError::NotFound(_)) => Self::default(),
            Err(e) => return Err(e.into()),
        };
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.remote.ttl_random_factor) {
            return Err(ConfigError::validation(format!(
                "remote.ttl_random_factor must be within [0, 1], got {}",
                self.remote.ttl_random_factor
            )));
        }
        if self.remote.default_ttl_ms == 0 {
            return Err(ConfigError::validation(
                "remote.default_ttl_ms must be positive",
            ));
        }
        if self.remote.null_value_ttl_ms == 0 {
            return Err(ConfigError::validation(
                "remote.null_value_ttl_ms must be positive",
            ));
        }
        if self.local.expire_after_write_ms == 0 {
            return Err(ConfigError::validation(
                "local.expire_after_write_ms must be positive",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = CacheConfig::default();
        assert!(config.enabled);
        assert_eq!(config.cache_prefix, "cache:");
        assert!(config.cache_names.is_empty());
        assert_eq!(config.local.maximum_size, 1000);
        assert_eq!(config.local.expire_after_write_ms, 300_000);
        assert_eq!(config.remote.default_ttl_ms, 3_600_000);
        assert_eq!(config.remote.null_value_ttl_ms, 60_000);
        assert!((config.remote.ttl_random_factor - 0.1).abs() < f64::EPSILON);
        assert_eq!(config.remote.lock_wait_time_ms, 500);
        assert_eq!(config.default_fallback_strategy, FallbackStrategy::Throw);
        assert_eq!(config.default_clear_mode, ClearMode::Safe);
    }

    #[test]
    fn test_strategy_without_overrides_inherits_globals() {
        let config = CacheConfig::default();
        let strategy = config.strategy_for("anything");
        assert_eq!(strategy.remote_ttl_ms, 3_600_000);
        assert_eq!(strategy.local_ttl_ms, 300_000);
        assert_eq!(strategy.local_max_size, 1000);
        assert_eq!(strategy.fallback_strategy, FallbackStrategy::Throw);
        assert_eq!(strategy.clear_mode, ClearMode::Safe);
    }

    #[test]
    fn test_strategy_overlay_is_field_wise() {
        let mut config = CacheConfig::default();
        config.caches.insert(
            "user_info".to_string(),
            CacheOverrides {
                remote_ttl_ms: Some(10_000),
                clear_mode: Some(ClearMode::Full),
                ..Default::default()
            },
        );

        let strategy = config.strategy_for("user_info");
        assert_eq!(strategy.remote_ttl_ms, 10_000);
        assert_eq!(strategy.clear_mode, ClearMode::Full);
        // unset fields still inherit
        assert_eq!(strategy.local_ttl_ms, 300_000);
        assert_eq!(strategy.local_max_size, 1000);
        assert_eq!(strategy.fallback_strategy, FallbackStrategy::Throw);

        // other names are untouched
        let other = config.strategy_for("orders");
        assert_eq!(other.remote_ttl_ms, 3_600_000);
        assert_eq!(other.clear_mode, ClearMode::Safe);
    }

    #[test]
    fn test_parse_from_toml() {
        let raw = r#"
            enabled = true
            cache_prefix = "myapp:"
            cache_names = ["user_info", "sys_config"]

            [local]
            maximum_size = 500
            expire_after_write_ms = 60000

            [remote]
            default_ttl_ms = 120000
            ttl_random_factor = 0.2

            [caches.user_info]
            remote_ttl_ms = 30000
            fallback_strategy = "FALLBACK"
        "#;
        let config: CacheConfig = toml::from_str(raw).unwrap();
        assert_eq!(config.cache_prefix, "myapp:");
        assert_eq!(config.cache_names, vec!["user_info", "sys_config"]);
        assert_eq!(config.local.maximum_size, 500);
        assert_eq!(config.remote.default_ttl_ms, 120_000);
        // unset remote fields keep their defaults
        assert_eq!(config.remote.lock_wait_time_ms, 500);

        let strategy = config.strategy_for("user_info");
        assert_eq!(strategy.remote_ttl_ms, 30_000);
        assert_eq!(strategy.fallback_strategy, FallbackStrategy::Fallback);
    }

    #[test]
    fn test_validate_rejects_out_of_range_factor() {
        let mut config = CacheConfig::default();
        config.remote.ttl_random_factor = 1.5;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn test_validate_rejects_zero_ttls() {
        let mut config = CacheConfig::default();
        config.remote.default_ttl_ms = 0;
        assert!(config.validate().is_err());

        let mut config = CacheConfig::default();
        config.remote.null_value_ttl_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file_reads_nested_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.toml");
        std::fs::write(
            &path,
            r#"
                [cache.tiered]
                cache_prefix = "svc:"

                [cache.tiered.remote]
                lock_wait_time_ms = 250
            "#,
        )
        .unwrap();

        let config = CacheConfig::from_file(&path).unwrap();
        assert_eq!(config.cache_prefix, "svc:");
        assert_eq!(config.remote.lock_wait_time_ms, 250);
        assert_eq!(config.remote.default_ttl_ms, 3_600_000);
    }

    #[test]
    fn test_from_file_without_table_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.toml");
        std::fs::write(&path, "[other]\nkey = 1\n").unwrap();

        let config = CacheConfig::from_file(&path).unwrap();
        assert_eq!(config.cache_prefix, "cache:");
    }
}
