use std::sync::Arc;

use thiserror::Error;

/// Error types for cache operations
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("failed to acquire cache lock for {cache}:{key}: too many concurrent requests")]
    LockContended { cache: String, key: String },

    #[error("failed to load value for key {key}")]
    ValueRetrieval {
        key: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("cached value cannot be deserialized as {expected}")]
    TypeMismatch {
        expected: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("redis pool error: {0}")]
    Pool(#[from] deadpool_redis::PoolError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("cache invalidation stream ended")]
    SubscriptionEnded,

    /// Error shared with other callers coalesced onto the same load.
    #[error("{0}")]
    Coalesced(Arc<CacheError>),
}

impl CacheError {
    /// Create a new LockContended error
    pub fn lock_contended(cache: impl Into<String>, key: impl Into<String>) -> Self {
        Self::LockContended {
            cache: cache.into(),
            key: key.into(),
        }
    }

    /// Create a new ValueRetrieval error wrapping a loader failure
    pub fn value_retrieval(
        key: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::ValueRetrieval {
            key: key.into(),
            source: source.into(),
        }
    }

    /// Create a new TypeMismatch error for the requested type `T`
    pub fn type_mismatch<T>(source: serde_json::Error) -> Self {
        Self::TypeMismatch {
            expected: std::any::type_name::<T>(),
            source,
        }
    }

    /// Create a new Configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Unwrap an error shared between coalesced callers, keeping the
    /// original variant when this caller is the only one left holding it.
    pub fn coalesced(err: Arc<CacheError>) -> Self {
        match Arc::try_unwrap(err) {
            Ok(err) => err,
            Err(err) => Self::Coalesced(err),
        }
    }

    /// True when the error reports lock pressure, including when it was
    /// shared with this caller by a coalesced load.
    pub fn is_lock_contended(&self) -> bool {
        match self {
            Self::LockContended { .. } => true,
            Self::Coalesced(inner) => inner.is_lock_contended(),
            _ => false,
        }
    }

    /// True when the error wraps a loader failure.
    pub fn is_value_retrieval(&self) -> bool {
        match self {
            Self::ValueRetrieval { .. } => true,
            Self::Coalesced(inner) => inner.is_value_retrieval(),
            _ => false,
        }
    }
}

/// Convenience result type for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;
