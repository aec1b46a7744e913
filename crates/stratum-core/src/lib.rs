//! Core types for the stratum two-tier cache.
//!
//! This crate carries everything the cache engine and its collaborators
//! agree on: the error taxonomy, the stored-value wrapper with its
//! null sentinel, the cross-instance invalidation message, and the
//! per-process instance identity used to filter self-originated messages.

pub mod error;
pub mod instance;
pub mod message;
pub mod value;

pub use error::{CacheError, Result};
pub use instance::instance_id;
pub use message::{CacheMessage, MessageKind};
pub use value::{CachedValue, NULL_SENTINEL, decode_token, encode_token};
