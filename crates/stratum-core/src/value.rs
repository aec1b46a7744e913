//! Stored-value tokens and the null sentinel.
//!
//! Both tiers store the same raw token: the JSON serialization of the
//! application value, or the fixed sentinel string recording a confirmed
//! absence in the source of truth. Caching the absence keeps repeated
//! lookups for permanently missing keys off the loader.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::CacheError;

/// Token stored in place of a real value when the loader confirmed the
/// key is absent. Part of the wire format; must not change.
pub const NULL_SENTINEL: &str = "@@TIERED_CACHE_NULL_VALUE@@";

/// Serialize an application value (or its confirmed absence) into the
/// token form stored in both tiers.
pub fn encode_token(value: Option<&Value>) -> Result<String, CacheError> {
    match value {
        Some(value) => Ok(serde_json::to_string(value)?),
        None => Ok(NULL_SENTINEL.to_string()),
    }
}

/// Decode a stored token back into an application value. The sentinel
/// decodes to `None`.
pub fn decode_token(token: &str) -> Result<Option<Value>, CacheError> {
    if token == NULL_SENTINEL {
        return Ok(None);
    }
    Ok(Some(serde_json::from_str(token)?))
}

/// A value observed in the cache.
///
/// Distinguishes "present with a value", "present as a cached null"
/// (sentinel) and, through `Option<CachedValue>` at the call sites,
/// "absent from the cache entirely".
#[derive(Debug, Clone, PartialEq)]
pub struct CachedValue {
    inner: Option<Value>,
}

impl CachedValue {
    /// Wrap a real value.
    pub fn of(value: Value) -> Self {
        Self { inner: Some(value) }
    }

    /// The cached-null wrapper produced by a sentinel entry.
    pub fn null() -> Self {
        Self { inner: None }
    }

    /// Decode a stored token into a wrapper.
    pub fn from_token(token: &str) -> Result<Self, CacheError> {
        Ok(Self {
            inner: decode_token(token)?,
        })
    }

    /// True when this entry records a confirmed absence.
    pub fn is_null(&self) -> bool {
        self.inner.is_none()
    }

    /// Borrow the inner value, if any.
    pub fn get(&self) -> Option<&Value> {
        self.inner.as_ref()
    }

    /// Consume the wrapper, yielding the inner value.
    pub fn into_inner(self) -> Option<Value> {
        self.inner
    }

    /// Deserialize the inner value as `T`. A cached null yields
    /// `Ok(None)`; a value of the wrong shape surfaces a type-mismatch
    /// error rather than a silent miss.
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<Option<T>, CacheError> {
        match &self.inner {
            None => Ok(None),
            Some(value) => serde_json::from_value(value.clone())
                .map(Some)
                .map_err(CacheError::type_mismatch::<T>),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize, PartialEq)]
    struct User {
        id: String,
        name: String,
    }

    #[test]
    fn test_encode_real_value() {
        let value = json!({"id": "7", "name": "ada"});
        let token = encode_token(Some(&value)).unwrap();
        assert_eq!(decode_token(&token).unwrap(), Some(value));
    }

    #[test]
    fn test_encode_none_is_sentinel() {
        let token = encode_token(None).unwrap();
        assert_eq!(token, NULL_SENTINEL);
        assert_eq!(decode_token(&token).unwrap(), None);
    }

    #[test]
    fn test_corrupt_token_is_an_error() {
        assert!(decode_token("not json").is_err());
    }

    #[test]
    fn test_wrapper_distinguishes_null_from_value() {
        let null = CachedValue::from_token(NULL_SENTINEL).unwrap();
        assert!(null.is_null());
        assert!(null.get().is_none());

        let real = CachedValue::from_token("\"hello\"").unwrap();
        assert!(!real.is_null());
        assert_eq!(real.get(), Some(&json!("hello")));
    }

    #[test]
    fn test_typed_deserialize() {
        let wrapper = CachedValue::of(json!({"id": "7", "name": "ada"}));
        let user: Option<User> = wrapper.deserialize().unwrap();
        assert_eq!(
            user,
            Some(User {
                id: "7".to_string(),
                name: "ada".to_string()
            })
        );
    }

    #[test]
    fn test_typed_deserialize_null() {
        let wrapper = CachedValue::null();
        let user: Option<User> = wrapper.deserialize().unwrap();
        assert!(user.is_none());
    }

    #[test]
    fn test_typed_deserialize_mismatch() {
        let wrapper = CachedValue::of(json!("just a string"));
        let err = wrapper.deserialize::<User>().unwrap_err();
        assert!(matches!(err, CacheError::TypeMismatch { .. }));
    }
}
