//! Error types for rowcache operations

use std::time::Duration;
use thiserror::Error;

/// Key-value store errors.
///
/// These are never swallowed by the cache or lock layers: an unreachable
/// store surfaces to the caller, who decides whether to fail open or closed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Store backend error during {operation}: {reason}")]
    Backend { operation: String, reason: String },

    #[error("Store unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Wrong value type at key {key}: expected {expected}")]
    WrongType { key: String, expected: String },

    #[error("Invalid argument for {operation}: {reason}")]
    InvalidArgument { operation: String, reason: String },

    #[error("Store lock poisoned")]
    LockPoisoned,
}

impl StoreError {
    /// Build a backend error for the named store operation.
    pub fn backend(operation: impl Into<String>, reason: impl ToString) -> Self {
        StoreError::Backend {
            operation: operation.into(),
            reason: reason.to_string(),
        }
    }
}

/// Payload encoding and decoding errors.
///
/// Decode failures are reported to the cache layer, which treats them as a
/// miss; they are never raised to cache callers.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("Empty payload")]
    Empty,

    #[error("Unknown payload tag 0x{tag:02x}")]
    UnknownTag { tag: u8 },

    #[error("Truncated payload: expected {expected} bytes, got {got}")]
    Truncated { expected: usize, got: usize },

    #[error("Trailing bytes after payload: {extra}")]
    TrailingBytes { extra: usize },

    #[error("Payload too large: {len} bytes")]
    TooLarge { len: usize },

    #[error("Serialization failed: {reason}")]
    Serialization { reason: String },

    #[error("Deserialization failed: {reason}")]
    Deserialization { reason: String },
}

/// Distributed lock errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LockError {
    /// The queue-based lock's single bounded wait elapsed without a token.
    #[error("Timed out after {waited:?} waiting for lock {name}")]
    Timeout { name: String, waited: Duration },

    #[error("Deadline of {deadline:?} exceeded acquiring lock {name}")]
    DeadlineExceeded { name: String, deadline: Duration },
}

/// Caller-input validation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Incompatible options: {option_a} and {option_b}")]
    IncompatibleOptions { option_a: String, option_b: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all rowcache errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RowCacheError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Lock error: {0}")]
    Lock(#[from] LockError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for rowcache operations.
pub type RowCacheResult<T> = Result<T, RowCacheError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_display_backend() {
        let err = StoreError::backend("HINCRBY", "connection reset");
        let msg = format!("{}", err);
        assert!(msg.contains("HINCRBY"));
        assert!(msg.contains("connection reset"));
    }

    #[test]
    fn test_codec_error_display_unknown_tag() {
        let err = CodecError::UnknownTag { tag: 0x7f };
        let msg = format!("{}", err);
        assert!(msg.contains("0x7f"));
    }

    #[test]
    fn test_lock_error_display_timeout() {
        let err = LockError::Timeout {
            name: "orders".to_string(),
            waited: Duration::from_millis(250),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("orders"));
        assert!(msg.contains("250ms"));
    }

    #[test]
    fn test_config_error_display_invalid_value() {
        let err = ConfigError::InvalidValue {
            field: "key_prefix".to_string(),
            value: "a:b".to_string(),
            reason: "must not contain ':'".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("key_prefix"));
        assert!(msg.contains("a:b"));
        assert!(msg.contains("must not contain"));
    }

    #[test]
    fn test_row_cache_error_from_variants() {
        let store = RowCacheError::from(StoreError::LockPoisoned);
        assert!(matches!(store, RowCacheError::Store(_)));

        let codec = RowCacheError::from(CodecError::Empty);
        assert!(matches!(codec, RowCacheError::Codec(_)));

        let lock = RowCacheError::from(LockError::Timeout {
            name: "l".to_string(),
            waited: Duration::from_secs(1),
        });
        assert!(matches!(lock, RowCacheError::Lock(_)));

        let validation = RowCacheError::from(ValidationError::RequiredFieldMissing {
            field: "table".to_string(),
        });
        assert!(matches!(validation, RowCacheError::Validation(_)));

        let config = RowCacheError::from(ConfigError::MissingRequired {
            field: "redis_url".to_string(),
        });
        assert!(matches!(config, RowCacheError::Config(_)));
    }
}
