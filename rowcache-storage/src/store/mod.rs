//! Key-value store adapter.
//!
//! Every cache and lock operation goes through [`KeyValueStore`], a thin
//! pass-through to the primitives a Redis-compatible store offers. The
//! adapter adds no policy: expiry, key layout and retry belong to the callers.
//!
//! Two implementations ship with the crate:
//!
//! - [`InMemoryStore`]: single-process store with lazy expiry, used by tests
//!   and embedded deployments
//! - `RedisStore` (feature `redis`): shared store on a connection manager

use async_trait::async_trait;
use rowcache_core::{DurationMs, Expiry, RowCacheResult};
use std::time::Duration;

pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;

pub use memory::InMemoryStore;
#[cfg(feature = "redis")]
pub use self::redis::RedisStore;

/// Remaining lifetime of a key, as reported by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTtl {
    /// Key does not exist.
    Missing,
    /// Key exists without an expiry.
    Persistent,
    /// Key expires in this many milliseconds.
    Millis(DurationMs),
}

impl KeyTtl {
    /// Remaining milliseconds, with missing and persistent keys reported as 0.
    pub fn remaining_ms(&self) -> DurationMs {
        match self {
            KeyTtl::Millis(ms) => *ms,
            KeyTtl::Missing | KeyTtl::Persistent => 0,
        }
    }

    /// Decode the store's integer reply (`-2` missing, `-1` persistent).
    pub fn from_reply(reply: i64) -> Self {
        match reply {
            -2 => KeyTtl::Missing,
            r if r < 0 => KeyTtl::Persistent,
            r => KeyTtl::Millis(r as u64),
        }
    }
}

/// What releasing one hold on a lock record found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoldRelease {
    /// No record exists.
    Missing,
    /// The record has no entry for the holder; nothing changed.
    NotHeld,
    /// The holder's count after the decrement. At zero the record is gone.
    Remaining(u64),
}

/// Primitive operations of the shared key-value store.
///
/// Implementations must be safe to share between tasks; every method is a
/// single store round-trip and atomic on the store side.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn exists(&self, key: &str) -> RowCacheResult<bool>;

    async fn get(&self, key: &str) -> RowCacheResult<Option<Vec<u8>>>;

    /// Write a value. `Expiry::Never` clears any previous expiry.
    async fn set(&self, key: &str, value: &[u8], expiry: Expiry) -> RowCacheResult<()>;

    /// Write only if the key is absent. Returns whether the write happened.
    async fn set_nx(&self, key: &str, value: &[u8]) -> RowCacheResult<bool>;

    /// Write a value and return the previous one.
    async fn getset(&self, key: &str, value: &[u8]) -> RowCacheResult<Option<Vec<u8>>>;

    /// Delete keys, returning how many existed.
    async fn delete(&self, keys: &[String]) -> RowCacheResult<u64>;

    async fn hset(&self, key: &str, field: &str, value: i64) -> RowCacheResult<()>;

    async fn hget(&self, key: &str, field: &str) -> RowCacheResult<Option<i64>>;

    async fn hexists(&self, key: &str, field: &str) -> RowCacheResult<bool>;

    /// Add `delta` to a hash field (created at 0) and return the new value.
    async fn hincr_by(&self, key: &str, field: &str, delta: i64) -> RowCacheResult<i64>;

    /// Create a hash holding one field with a millisecond expiry, only if the
    /// key does not exist. Returns whether it was created.
    async fn hash_init(
        &self,
        key: &str,
        field: &str,
        value: i64,
        ttl_ms: DurationMs,
    ) -> RowCacheResult<bool>;

    /// Increment `field` and refresh the key's expiry, only if the field is
    /// already present. Returns the new count, `None` when the key or field
    /// is absent. Check and increment are one atomic step.
    async fn lock_reenter(
        &self,
        key: &str,
        field: &str,
        ttl_ms: DurationMs,
    ) -> RowCacheResult<Option<i64>>;

    /// Decrement `field` if present, as one atomic step: while the count stays
    /// positive the expiry is refreshed, at zero the key is deleted.
    async fn lock_release(
        &self,
        key: &str,
        field: &str,
        ttl_ms: DurationMs,
    ) -> RowCacheResult<HoldRelease>;

    /// Set a millisecond expiry. Returns false when the key does not exist.
    async fn pexpire(&self, key: &str, ttl_ms: DurationMs) -> RowCacheResult<bool>;

    async fn pttl(&self, key: &str) -> RowCacheResult<KeyTtl>;

    /// Every key matching a glob pattern (`*`, `?`, `[..]`, `\` escapes).
    async fn scan(&self, pattern: &str) -> RowCacheResult<Vec<String>>;

    /// Append to a list, returning its new length.
    async fn rpush(&self, key: &str, value: &[u8]) -> RowCacheResult<u64>;

    /// Pop the head of a list, waiting up to `timeout` for one to arrive.
    async fn blpop(&self, key: &str, timeout: Duration) -> RowCacheResult<Option<Vec<u8>>>;

    /// Round-trip liveness check.
    async fn ping(&self) -> RowCacheResult<()>;
}

/// Escape glob metacharacters so `raw` matches only itself in a scan pattern.
pub fn escape_glob(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if matches!(ch, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_ttl_from_reply() {
        assert_eq!(KeyTtl::from_reply(-2), KeyTtl::Missing);
        assert_eq!(KeyTtl::from_reply(-1), KeyTtl::Persistent);
        assert_eq!(KeyTtl::from_reply(1500), KeyTtl::Millis(1500));
        assert_eq!(KeyTtl::Persistent.remaining_ms(), 0);
    }

    #[test]
    fn test_escape_glob() {
        assert_eq!(escape_glob("user"), "user");
        assert_eq!(escape_glob("a*b?[c]"), "a\\*b\\?\\[c\\]");
        assert_eq!(escape_glob("x\\y"), "x\\\\y");
    }
}
