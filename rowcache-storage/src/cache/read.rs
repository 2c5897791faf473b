//! Provenance of a facade read.

use chrono::Utc;
use rowcache_core::{QueryFingerprint, Timestamp};

/// Value returned by the query facade, tagged with where it came from.
///
/// A read either hit the cache or ran the caller's materializer (and stored
/// the result). Callers that care, such as metrics or tests asserting the
/// materializer did not run, inspect [`CacheRead::was_cache_hit`]; everyone
/// else calls [`CacheRead::into_value`].
#[derive(Debug, Clone)]
pub struct CacheRead<T> {
    value: T,
    fingerprint: QueryFingerprint,
    read_at: Timestamp,
    was_cache_hit: bool,
}

impl<T> CacheRead<T> {
    /// A value served from the cache.
    pub fn from_cache(value: T, fingerprint: QueryFingerprint) -> Self {
        Self {
            value,
            fingerprint,
            read_at: Utc::now(),
            was_cache_hit: true,
        }
    }

    /// A value produced by the materializer and written back.
    pub fn from_materializer(value: T, fingerprint: QueryFingerprint) -> Self {
        Self {
            value,
            fingerprint,
            read_at: Utc::now(),
            was_cache_hit: false,
        }
    }

    pub fn into_value(self) -> T {
        self.value
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    /// Cache key segment the read was resolved under.
    pub fn fingerprint(&self) -> &QueryFingerprint {
        &self.fingerprint
    }

    pub fn read_at(&self) -> Timestamp {
        self.read_at
    }

    pub fn was_cache_hit(&self) -> bool {
        self.was_cache_hit
    }

    pub fn was_cache_miss(&self) -> bool {
        !self.was_cache_hit
    }

    pub fn map<U, F>(self, f: F) -> CacheRead<U>
    where
        F: FnOnce(T) -> U,
    {
        CacheRead {
            value: f(self.value),
            fingerprint: self.fingerprint,
            read_at: self.read_at,
            was_cache_hit: self.was_cache_hit,
        }
    }
}

impl<T> AsRef<T> for CacheRead<T> {
    fn as_ref(&self) -> &T {
        &self.value
    }
}
