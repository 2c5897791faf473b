//! rowcache core - shared types
//!
//! Row identity, query fingerprints, mutation notifications, configuration
//! and errors. No store access lives here; every other crate depends on this.

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub mod config;
pub mod error;
pub mod fingerprint;
pub mod health;
pub mod identity;
pub mod mutation;
pub mod row;

pub use config::{HookFailurePolicy, RowCacheConfig};
pub use error::{
    CodecError, ConfigError, LockError, RowCacheError, RowCacheResult, StoreError,
    ValidationError,
};
pub use fingerprint::{CompiledQuery, CompiledStatement, QueryFingerprint};
pub use health::{HealthCheck, HealthStatus};
pub use identity::{DurationMs, HolderId, Timestamp};
pub use mutation::{KeyHistory, MutationEvent, MutationKind};
pub use row::{
    CacheableRow, PrimaryKey, RowKey, COMPOSITE_KEY_JOINER, ROW_KEY_SEPARATOR,
    ROW_LIST_DELIMITER,
};

// ============================================================================
// EXPIRY
// ============================================================================

/// Time-to-live of a stored entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Expiry {
    /// Entry stays until evicted.
    Never,
    /// Entry expires after the duration, with millisecond resolution.
    After(Duration),
}

impl Expiry {
    /// Seconds-based constructor where `0` means no expiry.
    pub fn from_secs(secs: u64) -> Self {
        if secs == 0 {
            Expiry::Never
        } else {
            Expiry::After(Duration::from_secs(secs))
        }
    }

    pub fn from_millis(ms: u64) -> Self {
        if ms == 0 {
            Expiry::Never
        } else {
            Expiry::After(Duration::from_millis(ms))
        }
    }

    /// Expiry in whole milliseconds, `None` when the entry never expires.
    ///
    /// Sub-millisecond durations round up to 1ms so an expiring entry never
    /// turns into a persistent one.
    pub fn as_millis(&self) -> Option<u64> {
        match self {
            Expiry::Never => None,
            Expiry::After(d) => Some(u64::try_from(d.as_millis()).unwrap_or(u64::MAX).max(1)),
        }
    }

    pub fn is_never(&self) -> bool {
        matches!(self, Expiry::Never)
    }
}

impl From<Duration> for Expiry {
    fn from(d: Duration) -> Self {
        Expiry::After(d)
    }
}
