//! Configuration types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{ConfigError, RowCacheError, RowCacheResult};
use crate::Expiry;

/// Characters a key prefix may not contain: the key separator and glob syntax
/// would make table sweeps match keys outside the namespace.
const RESERVED_PREFIX_CHARS: &[char] = &[':', '*', '?', '[', ']', '|'];

/// What an invalidation hook does when the store rejects an eviction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum HookFailurePolicy {
    /// Log the failure and let the write proceed.
    #[default]
    BestEffort,
    /// Return the store error to the mutation path.
    Propagate,
}

impl fmt::Display for HookFailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookFailurePolicy::BestEffort => f.write_str("best_effort"),
            HookFailurePolicy::Propagate => f.write_str("propagate"),
        }
    }
}

impl FromStr for HookFailurePolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "best_effort" | "best-effort" => Ok(HookFailurePolicy::BestEffort),
            "propagate" => Ok(HookFailurePolicy::Propagate),
            _ => Err(ConfigError::InvalidValue {
                field: "hook_failure".to_string(),
                value: s.to_string(),
                reason: "expected best_effort or propagate".to_string(),
            }),
        }
    }
}

/// Master configuration for a cache context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowCacheConfig {
    /// Namespace prefix for composite query entries.
    pub key_prefix: String,
    /// TTL applied when a caller does not pass one.
    pub default_ttl: Expiry,
    /// Expiry of a lock record, refreshed on every acquire and partial release.
    pub lock_timeout: Duration,
    /// Shortest sleep between lock polls.
    pub lock_poll_floor: Duration,
    /// Single bounded wait of the queue-based lock.
    pub queue_lock_wait: Duration,
    /// Behaviour of invalidation hooks on store failure.
    pub hook_failure: HookFailurePolicy,
    /// Connection URL for the Redis store, when one is used.
    pub redis_url: Option<String>,
}

impl Default for RowCacheConfig {
    fn default() -> Self {
        Self {
            key_prefix: "rowcache".to_string(),
            default_ttl: Expiry::After(Duration::from_secs(300)),
            lock_timeout: Duration::from_secs(10),
            lock_poll_floor: Duration::from_millis(10),
            queue_lock_wait: Duration::from_secs(5),
            hook_failure: HookFailurePolicy::BestEffort,
            redis_url: None,
        }
    }
}

impl RowCacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create from environment variables with fallback to defaults.
    ///
    /// Environment variables:
    /// - `ROWCACHE_KEY_PREFIX`: Composite entry namespace (default: rowcache)
    /// - `ROWCACHE_DEFAULT_TTL_SECS`: Default TTL, `0` for no expiry (default: 300)
    /// - `ROWCACHE_LOCK_TIMEOUT_MS`: Lock record expiry (default: 10000)
    /// - `ROWCACHE_LOCK_POLL_FLOOR_MS`: Minimum poll sleep (default: 10)
    /// - `ROWCACHE_QUEUE_LOCK_WAIT_MS`: Queue lock wait (default: 5000)
    /// - `ROWCACHE_HOOK_FAILURE`: `best_effort` or `propagate` (default: best_effort)
    /// - `ROWCACHE_REDIS_URL`: Redis connection URL (default: unset)
    pub fn from_env() -> RowCacheResult<Self> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from a variable lookup, as [`from_env`](Self::from_env) does
    /// over the process environment. Unparsable values are errors, not
    /// defaults.
    pub fn from_lookup<F>(lookup: F) -> RowCacheResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let hook_failure = match lookup("ROWCACHE_HOOK_FAILURE") {
            Some(raw) => raw.parse()?,
            None => defaults.hook_failure,
        };
        let default_ttl = match parse_u64(&lookup, "ROWCACHE_DEFAULT_TTL_SECS")? {
            Some(secs) => Expiry::from_secs(secs),
            None => defaults.default_ttl,
        };
        let millis = |var: &str, fallback: Duration| -> RowCacheResult<Duration> {
            Ok(parse_u64(&lookup, var)?
                .map(Duration::from_millis)
                .unwrap_or(fallback))
        };

        let config = Self {
            key_prefix: lookup("ROWCACHE_KEY_PREFIX").unwrap_or(defaults.key_prefix),
            default_ttl,
            lock_timeout: millis("ROWCACHE_LOCK_TIMEOUT_MS", defaults.lock_timeout)?,
            lock_poll_floor: millis("ROWCACHE_LOCK_POLL_FLOOR_MS", defaults.lock_poll_floor)?,
            queue_lock_wait: millis("ROWCACHE_QUEUE_LOCK_WAIT_MS", defaults.queue_lock_wait)?,
            hook_failure,
            redis_url: lookup("ROWCACHE_REDIS_URL"),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn with_default_ttl(mut self, ttl: Expiry) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn with_lock_poll_floor(mut self, floor: Duration) -> Self {
        self.lock_poll_floor = floor;
        self
    }

    pub fn with_queue_lock_wait(mut self, wait: Duration) -> Self {
        self.queue_lock_wait = wait;
        self
    }

    pub fn with_hook_failure(mut self, policy: HookFailurePolicy) -> Self {
        self.hook_failure = policy;
        self
    }

    pub fn with_redis_url(mut self, url: impl Into<String>) -> Self {
        self.redis_url = Some(url.into());
        self
    }

    /// Validate the configuration.
    ///
    /// Validates:
    /// - key_prefix is non-empty and free of separator/glob characters
    /// - default_ttl, when finite, is at least one millisecond
    /// - lock_timeout, lock_poll_floor and queue_lock_wait are positive
    pub fn validate(&self) -> RowCacheResult<()> {
        if self.key_prefix.is_empty() {
            return Err(invalid("key_prefix", "", "key_prefix must not be empty"));
        }
        if self.key_prefix.contains(RESERVED_PREFIX_CHARS) {
            return Err(invalid(
                "key_prefix",
                &self.key_prefix,
                "key_prefix must not contain ':', '|' or glob characters",
            ));
        }

        if let Expiry::After(ttl) = self.default_ttl {
            if ttl.as_millis() == 0 {
                return Err(invalid(
                    "default_ttl",
                    &format!("{:?}", ttl),
                    "default_ttl must be at least 1ms; use Expiry::Never for no expiry",
                ));
            }
        }

        for (field, value) in [
            ("lock_timeout", self.lock_timeout),
            ("lock_poll_floor", self.lock_poll_floor),
            ("queue_lock_wait", self.queue_lock_wait),
        ] {
            if value.as_millis() == 0 {
                return Err(invalid(
                    field,
                    &format!("{:?}", value),
                    &format!("{} must be at least 1ms", field),
                ));
            }
        }

        Ok(())
    }
}

fn parse_u64<F>(lookup: &F, var: &str) -> RowCacheResult<Option<u64>>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|e| invalid(var, &raw, &e.to_string())),
    }
}

fn invalid(field: &str, value: &str, reason: &str) -> RowCacheError {
    RowCacheError::Config(ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    })
}
