//! Shared cache context.
//!
//! A [`CacheContext`] bundles the store handle with the validated
//! configuration and the result cache counters. It is cheap to clone and is
//! the single thing threaded through locks, the result cache, the
//! invalidation bridge and the query facade.

use std::sync::Arc;
use std::time::Instant;

use rowcache_core::{
    Expiry, HealthCheck, QueryFingerprint, RowCacheConfig, RowCacheResult, ROW_KEY_SEPARATOR,
};
use tracing::warn;

use crate::cache::stats::StatsCounters;
use crate::cache::{CacheStats, ResultCache};
use crate::invalidation::InvalidationBridge;
use crate::lock::{QueueLock, ReentrantLock};
use crate::query::QueryCache;
use crate::store::{escape_glob, KeyValueStore};

const HEALTH_COMPONENT: &str = "rowcache-store";

struct ContextInner<S> {
    store: S,
    config: RowCacheConfig,
    stats: StatsCounters,
}

/// Store handle plus configuration, shared by every cache component.
pub struct CacheContext<S> {
    inner: Arc<ContextInner<S>>,
}

impl<S> Clone for CacheContext<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S> std::fmt::Debug for CacheContext<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheContext")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl<S: KeyValueStore> CacheContext<S> {
    /// Build a context after validating `config`.
    pub fn new(store: S, config: RowCacheConfig) -> RowCacheResult<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(ContextInner {
                store,
                config,
                stats: StatsCounters::default(),
            }),
        })
    }

    pub fn store(&self) -> &S {
        &self.inner.store
    }

    pub fn config(&self) -> &RowCacheConfig {
        &self.inner.config
    }

    pub fn key_prefix(&self) -> &str {
        &self.inner.config.key_prefix
    }

    pub fn default_ttl(&self) -> Expiry {
        self.inner.config.default_ttl
    }

    /// `{prefix}:{table}:{fingerprint}`
    pub fn composite_key(&self, table: &str, fingerprint: &QueryFingerprint) -> String {
        format!(
            "{}{sep}{}{sep}{}",
            self.key_prefix(),
            table,
            fingerprint,
            sep = ROW_KEY_SEPARATOR
        )
    }

    /// Scan pattern matching every composite entry of `table`.
    pub fn table_pattern(&self, table: &str) -> String {
        format!(
            "{}{sep}{}{sep}*",
            escape_glob(self.key_prefix()),
            escape_glob(table),
            sep = ROW_KEY_SEPARATOR
        )
    }

    pub(crate) fn stats_counters(&self) -> &StatsCounters {
        &self.inner.stats
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.stats.snapshot()
    }

    pub fn result_cache(&self) -> ResultCache<S> {
        ResultCache::new(self.clone())
    }

    pub fn query_cache(&self) -> QueryCache<S> {
        QueryCache::new(self.clone())
    }

    pub fn invalidation_bridge(&self) -> InvalidationBridge<S> {
        InvalidationBridge::new(self.clone())
    }

    /// Reentrant lock on `name` with a fresh holder identity.
    pub fn lock(&self, name: impl Into<String>) -> ReentrantLock<S> {
        ReentrantLock::new(self.clone(), name)
    }

    /// Queue-based lock on `name`.
    pub fn queue_lock(&self, name: impl Into<String>) -> QueueLock<S> {
        QueueLock::new(self.clone(), name)
    }

    /// Ping the store and report its health.
    pub async fn health(&self) -> HealthCheck {
        let started = Instant::now();
        match self.store().ping().await {
            Ok(()) => HealthCheck::from_latency(HEALTH_COMPONENT, started.elapsed())
                .with_detail("key_prefix", self.key_prefix()),
            Err(e) => {
                warn!(error = %e, "Store health ping failed");
                HealthCheck::unhealthy(HEALTH_COMPONENT, e.to_string())
                    .with_latency(started.elapsed())
            }
        }
    }
}

impl<S: KeyValueStore + Default> CacheContext<S> {
    /// Context over a default-constructed store with default configuration.
    pub fn with_defaults() -> Self {
        Self {
            inner: Arc::new(ContextInner {
                store: S::default(),
                config: RowCacheConfig::default(),
                stats: StatsCounters::default(),
            }),
        }
    }
}

#[cfg(feature = "redis")]
impl CacheContext<crate::store::RedisStore> {
    /// Connect to the store named by `config.redis_url`.
    pub async fn connect(config: RowCacheConfig) -> RowCacheResult<Self> {
        let url = config.redis_url.clone().ok_or_else(|| {
            rowcache_core::ConfigError::MissingRequired {
                field: "redis_url".to_string(),
            }
        })?;
        let store = crate::store::RedisStore::connect(&url).await?;
        Self::new(store, config)
    }
}
