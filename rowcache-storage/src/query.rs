//! Caching query facade.
//!
//! Wraps the result cache with query-level operations: derive the
//! fingerprint, check the cache, run the caller's materializer on a miss and
//! store what it returns.
//!
//! # Example
//!
//! ```ignore
//! let query = CompiledQuery::new("user", "SELECT * FROM user WHERE name = :n")
//!     .bind("n", "root");
//! let users: CacheRead<Vec<User>> = ctx
//!     .query_cache()
//!     .get_value(&query, &QueryOptions::default(), || async {
//!         db.load_users("root").await
//!     })
//!     .await?;
//! ```

use std::future::Future;

use rowcache_core::{
    CacheableRow, CompiledStatement, Expiry, QueryFingerprint, RowCacheResult, RowKey,
    ValidationError,
};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::cache::{CacheRead, ResultCache, RowSet};
use crate::context::CacheContext;
use crate::store::KeyValueStore;

/// Per-call cache options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryOptions {
    /// Explicit key segment used instead of the derived fingerprint.
    pub cache_key: Option<String>,
    /// TTL for stored results; the context default when unset.
    pub ttl: Option<Expiry>,
    /// Accept partial results on read and never populate.
    pub ignore_expiry: bool,
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cache_key(mut self, key: impl Into<String>) -> Self {
        self.cache_key = Some(key.into());
        self
    }

    pub fn with_ttl(mut self, ttl: Expiry) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn ignoring_expiry(mut self) -> Self {
        self.ignore_expiry = true;
        self
    }
}

/// Query-level cache operations.
pub struct QueryCache<S> {
    cache: ResultCache<S>,
}

impl<S> Clone for QueryCache<S> {
    fn clone(&self) -> Self {
        Self {
            cache: self.cache.clone(),
        }
    }
}

impl<S: KeyValueStore> QueryCache<S> {
    pub fn new(ctx: CacheContext<S>) -> Self {
        Self {
            cache: ResultCache::new(ctx),
        }
    }

    pub fn result_cache(&self) -> &ResultCache<S> {
        &self.cache
    }

    /// Fingerprint of the query's statement and bound parameters.
    pub fn fingerprint_of<Q: CompiledStatement + ?Sized>(&self, query: &Q) -> QueryFingerprint {
        QueryFingerprint::of(query)
    }

    /// Key segment the query is cached under: the override if given, else
    /// the fingerprint.
    pub fn resolve_key<Q: CompiledStatement + ?Sized>(
        &self,
        query: &Q,
        options: &QueryOptions,
    ) -> RowCacheResult<QueryFingerprint> {
        match &options.cache_key {
            Some(key) => Ok(QueryFingerprint::from_override(key.clone())?),
            None => Ok(self.fingerprint_of(query)),
        }
    }

    fn ttl(&self, options: &QueryOptions) -> Expiry {
        options
            .ttl
            .unwrap_or_else(|| self.cache.context().default_ttl())
    }

    /// Cached rows for `query`, running `materializer` and storing its rows
    /// when the cache has no complete result.
    ///
    /// A partial result (some rows expired) is treated as a miss. Passing
    /// `ignore_expiry` here is an error: it would return stale rows while
    /// also asking to populate.
    pub async fn get_value<Q, T, F, Fut>(
        &self,
        query: &Q,
        options: &QueryOptions,
        materializer: F,
    ) -> RowCacheResult<CacheRead<Vec<T>>>
    where
        Q: CompiledStatement + ?Sized,
        T: CacheableRow,
        F: FnOnce() -> Fut,
        Fut: Future<Output = RowCacheResult<Vec<T>>>,
    {
        if options.ignore_expiry {
            return Err(ValidationError::IncompatibleOptions {
                option_a: "ignore_expiry".to_string(),
                option_b: "materializer".to_string(),
            }
            .into());
        }

        let fingerprint = self.resolve_key(query, options)?;
        if let Some(set) = self.cache.get::<T>(query.table(), &fingerprint).await? {
            match set.into_complete() {
                Some(rows) => return Ok(CacheRead::from_cache(rows, fingerprint)),
                None => debug!(table = query.table(), "Partial cached result; rematerializing"),
            }
        }

        let rows = materializer().await?;
        self.cache
            .set(query.table(), &fingerprint, &rows, self.ttl(options))
            .await?;
        Ok(CacheRead::from_materializer(rows, fingerprint))
    }

    /// Cached rows for `query` without populating.
    ///
    /// With `ignore_expiry` the stored result is returned as-is, holes
    /// included. Otherwise only a complete result is returned.
    pub async fn cached_value<Q, T>(
        &self,
        query: &Q,
        options: &QueryOptions,
    ) -> RowCacheResult<Option<RowSet<T>>>
    where
        Q: CompiledStatement + ?Sized,
        T: DeserializeOwned,
    {
        let fingerprint = self.resolve_key(query, options)?;
        let set = self.cache.get::<T>(query.table(), &fingerprint).await?;
        if options.ignore_expiry {
            return Ok(set);
        }
        Ok(set.filter(RowSet::is_complete))
    }

    /// Store `rows` as the result of `query`, replacing any cached result.
    pub async fn set_value<Q, T>(
        &self,
        query: &Q,
        rows: &[T],
        options: &QueryOptions,
    ) -> RowCacheResult<Vec<RowKey>>
    where
        Q: CompiledStatement + ?Sized,
        T: CacheableRow,
    {
        let fingerprint = self.resolve_key(query, options)?;
        self.cache
            .set(query.table(), &fingerprint, rows, self.ttl(options))
            .await
    }

    /// Run `materializer` unconditionally and store its rows.
    pub async fn update_value<Q, T, F, Fut>(
        &self,
        query: &Q,
        options: &QueryOptions,
        materializer: F,
    ) -> RowCacheResult<Vec<T>>
    where
        Q: CompiledStatement + ?Sized,
        T: CacheableRow,
        F: FnOnce() -> Fut,
        Fut: Future<Output = RowCacheResult<Vec<T>>>,
    {
        let rows = materializer().await?;
        self.set_value(query, &rows, options).await?;
        Ok(rows)
    }

    /// Evict the cached result of `query`. Returns whether one existed.
    pub async fn invalidate<Q: CompiledStatement + ?Sized>(
        &self,
        query: &Q,
        options: &QueryOptions,
    ) -> RowCacheResult<bool> {
        let fingerprint = self.resolve_key(query, options)?;
        self.cache.invalidate(query.table(), &fingerprint).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use rowcache_core::{CompiledQuery, PrimaryKey, RowCacheError};
    use serde::{Deserialize, Serialize};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Item {
        id: i64,
        qty: i64,
    }

    impl CacheableRow for Item {
        fn table() -> &'static str {
            "item"
        }

        fn primary_key(&self) -> PrimaryKey {
            PrimaryKey::single("id", self.id)
        }
    }

    fn query() -> CompiledQuery {
        CompiledQuery::new("item", "SELECT * FROM item WHERE qty > :q").bind("q", 0)
    }

    #[tokio::test]
    async fn test_get_value_materializes_once() {
        let facade = CacheContext::<InMemoryStore>::with_defaults().query_cache();
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let load = move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![Item { id: 1, qty: 5 }])
        };

        let first = facade.get_value(&query(), &QueryOptions::new(), load).await.unwrap();
        assert!(first.was_cache_miss());
        let second = facade.get_value(&query(), &QueryOptions::new(), load).await.unwrap();
        assert!(second.was_cache_hit());
        assert_eq!(second.into_value(), vec![Item { id: 1, qty: 5 }]);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_ignore_expiry_with_materializer_rejected() {
        let facade = CacheContext::<InMemoryStore>::with_defaults().query_cache();
        let options = QueryOptions::new().ignoring_expiry();
        let result = facade
            .get_value(&query(), &options, || async { Ok(Vec::<Item>::new()) })
            .await;
        assert!(matches!(
            result,
            Err(RowCacheError::Validation(ValidationError::IncompatibleOptions { .. }))
        ));
    }

    #[tokio::test]
    async fn test_partial_hit_rematerializes() {
        let ctx = CacheContext::<InMemoryStore>::with_defaults();
        let facade = ctx.query_cache();
        let rows = vec![Item { id: 1, qty: 5 }, Item { id: 2, qty: 6 }];
        facade
            .set_value(&query(), &rows, &QueryOptions::new())
            .await
            .unwrap();
        ctx.result_cache()
            .delete_row(&RowKey::for_value("item", "id", "2"))
            .await
            .unwrap();

        let partial: Option<RowSet<Item>> = facade
            .cached_value(&query(), &QueryOptions::new().ignoring_expiry())
            .await
            .unwrap();
        assert_eq!(partial.map(|s| s.missing()), Some(1));
        let strict: Option<RowSet<Item>> = facade
            .cached_value(&query(), &QueryOptions::new())
            .await
            .unwrap();
        assert!(strict.is_none());

        let fresh = rows.clone();
        let read = facade
            .get_value(&query(), &QueryOptions::new(), move || async move { Ok(fresh) })
            .await
            .unwrap();
        assert!(read.was_cache_miss());
        assert_eq!(read.into_value(), rows);
    }

    #[tokio::test]
    async fn test_cache_key_override() {
        let ctx = CacheContext::<InMemoryStore>::with_defaults();
        let facade = ctx.query_cache();
        let options = QueryOptions::new().with_cache_key("hot-items");
        facade
            .set_value(&query(), &[Item { id: 3, qty: 1 }], &options)
            .await
            .unwrap();
        assert!(ctx.store().exists("rowcache:item:hot-items").await.unwrap());

        let bad = QueryOptions::new().with_cache_key("a:b");
        assert!(facade.invalidate(&query(), &bad).await.is_err());
        assert!(facade.invalidate(&query(), &options).await.unwrap());
    }

    #[tokio::test]
    async fn test_update_value_overwrites() {
        let facade = CacheContext::<InMemoryStore>::with_defaults().query_cache();
        facade
            .set_value(&query(), &[Item { id: 1, qty: 1 }], &QueryOptions::new())
            .await
            .unwrap();
        let rows = facade
            .update_value(&query(), &QueryOptions::new(), || async {
                Ok(vec![Item { id: 4, qty: 4 }])
            })
            .await
            .unwrap();
        assert_eq!(rows, vec![Item { id: 4, qty: 4 }]);

        let cached: Option<RowSet<Item>> = facade
            .cached_value(&query(), &QueryOptions::new())
            .await
            .unwrap();
        assert_eq!(cached.and_then(RowSet::into_complete), Some(rows));
    }

    #[tokio::test]
    async fn test_materializer_error_propagates_and_stores_nothing() {
        let ctx = CacheContext::<InMemoryStore>::with_defaults();
        let facade = ctx.query_cache();
        let result = facade
            .get_value(&query(), &QueryOptions::new(), || async {
                Err::<Vec<Item>, _>(
                    ValidationError::InvalidValue {
                        field: "db".to_string(),
                        reason: "down".to_string(),
                    }
                    .into(),
                )
            })
            .await;
        assert!(result.is_err());
        assert!(ctx.store().is_empty().unwrap());
    }
}
