//! Invalidation bridge between the mapping layer's write path and the cache.
//!
//! The mapping layer reports every insert, update and delete before it is
//! flushed. The bridge turns those notifications into cache maintenance:
//!
//! | mutation | composite entries of the table | row record |
//! |----------|--------------------------------|------------|
//! | insert   | swept                          | untouched  |
//! | update   | untouched                      | overwritten if cached |
//! | delete   | swept                          | evicted, with every key in its history |
//!
//! Inserts and deletes can change which rows any predicate matches, so all
//! cached results of the table go. An update keeps cached results pointing at
//! the refreshed row; a result whose predicate no longer matches the updated
//! row stays stale until its TTL. Nothing here is transactional with the
//! backing store.

use async_trait::async_trait;
use rowcache_core::{
    CacheableRow, HookFailurePolicy, KeyHistory, MutationEvent, MutationKind, RowCacheResult,
};
use std::collections::BTreeSet;
use tracing::{debug, warn};

use crate::context::CacheContext;
use crate::store::KeyValueStore;

/// Receiver of mutation notifications from the mapping layer.
#[async_trait]
pub trait MutationListener: Send + Sync {
    async fn on_mutation(&self, event: &MutationEvent) -> RowCacheResult<()>;
}

/// What one notification did to the cache.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvalidationReport {
    /// The table was not registered; nothing was touched.
    pub ignored: bool,
    /// Composite entries swept.
    pub entries_swept: u64,
    /// Whether a cached row was overwritten.
    pub row_refreshed: bool,
    /// Row records deleted.
    pub rows_evicted: u64,
}

/// Turns mutation notifications into evictions and row refreshes.
///
/// Only tables registered with [`register`](Self::register) are maintained;
/// notifications for anything else are ignored.
pub struct InvalidationBridge<S> {
    ctx: CacheContext<S>,
    tables: BTreeSet<String>,
}

impl<S: KeyValueStore> InvalidationBridge<S> {
    pub fn new(ctx: CacheContext<S>) -> Self {
        Self {
            ctx,
            tables: BTreeSet::new(),
        }
    }

    /// Subscribe a row type's table.
    pub fn register<T: CacheableRow>(&mut self) -> &mut Self {
        self.register_table(T::table())
    }

    pub fn register_table(&mut self, table: impl Into<String>) -> &mut Self {
        let table = table.into();
        debug!(table = %table, "Registered table for invalidation");
        self.tables.insert(table);
        self
    }

    pub fn is_registered(&self, table: &str) -> bool {
        self.tables.contains(table)
    }

    pub fn tables(&self) -> impl Iterator<Item = &str> {
        self.tables.iter().map(String::as_str)
    }

    /// Apply a notification, returning store failures to the caller.
    pub async fn apply(&self, event: &MutationEvent) -> RowCacheResult<InvalidationReport> {
        let mut report = InvalidationReport::default();
        if !self.is_registered(&event.table) {
            debug!(table = %event.table, kind = %event.kind, "Mutation on unregistered table ignored");
            report.ignored = true;
            return Ok(report);
        }

        let cache = self.ctx.result_cache();
        if event.kind.sweeps_table() {
            report.entries_swept = cache.sweep_table(&event.table).await?;
        }

        match event.kind {
            MutationKind::BeforeInsert => {}
            MutationKind::BeforeUpdate => match &event.row {
                Some(value) => {
                    report.row_refreshed = cache
                        .refresh_row_if_present(&event.row_key(), value)
                        .await?;
                }
                None => {
                    warn!(table = %event.table, pk = %event.pk_value, "Update notification without row value");
                }
            },
            MutationKind::BeforeDelete => {
                report.rows_evicted = cache.delete_rows(&event.row_keys_to_evict()).await?;
            }
        }

        debug!(
            table = %event.table,
            kind = %event.kind,
            swept = report.entries_swept,
            refreshed = report.row_refreshed,
            evicted = report.rows_evicted,
            "Applied mutation to cache"
        );
        Ok(report)
    }

    pub async fn before_insert<T: CacheableRow>(&self, row: &T) -> RowCacheResult<()> {
        self.on_mutation(&MutationEvent::insert(row)).await
    }

    pub async fn before_update<T: CacheableRow>(&self, row: &T) -> RowCacheResult<()> {
        self.on_mutation(&MutationEvent::update(row)?).await
    }

    pub async fn before_delete<T: CacheableRow>(
        &self,
        row: &T,
        history: KeyHistory,
    ) -> RowCacheResult<()> {
        self.on_mutation(&MutationEvent::delete(row, history)).await
    }
}

#[async_trait]
impl<S: KeyValueStore> MutationListener for InvalidationBridge<S> {
    /// Apply a notification under the configured [`HookFailurePolicy`].
    async fn on_mutation(&self, event: &MutationEvent) -> RowCacheResult<()> {
        match self.apply(event).await {
            Ok(_) => Ok(()),
            Err(e) => match self.ctx.config().hook_failure {
                HookFailurePolicy::Propagate => Err(e),
                HookFailurePolicy::BestEffort => {
                    warn!(
                        table = %event.table,
                        kind = %event.kind,
                        error = %e,
                        "Cache invalidation failed; write proceeds"
                    );
                    Ok(())
                }
            },
        }
    }
}
