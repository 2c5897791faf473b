//! Fingerprint-keyed query result cache.
//!
//! A cached result is stored in two layers:
//!
//! - one composite entry `{prefix}:{table}:{fingerprint}` holding the
//!   `|`-joined row keys of the result, in result order
//! - one row record `{table}:{pk-column}:{pk-value}` per row
//!
//! Rows are shared between every result that contains them, so refreshing a
//! row record is visible to all of those results at once. Rows and entries
//! expire independently; a result whose rows partly expired reads back as a
//! [`RowSet`] with holes rather than failing.

use rowcache_core::{
    CacheableRow, Expiry, PrimaryKey, QueryFingerprint, RowCacheResult, RowKey,
    ROW_LIST_DELIMITER,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::codec;
use crate::context::CacheContext;
use crate::store::{KeyTtl, KeyValueStore};

/// Rows of a cached result in stored order; `None` marks a row record that
/// expired or failed to decode.
#[derive(Debug, Clone, PartialEq)]
pub struct RowSet<T> {
    rows: Vec<Option<T>>,
}

impl<T> RowSet<T> {
    pub fn new(rows: Vec<Option<T>>) -> Self {
        Self { rows }
    }

    /// Whether every referenced row was found.
    pub fn is_complete(&self) -> bool {
        self.rows.iter().all(Option::is_some)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Number of referenced rows that were not found.
    pub fn missing(&self) -> usize {
        self.rows.iter().filter(|r| r.is_none()).count()
    }

    pub fn rows(&self) -> &[Option<T>] {
        &self.rows
    }

    /// All rows, or `None` if any is missing.
    pub fn into_complete(self) -> Option<Vec<T>> {
        self.rows.into_iter().collect()
    }

    /// Rows that were found, in order, dropping holes.
    pub fn into_present(self) -> Vec<T> {
        self.rows.into_iter().flatten().collect()
    }
}

impl<T> From<Vec<T>> for RowSet<T> {
    fn from(rows: Vec<T>) -> Self {
        Self::new(rows.into_iter().map(Some).collect())
    }
}

fn join_row_keys(keys: &[RowKey]) -> String {
    let mut out = String::new();
    for (i, key) in keys.iter().enumerate() {
        if i > 0 {
            out.push(ROW_LIST_DELIMITER);
        }
        out.push_str(key.as_str());
    }
    out
}

fn split_row_keys(joined: &str) -> Vec<RowKey> {
    if joined.is_empty() {
        return Vec::new();
    }
    joined.split(ROW_LIST_DELIMITER).filter_map(RowKey::parse).collect()
}

/// Composite-entry and row-record cache over a [`KeyValueStore`].
pub struct ResultCache<S> {
    ctx: CacheContext<S>,
}

impl<S> Clone for ResultCache<S> {
    fn clone(&self) -> Self {
        Self {
            ctx: self.ctx.clone(),
        }
    }
}

impl<S: KeyValueStore> ResultCache<S> {
    pub fn new(ctx: CacheContext<S>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &CacheContext<S> {
        &self.ctx
    }

    /// Read a cached result.
    ///
    /// Returns `None` when no composite entry exists (or it is corrupt).
    /// Otherwise every referenced row is fetched; rows that are gone or
    /// undecodable become holes in the returned [`RowSet`].
    pub async fn get<T: DeserializeOwned>(
        &self,
        table: &str,
        fingerprint: &QueryFingerprint,
    ) -> RowCacheResult<Option<RowSet<T>>> {
        let key = self.ctx.composite_key(table, fingerprint);
        let stats = self.ctx.stats_counters();

        let raw = match self.ctx.store().get(&key).await? {
            Some(raw) => raw,
            None => {
                stats.miss();
                debug!(key = %key, "Result cache miss");
                return Ok(None);
            }
        };

        let joined = match decode_row_list(&raw) {
            Some(joined) => joined,
            None => {
                stats.decode_failure();
                stats.miss();
                warn!(key = %key, "Undecodable composite entry treated as miss");
                return Ok(None);
            }
        };

        let keys = split_row_keys(&joined);
        let mut rows = Vec::with_capacity(keys.len());
        for row_key in &keys {
            rows.push(self.read_row::<T>(row_key).await?);
        }

        let set = RowSet::new(rows);
        if set.is_complete() {
            stats.hit();
            debug!(key = %key, rows = set.len(), "Result cache hit");
        } else {
            stats.partial_hit();
            debug!(
                key = %key,
                rows = set.len(),
                missing = set.missing(),
                "Result cache partial hit"
            );
        }
        Ok(Some(set))
    }

    /// Store a result: every row under its own key, then the composite entry.
    ///
    /// Rows and the entry share `ttl`. Returns the row keys in result order.
    pub async fn set<T: CacheableRow>(
        &self,
        table: &str,
        fingerprint: &QueryFingerprint,
        rows: &[T],
        ttl: Expiry,
    ) -> RowCacheResult<Vec<RowKey>> {
        let mut keys = Vec::with_capacity(rows.len());
        for row in rows {
            keys.push(self.put_row(row, ttl).await?);
        }

        let key = self.ctx.composite_key(table, fingerprint);
        let payload = codec::encode_blob(join_row_keys(&keys).as_bytes())?;
        self.ctx.store().set(&key, &payload, ttl).await?;
        self.ctx.stats_counters().entry_written();

        debug!(key = %key, rows = keys.len(), ttl = ?ttl, "Stored query result");
        Ok(keys)
    }

    /// Evict the composite entry of one result. Row records are left alone
    /// since other results may reference them.
    pub async fn invalidate(
        &self,
        table: &str,
        fingerprint: &QueryFingerprint,
    ) -> RowCacheResult<bool> {
        let key = self.ctx.composite_key(table, fingerprint);
        let removed = self.ctx.store().delete(std::slice::from_ref(&key)).await?;
        self.ctx.stats_counters().entries_evicted(removed);
        debug!(key = %key, removed = removed > 0, "Invalidated query result");
        Ok(removed > 0)
    }

    /// Evict every composite entry of `table`, returning how many were removed.
    pub async fn sweep_table(&self, table: &str) -> RowCacheResult<u64> {
        let pattern = self.ctx.table_pattern(table);
        let keys = self.ctx.store().scan(&pattern).await?;
        if keys.is_empty() {
            debug!(table = %table, "Table sweep found no cached results");
            return Ok(0);
        }
        let removed = self.ctx.store().delete(&keys).await?;
        self.ctx.stats_counters().entries_evicted(removed);
        info!(table = %table, removed, "Swept cached results for table");
        Ok(removed)
    }

    /// Read one cached row by primary key.
    pub async fn get_row<T: CacheableRow>(&self, pk: &PrimaryKey) -> RowCacheResult<Option<T>> {
        self.read_row(&RowKey::new(T::table(), pk)).await
    }

    /// Write one row record.
    pub async fn put_row<T: CacheableRow>(&self, row: &T, ttl: Expiry) -> RowCacheResult<RowKey> {
        let key = row.row_key();
        let payload = codec::encode_json(row)?;
        self.ctx.store().set(key.as_str(), &payload, ttl).await?;
        self.ctx.stats_counters().rows_written(1);
        Ok(key)
    }

    /// Overwrite a row record only if one exists, keeping its remaining TTL.
    ///
    /// Returns whether a write happened.
    pub async fn refresh_row_if_present(
        &self,
        key: &RowKey,
        value: &Value,
    ) -> RowCacheResult<bool> {
        let ttl = match self.ctx.store().pttl(key.as_str()).await? {
            KeyTtl::Missing => {
                debug!(key = %key, "Row not cached; refresh skipped");
                return Ok(false);
            }
            KeyTtl::Persistent => Expiry::Never,
            KeyTtl::Millis(ms) => Expiry::from_millis(ms.max(1)),
        };
        let payload = codec::encode_json(value)?;
        self.ctx.store().set(key.as_str(), &payload, ttl).await?;
        self.ctx.stats_counters().rows_written(1);
        debug!(key = %key, "Refreshed cached row");
        Ok(true)
    }

    /// Delete row records, returning how many existed.
    pub async fn delete_rows(&self, keys: &[RowKey]) -> RowCacheResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let raw: Vec<String> = keys.iter().map(|k| k.as_str().to_string()).collect();
        let removed = self.ctx.store().delete(&raw).await?;
        debug!(requested = keys.len(), removed, "Deleted cached rows");
        Ok(removed)
    }

    pub async fn delete_row(&self, key: &RowKey) -> RowCacheResult<bool> {
        Ok(self.delete_rows(std::slice::from_ref(key)).await? > 0)
    }

    async fn read_row<T: DeserializeOwned>(&self, key: &RowKey) -> RowCacheResult<Option<T>> {
        let raw = match self.ctx.store().get(key.as_str()).await? {
            Some(raw) => raw,
            None => return Ok(None),
        };
        match codec::decode_json(&raw) {
            Ok(row) => Ok(Some(row)),
            Err(e) => {
                self.ctx.stats_counters().decode_failure();
                warn!(key = %key, error = %e, "Undecodable row treated as missing");
                Ok(None)
            }
        }
    }
}

fn decode_row_list(raw: &[u8]) -> Option<String> {
    let bytes = codec::decode(raw)?.into_blob()?;
    String::from_utf8(bytes).ok()
}
