//! In-process key-value store.
//!
//! Mirrors the subset of Redis semantics the cache and locks rely on:
//! typed values (string, hash, list), millisecond expiry evaluated lazily on
//! access, empty lists disappearing, and blocking pops woken by pushes.
//! Expiry runs on `tokio::time::Instant`, so tests with a paused clock can
//! advance past a TTL without sleeping.

use async_trait::async_trait;
use regex::Regex;
use rowcache_core::{DurationMs, Expiry, RowCacheResult, StoreError};
use std::collections::{HashMap, VecDeque};
use std::pin::pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

use super::{HoldRelease, KeyTtl, KeyValueStore};

#[derive(Debug, Clone)]
enum StoredValue {
    Bytes(Vec<u8>),
    Hash(HashMap<String, i64>),
    List(VecDeque<Vec<u8>>),
}

impl StoredValue {
    fn type_name(&self) -> &'static str {
        match self {
            StoredValue::Bytes(_) => "string",
            StoredValue::Hash(_) => "hash",
            StoredValue::List(_) => "list",
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    value: StoredValue,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(value: StoredValue) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

type Entries = HashMap<String, Entry>;

/// Shared in-memory store. Clones share the same data.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    entries: Arc<Mutex<Entries>>,
    pushed: Arc<Notify>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys.
    pub fn len(&self) -> RowCacheResult<usize> {
        self.with_entries(|entries, now| {
            entries.retain(|_, e| !e.is_expired(now));
            entries.len()
        })
    }

    pub fn is_empty(&self) -> RowCacheResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Remove every key.
    pub fn clear(&self) -> RowCacheResult<()> {
        self.with_entries(|entries, _| entries.clear())
    }

    fn with_entries<R>(&self, f: impl FnOnce(&mut Entries, Instant) -> R) -> RowCacheResult<R> {
        let mut entries = self.entries.lock().map_err(|_| StoreError::LockPoisoned)?;
        Ok(f(&mut entries, Instant::now()))
    }

    fn try_pop(&self, key: &str) -> RowCacheResult<Option<Vec<u8>>> {
        self.with_entries(|entries, now| {
            let entry = match live(entries, key, now) {
                Some(entry) => entry,
                None => return Ok(None),
            };
            let list = match &mut entry.value {
                StoredValue::List(list) => list,
                other => return Err(wrong_type(key, "list", other)),
            };
            let head = list.pop_front();
            if list.is_empty() {
                entries.remove(key);
            }
            Ok(head)
        })?
        .map_err(Into::into)
    }
}

/// Fetch a live entry, dropping it first if it has expired.
fn live<'a>(entries: &'a mut Entries, key: &str, now: Instant) -> Option<&'a mut Entry> {
    if entries.get(key).is_some_and(|e| e.is_expired(now)) {
        entries.remove(key);
    }
    entries.get_mut(key)
}

fn wrong_type(key: &str, expected: &str, found: &StoredValue) -> StoreError {
    StoreError::WrongType {
        key: key.to_string(),
        expected: format!("{} (found {})", expected, found.type_name()),
    }
}

fn deadline_after(now: Instant, ttl_ms: DurationMs) -> Instant {
    now + Duration::from_millis(ttl_ms)
}

/// Translate a store glob pattern into an anchored regex.
fn glob_to_regex(pattern: &str) -> Result<Regex, StoreError> {
    let mut out = String::with_capacity(pattern.len() + 8);
    out.push('^');
    let mut chars = pattern.chars();
    while let Some(ch) = chars.next() {
        match ch {
            '\\' => match chars.next() {
                Some(escaped) => out.push_str(&regex::escape(&escaped.to_string())),
                None => out.push_str(&regex::escape("\\")),
            },
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '[' => {
                out.push('[');
                let mut first = true;
                loop {
                    match chars.next() {
                        Some(']') => break,
                        Some('^') if first => out.push('^'),
                        Some('\\') => {
                            if let Some(escaped) = chars.next() {
                                out.push('\\');
                                out.push(escaped);
                            }
                        }
                        Some(c) if matches!(c, '[' | '&' | '~') => {
                            out.push('\\');
                            out.push(c);
                        }
                        Some(c) => out.push(c),
                        None => {
                            return Err(StoreError::InvalidArgument {
                                operation: "SCAN".to_string(),
                                reason: format!("unterminated character class in '{}'", pattern),
                            })
                        }
                    }
                    first = false;
                }
                out.push(']');
            }
            c => out.push_str(&regex::escape(&c.to_string())),
        }
    }
    out.push('$');
    Regex::new(&out).map_err(|e| StoreError::InvalidArgument {
        operation: "SCAN".to_string(),
        reason: e.to_string(),
    })
}

#[async_trait]
impl KeyValueStore for InMemoryStore {
    async fn exists(&self, key: &str) -> RowCacheResult<bool> {
        self.with_entries(|entries, now| live(entries, key, now).is_some())
    }

    async fn get(&self, key: &str) -> RowCacheResult<Option<Vec<u8>>> {
        self.with_entries(|entries, now| match live(entries, key, now) {
            None => Ok(None),
            Some(Entry {
                value: StoredValue::Bytes(bytes),
                ..
            }) => Ok(Some(bytes.clone())),
            Some(entry) => Err(wrong_type(key, "string", &entry.value)),
        })?
        .map_err(Into::into)
    }

    async fn set(&self, key: &str, value: &[u8], expiry: Expiry) -> RowCacheResult<()> {
        self.with_entries(|entries, now| {
            let mut entry = Entry::new(StoredValue::Bytes(value.to_vec()));
            entry.expires_at = expiry.as_millis().map(|ms| deadline_after(now, ms));
            entries.insert(key.to_string(), entry);
        })
    }

    async fn set_nx(&self, key: &str, value: &[u8]) -> RowCacheResult<bool> {
        self.with_entries(|entries, now| {
            if live(entries, key, now).is_some() {
                return false;
            }
            entries.insert(
                key.to_string(),
                Entry::new(StoredValue::Bytes(value.to_vec())),
            );
            true
        })
    }

    async fn getset(&self, key: &str, value: &[u8]) -> RowCacheResult<Option<Vec<u8>>> {
        self.with_entries(|entries, now| {
            let previous = match live(entries, key, now) {
                None => None,
                Some(Entry {
                    value: StoredValue::Bytes(bytes),
                    ..
                }) => Some(bytes.clone()),
                Some(entry) => return Err(wrong_type(key, "string", &entry.value)),
            };
            entries.insert(
                key.to_string(),
                Entry::new(StoredValue::Bytes(value.to_vec())),
            );
            Ok(previous)
        })?
        .map_err(Into::into)
    }

    async fn delete(&self, keys: &[String]) -> RowCacheResult<u64> {
        self.with_entries(|entries, now| {
            let mut removed = 0;
            for key in keys {
                if live(entries, key, now).is_some() {
                    entries.remove(key.as_str());
                    removed += 1;
                }
            }
            removed
        })
    }

    async fn hset(&self, key: &str, field: &str, value: i64) -> RowCacheResult<()> {
        self.with_entries(|entries, now| {
            if live(entries, key, now).is_none() {
                entries.insert(key.to_string(), Entry::new(StoredValue::Hash(HashMap::new())));
            }
            match entries.get_mut(key).map(|e| &mut e.value) {
                Some(StoredValue::Hash(hash)) => {
                    hash.insert(field.to_string(), value);
                    Ok(())
                }
                Some(other) => Err(wrong_type(key, "hash", other)),
                None => Ok(()),
            }
        })?
        .map_err(Into::into)
    }

    async fn hget(&self, key: &str, field: &str) -> RowCacheResult<Option<i64>> {
        self.with_entries(|entries, now| match live(entries, key, now) {
            None => Ok(None),
            Some(Entry {
                value: StoredValue::Hash(hash),
                ..
            }) => Ok(hash.get(field).copied()),
            Some(entry) => Err(wrong_type(key, "hash", &entry.value)),
        })?
        .map_err(Into::into)
    }

    async fn hexists(&self, key: &str, field: &str) -> RowCacheResult<bool> {
        Ok(self.hget(key, field).await?.is_some())
    }

    async fn hincr_by(&self, key: &str, field: &str, delta: i64) -> RowCacheResult<i64> {
        self.with_entries(|entries, now| {
            if live(entries, key, now).is_none() {
                entries.insert(key.to_string(), Entry::new(StoredValue::Hash(HashMap::new())));
            }
            match entries.get_mut(key).map(|e| &mut e.value) {
                Some(StoredValue::Hash(hash)) => {
                    let slot = hash.entry(field.to_string()).or_insert(0);
                    *slot += delta;
                    Ok(*slot)
                }
                Some(other) => Err(wrong_type(key, "hash", other)),
                None => Ok(delta),
            }
        })?
        .map_err(Into::into)
    }

    async fn hash_init(
        &self,
        key: &str,
        field: &str,
        value: i64,
        ttl_ms: DurationMs,
    ) -> RowCacheResult<bool> {
        self.with_entries(|entries, now| {
            if live(entries, key, now).is_some() {
                return false;
            }
            let mut hash = HashMap::new();
            hash.insert(field.to_string(), value);
            let mut entry = Entry::new(StoredValue::Hash(hash));
            entry.expires_at = Some(deadline_after(now, ttl_ms));
            entries.insert(key.to_string(), entry);
            true
        })
    }

    async fn lock_reenter(
        &self,
        key: &str,
        field: &str,
        ttl_ms: DurationMs,
    ) -> RowCacheResult<Option<i64>> {
        self.with_entries(|entries, now| {
            let entry = match live(entries, key, now) {
                Some(entry) => entry,
                None => return Ok(None),
            };
            let count = match &mut entry.value {
                StoredValue::Hash(hash) => match hash.get_mut(field) {
                    Some(count) => {
                        *count += 1;
                        *count
                    }
                    None => return Ok(None),
                },
                other => return Err(wrong_type(key, "hash", other)),
            };
            entry.expires_at = Some(deadline_after(now, ttl_ms));
            Ok(Some(count))
        })?
        .map_err(Into::into)
    }

    async fn lock_release(
        &self,
        key: &str,
        field: &str,
        ttl_ms: DurationMs,
    ) -> RowCacheResult<HoldRelease> {
        self.with_entries(|entries, now| {
            let entry = match live(entries, key, now) {
                Some(entry) => entry,
                None => return Ok(HoldRelease::Missing),
            };
            let count = match &mut entry.value {
                StoredValue::Hash(hash) => match hash.get_mut(field) {
                    Some(count) => {
                        *count -= 1;
                        *count
                    }
                    None => return Ok(HoldRelease::NotHeld),
                },
                other => return Err(wrong_type(key, "hash", other)),
            };
            if count > 0 {
                entry.expires_at = Some(deadline_after(now, ttl_ms));
                return Ok(HoldRelease::Remaining(count as u64));
            }
            entries.remove(key);
            Ok(HoldRelease::Remaining(0))
        })?
        .map_err(Into::into)
    }

    async fn pexpire(&self, key: &str, ttl_ms: DurationMs) -> RowCacheResult<bool> {
        self.with_entries(|entries, now| match live(entries, key, now) {
            Some(entry) => {
                entry.expires_at = Some(deadline_after(now, ttl_ms));
                true
            }
            None => false,
        })
    }

    async fn pttl(&self, key: &str) -> RowCacheResult<KeyTtl> {
        self.with_entries(|entries, now| match live(entries, key, now) {
            None => KeyTtl::Missing,
            Some(Entry {
                expires_at: None, ..
            }) => KeyTtl::Persistent,
            Some(Entry {
                expires_at: Some(at),
                ..
            }) => {
                let remaining = at.saturating_duration_since(now).as_millis();
                KeyTtl::Millis(u64::try_from(remaining).unwrap_or(u64::MAX))
            }
        })
    }

    async fn scan(&self, pattern: &str) -> RowCacheResult<Vec<String>> {
        let matcher = glob_to_regex(pattern)?;
        self.with_entries(|entries, now| {
            entries.retain(|_, e| !e.is_expired(now));
            let mut keys: Vec<String> = entries
                .keys()
                .filter(|key| matcher.is_match(key))
                .cloned()
                .collect();
            keys.sort();
            keys
        })
    }

    async fn rpush(&self, key: &str, value: &[u8]) -> RowCacheResult<u64> {
        let len = self.with_entries(|entries, now| {
            if live(entries, key, now).is_none() {
                entries.insert(key.to_string(), Entry::new(StoredValue::List(VecDeque::new())));
            }
            match entries.get_mut(key).map(|e| &mut e.value) {
                Some(StoredValue::List(list)) => {
                    list.push_back(value.to_vec());
                    Ok(list.len() as u64)
                }
                Some(other) => Err(wrong_type(key, "list", other)),
                None => Ok(0),
            }
        })??;
        self.pushed.notify_waiters();
        Ok(len)
    }

    async fn blpop(&self, key: &str, timeout: Duration) -> RowCacheResult<Option<Vec<u8>>> {
        let deadline = Instant::now() + timeout;
        loop {
            // Register interest before checking so a push between the check
            // and the wait is not missed.
            let mut notified = pin!(self.pushed.notified());
            notified.as_mut().enable();

            if let Some(head) = self.try_pop(key)? {
                return Ok(Some(head));
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.try_pop(key);
            }
        }
    }

    async fn ping(&self) -> RowCacheResult<()> {
        self.with_entries(|_, _| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_set_roundtrip() {
        let store = InMemoryStore::new();
        store.set("k", b"v", Expiry::Never).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(b"v".to_vec()));
        assert!(store.exists("k").await.unwrap());
        assert_eq!(store.pttl("k").await.unwrap(), KeyTtl::Persistent);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_is_lazy_and_exact() {
        let store = InMemoryStore::new();
        store
            .set("k", b"v", Expiry::After(Duration::from_millis(100)))
            .await
            .unwrap();
        assert_eq!(store.pttl("k").await.unwrap(), KeyTtl::Millis(100));

        tokio::time::advance(Duration::from_millis(99)).await;
        assert!(store.exists("k").await.unwrap());

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(!store.exists("k").await.unwrap());
        assert_eq!(store.pttl("k").await.unwrap(), KeyTtl::Missing);
    }

    #[tokio::test]
    async fn test_set_never_clears_expiry() {
        let store = InMemoryStore::new();
        store
            .set("k", b"1", Expiry::After(Duration::from_secs(5)))
            .await
            .unwrap();
        store.set("k", b"2", Expiry::Never).await.unwrap();
        assert_eq!(store.pttl("k").await.unwrap(), KeyTtl::Persistent);
    }

    #[tokio::test]
    async fn test_set_nx_and_getset() {
        let store = InMemoryStore::new();
        assert!(store.set_nx("k", b"a").await.unwrap());
        assert!(!store.set_nx("k", b"b").await.unwrap());
        assert_eq!(store.getset("k", b"c").await.unwrap(), Some(b"a".to_vec()));
        assert_eq!(store.getset("fresh", b"x").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_delete_counts_existing() {
        let store = InMemoryStore::new();
        store.set("a", b"1", Expiry::Never).await.unwrap();
        store.set("b", b"1", Expiry::Never).await.unwrap();
        let removed = store
            .delete(&["a".to_string(), "b".to_string(), "c".to_string()])
            .await
            .unwrap();
        assert_eq!(removed, 2);
        assert!(store.is_empty().unwrap());
    }

    #[tokio::test]
    async fn test_hash_operations() {
        let store = InMemoryStore::new();
        assert!(store.hash_init("h", "f", 1, 1_000).await.unwrap());
        assert!(!store.hash_init("h", "f", 1, 1_000).await.unwrap());
        assert!(store.hexists("h", "f").await.unwrap());
        assert_eq!(store.hincr_by("h", "f", 2).await.unwrap(), 3);
        assert_eq!(store.hincr_by("h", "f", -3).await.unwrap(), 0);
        store.hset("h", "g", 7).await.unwrap();
        assert_eq!(store.hget("h", "g").await.unwrap(), Some(7));
        assert_eq!(store.hget("h", "missing").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lock_reenter_and_release() {
        let store = InMemoryStore::new();
        assert_eq!(store.lock_reenter("l", "a", 1_000).await.unwrap(), None);
        assert_eq!(
            store.lock_release("l", "a", 1_000).await.unwrap(),
            HoldRelease::Missing
        );

        store.hash_init("l", "a", 1, 1_000).await.unwrap();
        tokio::time::advance(Duration::from_millis(400)).await;
        assert_eq!(store.lock_reenter("l", "a", 1_000).await.unwrap(), Some(2));
        assert_eq!(store.pttl("l").await.unwrap(), KeyTtl::Millis(1_000));
        assert_eq!(store.lock_reenter("l", "b", 1_000).await.unwrap(), None);
        assert_eq!(store.hget("l", "b").await.unwrap(), None);

        assert_eq!(
            store.lock_release("l", "b", 1_000).await.unwrap(),
            HoldRelease::NotHeld
        );
        assert_eq!(
            store.lock_release("l", "a", 1_000).await.unwrap(),
            HoldRelease::Remaining(1)
        );
        assert_eq!(
            store.lock_release("l", "a", 1_000).await.unwrap(),
            HoldRelease::Remaining(0)
        );
        assert!(!store.exists("l").await.unwrap());
    }

    #[tokio::test]
    async fn test_wrong_type_is_an_error() {
        let store = InMemoryStore::new();
        store.set("s", b"x", Expiry::Never).await.unwrap();
        let err = store.hincr_by("s", "f", 1).await.unwrap_err();
        assert!(matches!(
            err,
            rowcache_core::RowCacheError::Store(StoreError::WrongType { .. })
        ));
    }

    #[tokio::test]
    async fn test_scan_glob() {
        let store = InMemoryStore::new();
        for key in ["p:user:1", "p:user:2", "p:users:1", "p:order:1", "user:id:1"] {
            store.set(key, b"", Expiry::Never).await.unwrap();
        }
        assert_eq!(
            store.scan("p:user:*").await.unwrap(),
            vec!["p:user:1".to_string(), "p:user:2".to_string()]
        );
        assert_eq!(store.scan("p:user?:*").await.unwrap(), vec!["p:users:1".to_string()]);
        assert_eq!(store.scan("p:[ou]*:1").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_scan_escaped_metacharacters() {
        let store = InMemoryStore::new();
        store.set("p:a*:1", b"", Expiry::Never).await.unwrap();
        store.set("p:ab:1", b"", Expiry::Never).await.unwrap();
        assert_eq!(store.scan("p:a\\*:*").await.unwrap(), vec!["p:a*:1".to_string()]);
    }

    #[tokio::test]
    async fn test_blpop_returns_queued_value() {
        let store = InMemoryStore::new();
        store.rpush("q", b"token").await.unwrap();
        let popped = store.blpop("q", Duration::from_millis(10)).await.unwrap();
        assert_eq!(popped, Some(b"token".to_vec()));
        assert!(!store.exists("q").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_blpop_times_out_on_empty_list() {
        let store = InMemoryStore::new();
        let popped = store.blpop("q", Duration::from_millis(50)).await.unwrap();
        assert_eq!(popped, None);
    }

    #[tokio::test]
    async fn test_blpop_wakes_on_push() {
        let store = InMemoryStore::new();
        let waiter = {
            let store = store.clone();
            tokio::spawn(async move { store.blpop("q", Duration::from_secs(5)).await })
        };
        tokio::task::yield_now().await;
        store.rpush("q", b"t").await.unwrap();
        let popped = waiter.await.unwrap().unwrap();
        assert_eq!(popped, Some(b"t".to_vec()));
    }
}
