//! Redis-backed store.
//!
//! Uses a [`ConnectionManager`], which reconnects transparently and is cheap
//! to clone; each operation clones it and issues one command. Lock record
//! creation, reentry and release run as Lua scripts so each check and its
//! write happen atomically on the server.
//!
//! The manager multiplexes every command over one socket, so a blocking pop
//! on it would hold up all other traffic from the process, including the
//! push that would satisfy it. `blpop` therefore runs on a connection of its
//! own.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, RedisError, Script};
use rowcache_core::{DurationMs, Expiry, RowCacheResult, StoreError};
use std::time::Duration;
use tracing::debug;

use super::{HoldRelease, KeyTtl, KeyValueStore};

/// Keys fetched per SCAN round-trip.
const SCAN_BATCH: usize = 500;

const HASH_INIT_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 1 then
    return 0
end
redis.call('HSET', KEYS[1], ARGV[1], ARGV[2])
redis.call('PEXPIRE', KEYS[1], ARGV[3])
return 1
"#;

const LOCK_REENTER_SCRIPT: &str = r#"
if redis.call('HEXISTS', KEYS[1], ARGV[1]) == 0 then
    return -1
end
local count = redis.call('HINCRBY', KEYS[1], ARGV[1], 1)
redis.call('PEXPIRE', KEYS[1], ARGV[2])
return count
"#;

const LOCK_RELEASE_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 0 then
    return -2
end
if redis.call('HEXISTS', KEYS[1], ARGV[1]) == 0 then
    return -1
end
local count = redis.call('HINCRBY', KEYS[1], ARGV[1], -1)
if count > 0 then
    redis.call('PEXPIRE', KEYS[1], ARGV[2])
    return count
end
redis.call('DEL', KEYS[1])
return 0
"#;

fn backend(operation: &'static str) -> impl FnOnce(RedisError) -> StoreError {
    move |e| {
        if e.is_io_error() || e.is_connection_refusal() || e.is_timeout() {
            StoreError::Unavailable {
                reason: format!("{}: {}", operation, e),
            }
        } else {
            StoreError::backend(operation, e)
        }
    }
}

/// Store adapter for a Redis (or protocol-compatible) server.
#[derive(Clone)]
pub struct RedisStore {
    client: Client,
    conn: ConnectionManager,
    hash_init: Script,
    lock_reenter: Script,
    lock_release: Script,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore").finish_non_exhaustive()
    }
}

impl RedisStore {
    /// Connect to the server at `url` (`redis://host:port/db`).
    pub async fn connect(url: &str) -> RowCacheResult<Self> {
        let client = Client::open(url).map_err(|e| StoreError::InvalidArgument {
            operation: "connect".to_string(),
            reason: e.to_string(),
        })?;
        let store = Self::from_client(client).await?;
        debug!(url = %url, "Connected to redis store");
        Ok(store)
    }

    /// Open the shared connection manager for `client`.
    pub async fn from_client(client: Client) -> RowCacheResult<Self> {
        let conn = ConnectionManager::new(client.clone())
            .await
            .map_err(backend("connect"))?;
        Ok(Self {
            client,
            conn,
            hash_init: Script::new(HASH_INIT_SCRIPT),
            lock_reenter: Script::new(LOCK_REENTER_SCRIPT),
            lock_release: Script::new(LOCK_RELEASE_SCRIPT),
        })
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn exists(&self, key: &str) -> RowCacheResult<bool> {
        let mut conn = self.conn.clone();
        let found: bool = redis::cmd("EXISTS")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(backend("EXISTS"))?;
        Ok(found)
    }

    async fn get(&self, key: &str) -> RowCacheResult<Option<Vec<u8>>> {
        let mut conn = self.conn.clone();
        let value: Option<Vec<u8>> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(backend("GET"))?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &[u8], expiry: Expiry) -> RowCacheResult<()> {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ms) = expiry.as_millis() {
            cmd.arg("PX").arg(ms);
        }
        let () = cmd.query_async(&mut conn).await.map_err(backend("SET"))?;
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &[u8]) -> RowCacheResult<bool> {
        let mut conn = self.conn.clone();
        let written: bool = redis::cmd("SETNX")
            .arg(key)
            .arg(value)
            .query_async(&mut conn)
            .await
            .map_err(backend("SETNX"))?;
        Ok(written)
    }

    async fn getset(&self, key: &str, value: &[u8]) -> RowCacheResult<Option<Vec<u8>>> {
        let mut conn = self.conn.clone();
        let previous: Option<Vec<u8>> = redis::cmd("GETSET")
            .arg(key)
            .arg(value)
            .query_async(&mut conn)
            .await
            .map_err(backend("GETSET"))?;
        Ok(previous)
    }

    async fn delete(&self, keys: &[String]) -> RowCacheResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.clone();
        let removed: u64 = redis::cmd("DEL")
            .arg(keys)
            .query_async(&mut conn)
            .await
            .map_err(backend("DEL"))?;
        Ok(removed)
    }

    async fn hset(&self, key: &str, field: &str, value: i64) -> RowCacheResult<()> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("HSET")
            .arg(key)
            .arg(field)
            .arg(value)
            .query_async(&mut conn)
            .await
            .map_err(backend("HSET"))?;
        Ok(())
    }

    async fn hget(&self, key: &str, field: &str) -> RowCacheResult<Option<i64>> {
        let mut conn = self.conn.clone();
        let value: Option<i64> = redis::cmd("HGET")
            .arg(key)
            .arg(field)
            .query_async(&mut conn)
            .await
            .map_err(backend("HGET"))?;
        Ok(value)
    }

    async fn hexists(&self, key: &str, field: &str) -> RowCacheResult<bool> {
        let mut conn = self.conn.clone();
        let found: bool = redis::cmd("HEXISTS")
            .arg(key)
            .arg(field)
            .query_async(&mut conn)
            .await
            .map_err(backend("HEXISTS"))?;
        Ok(found)
    }

    async fn hincr_by(&self, key: &str, field: &str, delta: i64) -> RowCacheResult<i64> {
        let mut conn = self.conn.clone();
        let value: i64 = redis::cmd("HINCRBY")
            .arg(key)
            .arg(field)
            .arg(delta)
            .query_async(&mut conn)
            .await
            .map_err(backend("HINCRBY"))?;
        Ok(value)
    }

    async fn hash_init(
        &self,
        key: &str,
        field: &str,
        value: i64,
        ttl_ms: DurationMs,
    ) -> RowCacheResult<bool> {
        let mut conn = self.conn.clone();
        let created: i64 = self
            .hash_init
            .key(key)
            .arg(field)
            .arg(value)
            .arg(ttl_ms)
            .invoke_async(&mut conn)
            .await
            .map_err(backend("EVALSHA"))?;
        Ok(created == 1)
    }

    async fn lock_reenter(
        &self,
        key: &str,
        field: &str,
        ttl_ms: DurationMs,
    ) -> RowCacheResult<Option<i64>> {
        let mut conn = self.conn.clone();
        let count: i64 = self
            .lock_reenter
            .key(key)
            .arg(field)
            .arg(ttl_ms)
            .invoke_async(&mut conn)
            .await
            .map_err(backend("EVALSHA"))?;
        Ok((count > 0).then_some(count))
    }

    async fn lock_release(
        &self,
        key: &str,
        field: &str,
        ttl_ms: DurationMs,
    ) -> RowCacheResult<HoldRelease> {
        let mut conn = self.conn.clone();
        let reply: i64 = self
            .lock_release
            .key(key)
            .arg(field)
            .arg(ttl_ms)
            .invoke_async(&mut conn)
            .await
            .map_err(backend("EVALSHA"))?;
        Ok(match reply {
            -2 => HoldRelease::Missing,
            r if r < 0 => HoldRelease::NotHeld,
            r => HoldRelease::Remaining(r as u64),
        })
    }

    async fn pexpire(&self, key: &str, ttl_ms: DurationMs) -> RowCacheResult<bool> {
        let mut conn = self.conn.clone();
        let applied: bool = redis::cmd("PEXPIRE")
            .arg(key)
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await
            .map_err(backend("PEXPIRE"))?;
        Ok(applied)
    }

    async fn pttl(&self, key: &str) -> RowCacheResult<KeyTtl> {
        let mut conn = self.conn.clone();
        let reply: i64 = redis::cmd("PTTL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(backend("PTTL"))?;
        Ok(KeyTtl::from_reply(reply))
    }

    async fn scan(&self, pattern: &str) -> RowCacheResult<Vec<String>> {
        let mut conn = self.conn.clone();
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await
                .map_err(backend("SCAN"))?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        // SCAN may return a key more than once across iterations.
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    async fn rpush(&self, key: &str, value: &[u8]) -> RowCacheResult<u64> {
        let mut conn = self.conn.clone();
        let len: u64 = redis::cmd("RPUSH")
            .arg(key)
            .arg(value)
            .query_async(&mut conn)
            .await
            .map_err(backend("RPUSH"))?;
        Ok(len)
    }

    async fn blpop(&self, key: &str, timeout: Duration) -> RowCacheResult<Option<Vec<u8>>> {
        // BLPOP treats 0 as "block forever"; a zero wait is a plain pop.
        if timeout.is_zero() {
            let mut conn = self.conn.clone();
            let head: Option<Vec<u8>> = redis::cmd("LPOP")
                .arg(key)
                .query_async(&mut conn)
                .await
                .map_err(backend("LPOP"))?;
            return Ok(head);
        }
        let mut blocking = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(backend("BLPOP"))?;
        let popped: Option<(String, Vec<u8>)> = redis::cmd("BLPOP")
            .arg(key)
            .arg(timeout.as_secs_f64())
            .query_async(&mut blocking)
            .await
            .map_err(backend("BLPOP"))?;
        Ok(popped.map(|(_, value)| value))
    }

    async fn ping(&self) -> RowCacheResult<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(backend("PING"))?;
        Ok(())
    }
}
