//! Queue-based one-shot lock.
//!
//! A single token lives in the list `lock:{name}:mutex`. Taking the lock pops
//! it with one bounded blocking wait; releasing pushes it back. The list is
//! seeded lazily: whoever first swaps a value into `lock:{name}:init` pushes
//! the token.

use std::time::Duration;

use rowcache_core::{LockError, RowCacheResult};
use tracing::{debug, warn};

use super::lock_key;
use crate::context::CacheContext;
use crate::store::KeyValueStore;

const TOKEN: &[u8] = b"1";

/// Non-reentrant lock with a fixed wait.
///
/// Unlike [`ReentrantLock`](super::ReentrantLock) there is no holder
/// identity: `unlock` always returns the token, so calling it without
/// holding the lock admits an extra holder.
pub struct QueueLock<S> {
    ctx: CacheContext<S>,
    name: String,
    mutex_key: String,
    init_key: String,
    wait: Duration,
}

impl<S> std::fmt::Debug for QueueLock<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueLock")
            .field("name", &self.name)
            .field("wait", &self.wait)
            .finish()
    }
}

impl<S: KeyValueStore> QueueLock<S> {
    pub fn new(ctx: CacheContext<S>, name: impl Into<String>) -> Self {
        let name = name.into();
        let base = lock_key(&name);
        Self {
            wait: ctx.config().queue_lock_wait,
            mutex_key: format!("{}:mutex", base),
            init_key: format!("{}:init", base),
            name,
            ctx,
        }
    }

    /// Override the blocking wait for this instance.
    pub fn with_wait(mut self, wait: Duration) -> Self {
        self.wait = wait;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    async fn ensure_initialized(&self) -> RowCacheResult<()> {
        let previous = self.ctx.store().getset(&self.init_key, TOKEN).await?;
        if previous.is_none() {
            self.ctx.store().rpush(&self.mutex_key, TOKEN).await?;
            debug!(lock = %self.name, "Seeded queue lock token");
        }
        Ok(())
    }

    /// Take the token, failing with [`LockError::Timeout`] if it does not
    /// arrive within the configured wait.
    pub async fn lock(&self) -> RowCacheResult<()> {
        self.ensure_initialized().await?;
        match self.ctx.store().blpop(&self.mutex_key, self.wait).await? {
            Some(_) => {
                debug!(lock = %self.name, "Queue lock acquired");
                Ok(())
            }
            None => {
                warn!(lock = %self.name, wait_ms = self.wait.as_millis() as u64, "Queue lock timed out");
                Err(LockError::Timeout {
                    name: self.name.clone(),
                    waited: self.wait,
                }
                .into())
            }
        }
    }

    /// Return the token.
    pub async fn unlock(&self) -> RowCacheResult<()> {
        self.ctx.store().rpush(&self.mutex_key, TOKEN).await?;
        debug!(lock = %self.name, "Queue lock released");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use rowcache_core::RowCacheError;

    #[tokio::test(start_paused = true)]
    async fn test_second_holder_times_out() {
        let ctx = CacheContext::<InMemoryStore>::with_defaults();
        let first = ctx.queue_lock("job");
        let second = ctx.queue_lock("job").with_wait(Duration::from_millis(100));

        first.lock().await.unwrap();
        let err = second.lock().await.unwrap_err();
        assert!(matches!(
            err,
            RowCacheError::Lock(LockError::Timeout { ref name, waited })
                if name == "job" && waited == Duration::from_millis(100)
        ));

        first.unlock().await.unwrap();
        second.lock().await.unwrap();
    }

    #[tokio::test]
    async fn test_token_seeded_once() {
        let ctx = CacheContext::<InMemoryStore>::with_defaults();
        let a = ctx.queue_lock("seed");
        let b = ctx.queue_lock("seed").with_wait(Duration::from_millis(10));
        a.lock().await.unwrap();
        a.unlock().await.unwrap();
        b.lock().await.unwrap();
        assert!(!ctx.store().exists("lock:seed:mutex").await.unwrap());
        assert!(ctx.store().exists("lock:seed:init").await.unwrap());
    }
}
