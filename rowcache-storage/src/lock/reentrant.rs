//! Reentrant distributed lock.

use std::future::Future;
use std::time::Duration;

use rowcache_core::{HolderId, LockError, RowCacheResult};
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use super::{lock_key, AcquireOutcome, LockOutcome, UnlockOutcome};
use crate::context::CacheContext;
use crate::store::{HoldRelease, KeyTtl, KeyValueStore};

/// Reentrant lock identified by name.
///
/// Each instance carries its own [`HolderId`], so reentrancy is per
/// instance: two instances in the same process contend like two processes.
pub struct ReentrantLock<S> {
    ctx: CacheContext<S>,
    name: String,
    key: String,
    holder: HolderId,
    holder_field: String,
    timeout: Duration,
}

impl<S> std::fmt::Debug for ReentrantLock<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReentrantLock")
            .field("name", &self.name)
            .field("holder", &self.holder)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl<S: KeyValueStore> ReentrantLock<S> {
    pub fn new(ctx: CacheContext<S>, name: impl Into<String>) -> Self {
        let name = name.into();
        let holder = HolderId::new();
        Self {
            timeout: ctx.config().lock_timeout,
            key: lock_key(&name),
            holder_field: holder.as_field(),
            holder,
            name,
            ctx,
        }
    }

    /// Override the record expiry for this instance.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn holder(&self) -> HolderId {
        self.holder
    }

    fn ttl_ms(&self) -> u64 {
        u64::try_from(self.timeout.as_millis())
            .unwrap_or(u64::MAX)
            .max(1)
    }

    /// Try once to take or re-enter the lock.
    ///
    /// Creation and reentry are each a single atomic store step, so a record
    /// that expires and changes hands between them is seen as held.
    pub async fn acquire(&self) -> RowCacheResult<AcquireOutcome> {
        let store = self.ctx.store();
        let ttl_ms = self.ttl_ms();

        if store
            .hash_init(&self.key, &self.holder_field, 1, ttl_ms)
            .await?
        {
            debug!(lock = %self.name, holder = %self.holder, "Lock acquired");
            return Ok(AcquireOutcome::Acquired);
        }
        if let Some(count) = store
            .lock_reenter(&self.key, &self.holder_field, ttl_ms)
            .await?
        {
            debug!(lock = %self.name, holder = %self.holder, count, "Lock re-entered");
            return Ok(AcquireOutcome::Acquired);
        }

        // Held by someone else, or the record vanished since the create.
        let remaining = match store.pttl(&self.key).await? {
            KeyTtl::Millis(ms) => Duration::from_millis(ms),
            KeyTtl::Missing | KeyTtl::Persistent => Duration::ZERO,
        };
        trace!(lock = %self.name, remaining_ms = remaining.as_millis() as u64, "Lock held elsewhere");
        Ok(AcquireOutcome::Held { remaining })
    }

    /// Poll until the lock is taken or `deadline` has elapsed.
    ///
    /// Between attempts the task sleeps for the holder's remaining TTL,
    /// no shorter than the configured poll floor and no longer than the
    /// time left before the deadline.
    pub async fn lock(&self, deadline: Duration) -> RowCacheResult<LockOutcome> {
        let started = Instant::now();
        let deadline_at = started + deadline;
        let floor = self.ctx.config().lock_poll_floor;

        loop {
            match self.acquire().await? {
                AcquireOutcome::Acquired => return Ok(LockOutcome::Acquired),
                AcquireOutcome::Held { remaining } => {
                    let now = Instant::now();
                    if now >= deadline_at {
                        debug!(
                            lock = %self.name,
                            waited_ms = now.duration_since(started).as_millis() as u64,
                            "Lock deadline exceeded"
                        );
                        return Ok(LockOutcome::DeadlineExceeded);
                    }
                    let pause = remaining.max(floor).min(deadline_at - now);
                    trace!(lock = %self.name, pause_ms = pause.as_millis() as u64, "Waiting for lock");
                    tokio::time::sleep(pause).await;
                }
            }
        }
    }

    /// Release one acquisition.
    pub async fn unlock(&self) -> RowCacheResult<UnlockOutcome> {
        let released = self
            .ctx
            .store()
            .lock_release(&self.key, &self.holder_field, self.ttl_ms())
            .await?;

        Ok(match released {
            HoldRelease::Missing => UnlockOutcome::NotLocked,
            HoldRelease::NotHeld => {
                debug!(lock = %self.name, holder = %self.holder, "Unlock by non-holder ignored");
                UnlockOutcome::NotHeld
            }
            HoldRelease::Remaining(0) => {
                debug!(lock = %self.name, holder = %self.holder, "Lock released");
                UnlockOutcome::FullyReleased
            }
            HoldRelease::Remaining(count) => {
                debug!(lock = %self.name, holder = %self.holder, count, "Lock partially released");
                UnlockOutcome::PartiallyReleased {
                    remaining_count: count,
                }
            }
        })
    }

    /// This holder's current reentrancy count (0 when not held).
    pub async fn hold_count(&self) -> RowCacheResult<u64> {
        let count = self
            .ctx
            .store()
            .hget(&self.key, &self.holder_field)
            .await?
            .unwrap_or(0);
        Ok(count.max(0) as u64)
    }

    /// Run `f` while holding the lock, releasing it afterwards whatever `f`
    /// returns.
    pub async fn with_lock<F, Fut, T>(&self, deadline: Duration, f: F) -> RowCacheResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = RowCacheResult<T>>,
    {
        if !self.lock(deadline).await?.is_acquired() {
            return Err(LockError::DeadlineExceeded {
                name: self.name.clone(),
                deadline,
            }
            .into());
        }

        let result = f().await;
        match (result, self.unlock().await) {
            (Ok(value), Ok(_)) => Ok(value),
            (Ok(_), Err(unlock_err)) => Err(unlock_err),
            (Err(e), Ok(_)) => Err(e),
            (Err(e), Err(unlock_err)) => {
                warn!(lock = %self.name, error = %unlock_err, "Unlock failed after error in critical section");
                Err(e)
            }
        }
    }
}
