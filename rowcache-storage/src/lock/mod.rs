//! Distributed locks over the shared store.
//!
//! Processes that share nothing but the store serialize their
//! read-modify-write cycles with these locks. Two variants exist:
//!
//! - [`ReentrantLock`]: a holder-count hash at `lock:{name}` with a
//!   millisecond TTL, acquired by polling until a caller deadline
//! - [`QueueLock`]: a single token circulating through the list
//!   `lock:{name}:mutex`, taken with one bounded blocking pop
//!
//! # Reentrant lock lifecycle
//!
//! ```text
//! (absent) ── acquire ──> {holder: 1} ── acquire ──> {holder: 2}
//!                              ^                          │
//!                              └──────── unlock ──────────┘
//! {holder: 1} ── unlock ──> (absent)
//! ```
//!
//! Acquisition is a busy poll with no fairness: under sustained contention a
//! waiter can starve. Every successful acquire refreshes the record's TTL, so
//! a crashed holder blocks others for at most one lock timeout.

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub mod queue;
pub mod reentrant;

pub use queue::QueueLock;
pub use reentrant::ReentrantLock;

/// Result of a single acquisition attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AcquireOutcome {
    /// The caller now holds the lock (possibly reentrantly).
    Acquired,
    /// Another holder has it; `remaining` is the record's remaining TTL at
    /// millisecond resolution (zero if the record vanished or never expires).
    Held { remaining: Duration },
}

impl AcquireOutcome {
    pub fn is_acquired(&self) -> bool {
        matches!(self, AcquireOutcome::Acquired)
    }
}

/// Result of a deadline-bounded blocking acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LockOutcome {
    Acquired,
    DeadlineExceeded,
}

impl LockOutcome {
    pub fn is_acquired(&self) -> bool {
        matches!(self, LockOutcome::Acquired)
    }
}

/// Result of releasing a reentrant lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnlockOutcome {
    /// No lock record exists; nothing to release.
    NotLocked,
    /// The record belongs to another holder; left untouched.
    NotHeld,
    /// This holder still has outstanding acquisitions.
    PartiallyReleased { remaining_count: u64 },
    /// The last acquisition was released and the record deleted.
    FullyReleased,
}

/// Store key of a reentrant lock record.
pub fn lock_key(name: &str) -> String {
    format!("lock:{}", name)
}
