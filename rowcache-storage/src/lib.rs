//! rowcache storage - cache, invalidation and locks over a shared store
//!
//! Everything here talks to a [`KeyValueStore`]. Components are reached
//! through a [`CacheContext`]:
//!
//! - [`ResultCache`]: fingerprint-keyed composite entries over shared row records
//! - [`QueryCache`]: get-or-materialize facade over the result cache
//! - [`InvalidationBridge`]: turns mutation notifications into evictions
//! - [`ReentrantLock`] / [`QueueLock`]: mutual exclusion between processes
//!
//! The crate logs through `tracing` and never installs a subscriber.

pub mod cache;
pub mod context;
pub mod invalidation;
pub mod lock;
pub mod query;
pub mod store;

pub use cache::{CacheRead, CacheStats, Payload, ResultCache, RowSet};
pub use context::CacheContext;
pub use invalidation::{InvalidationBridge, InvalidationReport, MutationListener};
pub use lock::{AcquireOutcome, LockOutcome, QueueLock, ReentrantLock, UnlockOutcome};
pub use query::{QueryCache, QueryOptions};
pub use store::{escape_glob, HoldRelease, InMemoryStore, KeyTtl, KeyValueStore};

#[cfg(feature = "redis")]
pub use store::RedisStore;
