//! Query result cache.
//!
//! Results are cached cache-aside: the caller (usually the
//! [`QueryCache`](crate::query::QueryCache) facade) checks the cache, runs the
//! query on a miss, and writes the rows back. Staleness is bounded by TTL and
//! by the invalidation bridge; nothing here talks to the backing database.
//!
//! # Key layout
//!
//! ```text
//! {prefix}:{table}:{fingerprint}   ->  tagged blob "t:id:1|t:id:2|..."
//! {table}:{pk-column}:{pk-value}   ->  tagged blob (row as JSON)
//! ```

pub mod codec;
pub mod read;
pub mod result_cache;
pub mod stats;

pub use codec::Payload;
pub use read::CacheRead;
pub use result_cache::{ResultCache, RowSet};
pub use stats::CacheStats;
