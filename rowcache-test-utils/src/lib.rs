//! rowcache Test Utilities
//!
//! Shared test infrastructure for the rowcache workspace:
//! - Proptest generators for keys, queries and rows
//! - Sample row types and an in-memory backing table standing in for a database
//! - Custom assertions for rowcache error variants
//! - Tracing setup for tests

pub use rowcache_core::{
    CacheableRow, CompiledQuery, Expiry, HookFailurePolicy, KeyHistory, LockError,
    MutationEvent, PrimaryKey, QueryFingerprint, RowCacheConfig, RowCacheError, RowCacheResult,
    RowKey, StoreError, ValidationError,
};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ============================================================================
// TRACING
// ============================================================================

/// Install a fmt subscriber filtered by `RUST_LOG` (default `warn`).
///
/// Safe to call from every test; only the first call installs anything.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

// ============================================================================
// SAMPLE ROWS
// ============================================================================

/// Row of the `user` table, keyed by `id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub val: i64,
}

impl User {
    pub fn new(id: i64, name: impl Into<String>, val: i64) -> Self {
        Self {
            id,
            name: name.into(),
            val,
        }
    }
}

impl CacheableRow for User {
    fn table() -> &'static str {
        "user"
    }

    fn primary_key(&self) -> PrimaryKey {
        PrimaryKey::single("id", self.id)
    }
}

/// Row of the `membership` table, keyed by `(group_id, user_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    pub group_id: i64,
    pub user_id: i64,
    pub role: String,
}

impl CacheableRow for Membership {
    fn table() -> &'static str {
        "membership"
    }

    fn primary_key(&self) -> PrimaryKey {
        PrimaryKey::composite([("group_id", self.group_id), ("user_id", self.user_id)])
    }
}

// ============================================================================
// GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for rowcache inputs.

    use super::*;
    use proptest::prelude::*;

    /// Table names that are valid key segments.
    pub fn arb_table() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9_]{0,15}"
    }

    /// Raw primary key values, including characters the row key format escapes.
    pub fn arb_pk_value() -> impl Strategy<Value = String> {
        prop_oneof![
            any::<i64>().prop_map(|v| v.to_string()),
            "[A-Za-z0-9_+|%-]{1,24}",
        ]
    }

    /// Cache key overrides accepted by [`QueryFingerprint::from_override`].
    pub fn arb_cache_key() -> impl Strategy<Value = String> {
        "[A-Za-z0-9_.-]{1,32}"
    }

    /// Scalar parameter values bound into queries.
    pub fn arb_param_value() -> impl Strategy<Value = serde_json::Value> {
        prop_oneof![
            any::<i64>().prop_map(serde_json::Value::from),
            any::<bool>().prop_map(serde_json::Value::from),
            "[ -~]{0,16}".prop_map(serde_json::Value::from),
            Just(serde_json::Value::Null),
        ]
    }

    /// Named parameter sets, unique by name.
    pub fn arb_params() -> impl Strategy<Value = BTreeMap<String, serde_json::Value>> {
        prop::collection::btree_map("[a-z]{1,8}", arb_param_value(), 0..6)
    }

    /// A compiled query with its table, statement and parameters.
    pub fn arb_compiled_query() -> impl Strategy<Value = CompiledQuery> {
        (arb_table(), "SELECT [a-z *,]{1,24}", arb_params()).prop_map(|(table, stmt, params)| {
            params
                .into_iter()
                .fold(CompiledQuery::new(table, stmt), |q, (k, v)| q.bind(k, v))
        })
    }

    /// Expiries from one millisecond up to an hour, or none.
    pub fn arb_expiry() -> impl Strategy<Value = Expiry> {
        prop_oneof![
            1 => Just(Expiry::Never),
            4 => (1u64..3_600_000).prop_map(|ms| Expiry::After(Duration::from_millis(ms))),
        ]
    }

    pub fn arb_user() -> impl Strategy<Value = User> {
        (any::<i64>(), "[a-z]{1,12}", any::<i64>()).prop_map(|(id, name, val)| User { id, name, val })
    }

    /// Users with distinct ids.
    pub fn arb_users(max: usize) -> impl Strategy<Value = Vec<User>> {
        prop::collection::btree_map(any::<i64>(), ("[a-z]{1,12}", any::<i64>()), 0..=max)
            .prop_map(|m| {
                m.into_iter()
                    .map(|(id, (name, val))| User { id, name, val })
                    .collect()
            })
    }

    /// Arbitrary bytes, including ones that look like tagged payloads.
    pub fn arb_payload_bytes() -> impl Strategy<Value = Vec<u8>> {
        prop_oneof![
            prop::collection::vec(any::<u8>(), 0..64),
            (prop_oneof![Just(0x01u8), Just(0x02u8)], prop::collection::vec(any::<u8>(), 0..64))
                .prop_map(|(tag, mut rest)| {
                    rest.insert(0, tag);
                    rest
                }),
        ]
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built test fixtures for common testing scenarios.

    use super::*;

    /// Config with short lock timings so contention tests finish quickly.
    pub fn fast_config() -> RowCacheConfig {
        RowCacheConfig::default()
            .with_lock_timeout(Duration::from_secs(1))
            .with_lock_poll_floor(Duration::from_millis(5))
            .with_queue_lock_wait(Duration::from_millis(200))
    }

    /// `SELECT * FROM user WHERE name = :name`
    pub fn users_named(name: &str) -> CompiledQuery {
        CompiledQuery::new("user", "SELECT * FROM user WHERE name = :name").bind("name", name)
    }

    /// `SELECT * FROM user WHERE val > :min`
    pub fn users_above(min: i64) -> CompiledQuery {
        CompiledQuery::new("user", "SELECT * FROM user WHERE val > :min").bind("min", min)
    }

    pub fn sample_users() -> Vec<User> {
        vec![
            User::new(1, "root", 10),
            User::new(2, "alice", 5),
            User::new(3, "bob", 7),
        ]
    }

    /// In-memory stand-in for the database table behind the cache.
    ///
    /// Counts how many times it is queried, so tests can tell cache hits
    /// from materializations.
    #[derive(Debug, Clone, Default)]
    pub struct FakeTable {
        rows: Arc<Mutex<BTreeMap<i64, User>>>,
        loads: Arc<AtomicUsize>,
    }

    impl FakeTable {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_rows(rows: impl IntoIterator<Item = User>) -> Self {
            let table = Self::new();
            for row in rows {
                table.upsert(row);
            }
            table
        }

        pub fn upsert(&self, row: User) {
            if let Ok(mut rows) = self.rows.lock() {
                rows.insert(row.id, row);
            }
        }

        pub fn remove(&self, id: i64) -> Option<User> {
            self.rows.lock().ok().and_then(|mut rows| rows.remove(&id))
        }

        pub fn get(&self, id: i64) -> Option<User> {
            self.rows.lock().ok().and_then(|rows| rows.get(&id).cloned())
        }

        /// Rows matching `predicate`, in id order. Counts as one load.
        pub fn select(&self, predicate: impl Fn(&User) -> bool) -> RowCacheResult<Vec<User>> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            let rows = self.rows.lock().map_err(|_| StoreError::LockPoisoned)?;
            Ok(rows.values().filter(|u| predicate(u)).cloned().collect())
        }

        pub fn loads(&self) -> usize {
            self.loads.load(Ordering::SeqCst)
        }
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions on rowcache error variants.

    use super::*;

    #[track_caller]
    pub fn assert_ok<T: std::fmt::Debug>(result: &RowCacheResult<T>) {
        assert!(result.is_ok(), "Expected Ok, got Err: {:?}", result);
    }

    #[track_caller]
    pub fn assert_store_error<T: std::fmt::Debug>(result: &RowCacheResult<T>) {
        match result {
            Err(RowCacheError::Store(_)) => {}
            other => panic!("Expected Store error, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_lock_timeout<T: std::fmt::Debug>(result: &RowCacheResult<T>, lock_name: &str) {
        match result {
            Err(RowCacheError::Lock(LockError::Timeout { name, .. })) => {
                assert_eq!(name, lock_name, "Wrong lock name in Timeout");
            }
            other => panic!("Expected lock Timeout for {}, got: {:?}", lock_name, other),
        }
    }

    #[track_caller]
    pub fn assert_incompatible_options<T: std::fmt::Debug>(result: &RowCacheResult<T>) {
        match result {
            Err(RowCacheError::Validation(ValidationError::IncompatibleOptions { .. })) => {}
            other => panic!("Expected IncompatibleOptions, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_config_error<T: std::fmt::Debug>(result: &RowCacheResult<T>) {
        match result {
            Err(RowCacheError::Config(_)) => {}
            other => panic!("Expected Config error, got: {:?}", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_fast_config_is_valid() {
        assertions::assert_ok(&fixtures::fast_config().validate());
    }

    #[test]
    fn test_user_row_key() {
        let user = User::new(7, "root", 1);
        assert_eq!(RowKey::new(User::table(), &user.primary_key()).as_str(), "user:id:7");
    }

    #[test]
    fn test_membership_composite_key() {
        let m = Membership {
            group_id: 3,
            user_id: 9,
            role: "admin".to_string(),
        };
        assert_eq!(
            RowKey::new(Membership::table(), &m.primary_key()).as_str(),
            "membership:group_id+user_id:3+9"
        );
    }

    #[test]
    fn test_fake_table_counts_loads() {
        let table = fixtures::FakeTable::with_rows(fixtures::sample_users());
        let rich = table.select(|u| u.val > 6).unwrap();
        assert_eq!(rich.iter().map(|u| u.id).collect::<Vec<_>>(), vec![1, 3]);
        table.upsert(User::new(2, "alice", 50));
        assert_eq!(table.select(|u| u.val > 6).unwrap().len(), 3);
        assert_eq!(table.remove(1).map(|u| u.name), Some("root".to_string()));
        assert!(table.get(1).is_none());
        assert_eq!(table.loads(), 2);
    }

    #[test]
    fn test_fixture_queries_differ_by_parameter() {
        assert_ne!(
            fixtures::users_named("root").fingerprint(),
            fixtures::users_named("alice").fingerprint()
        );
        assert_eq!(
            fixtures::users_above(1).fingerprint(),
            fixtures::users_above(1).fingerprint()
        );
    }

    proptest! {
        #[test]
        fn prop_generated_cache_keys_accepted(key in generators::arb_cache_key()) {
            prop_assert!(QueryFingerprint::from_override(key).is_ok());
        }

        #[test]
        fn prop_distinct_composite_keys_never_collide(
            table in generators::arb_table(),
            a in (generators::arb_pk_value(), generators::arb_pk_value()),
            b in (generators::arb_pk_value(), generators::arb_pk_value()),
        ) {
            let pk = |(x, y): (String, String)| PrimaryKey::composite([("a", x), ("b", y)]);
            let same = a == b;
            let (ka, kb) = (RowKey::new(&table, &pk(a)), RowKey::new(&table, &pk(b)));
            prop_assert_eq!(ka == kb, same);
            prop_assert!(RowKey::parse(ka.as_str()).is_some());
        }

        #[test]
        fn prop_generated_users_have_distinct_ids(users in generators::arb_users(8)) {
            let mut ids: Vec<i64> = users.iter().map(|u| u.id).collect();
            ids.dedup();
            prop_assert_eq!(ids.len(), users.len());
        }

        #[test]
        fn prop_generated_expiry_has_millis(expiry in generators::arb_expiry()) {
            match expiry {
                Expiry::Never => prop_assert!(expiry.as_millis().is_none()),
                Expiry::After(_) => prop_assert!(expiry.as_millis().unwrap_or(0) >= 1),
            }
        }
    }
}
