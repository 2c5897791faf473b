//! Row identity: primary keys, row keys, and the cacheable-row capability.
//!
//! A cached row lives under exactly one key, `{table}:{pk-column}:{pk-value}`.
//! Query results never embed row values; they reference these keys, so a
//! refreshed row is visible to every cached result that points at it.

use serde::{de::DeserializeOwned, Serialize};
use std::fmt;

/// Separator between the components of a row key.
pub const ROW_KEY_SEPARATOR: char = ':';

/// Joins column names and values of a composite primary key.
pub const COMPOSITE_KEY_JOINER: char = '+';

/// Delimiter between row keys inside a composite cache entry.
pub const ROW_LIST_DELIMITER: char = '|';

/// Primary key of a row: one or more columns with their rendered values.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PrimaryKey {
    columns: Vec<String>,
    values: Vec<String>,
}

impl PrimaryKey {
    /// Single-column primary key.
    pub fn single(column: impl Into<String>, value: impl ToString) -> Self {
        Self {
            columns: vec![column.into()],
            values: vec![value.to_string()],
        }
    }

    /// Multi-column primary key, in declaration order.
    pub fn composite<I, C, V>(parts: I) -> Self
    where
        I: IntoIterator<Item = (C, V)>,
        C: Into<String>,
        V: ToString,
    {
        let (columns, values) = parts
            .into_iter()
            .map(|(c, v)| (c.into(), v.to_string()))
            .unzip();
        Self { columns, values }
    }

    /// Column part of the row key (`id`, or `a+b` for composite keys), with
    /// each part escaped.
    pub fn column(&self) -> String {
        join(&self.columns)
    }

    /// Value part of the row key (`1`, or `1+2` for composite keys), with
    /// each part escaped.
    pub fn value(&self) -> String {
        join(&self.values)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[String] {
        &self.values
    }

    pub fn is_composite(&self) -> bool {
        self.columns.len() > 1
    }
}

/// Join escaped parts, so a joiner inside a value cannot fake a boundary.
fn join(parts: &[String]) -> String {
    let mut out = String::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            out.push(COMPOSITE_KEY_JOINER);
        }
        out.push_str(&escape_component(part));
    }
    out
}

/// Escape characters that would break the row-list encoding or the joining
/// of composite key parts.
fn escape_component(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '%' => out.push_str("%25"),
            ROW_LIST_DELIMITER => out.push_str("%7C"),
            COMPOSITE_KEY_JOINER => out.push_str("%2B"),
            _ => out.push(ch),
        }
    }
    out
}

/// Escape only the row-list delimiter; rendered parts are otherwise kept.
fn escape_delimiter(rendered: &str) -> String {
    rendered.replace(ROW_LIST_DELIMITER, "%7C")
}

/// Store key of a single cached row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RowKey(String);

impl RowKey {
    /// Row key for a table and primary key.
    pub fn new(table: &str, pk: &PrimaryKey) -> Self {
        Self::for_value(table, &pk.column(), &pk.value())
    }

    /// Row key from column and value parts already rendered by
    /// [`PrimaryKey::column`] and [`PrimaryKey::value`].
    ///
    /// Used by delete notifications, which carry key values without the row.
    pub fn for_value(table: &str, column: &str, value: &str) -> Self {
        Self(format!(
            "{}{sep}{}{sep}{}",
            escape_component(table),
            escape_delimiter(column),
            escape_delimiter(value),
            sep = ROW_KEY_SEPARATOR,
        ))
    }

    /// Rebuild a row key read back from a composite entry.
    ///
    /// Returns `None` for an empty or delimiter-bearing string.
    pub fn parse(raw: &str) -> Option<Self> {
        if raw.is_empty() || raw.contains(ROW_LIST_DELIMITER) {
            return None;
        }
        Some(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RowKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Capability implemented by every row type that participates in caching.
///
/// Replaces implicit declaration-time wiring: a type is cacheable because it
/// implements this trait, and it receives invalidation because it was
/// registered with the bridge explicitly.
///
/// # Implementation Requirements
///
/// - `table()` must return the same name for all instances
/// - `primary_key()` must identify the row uniquely within its table
/// - Serialization must round-trip; the cache stores the `serde_json` form
pub trait CacheableRow: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Table (collection) name this row belongs to.
    fn table() -> &'static str;

    /// Primary key of this row.
    fn primary_key(&self) -> PrimaryKey;

    /// Store key of this row.
    fn row_key(&self) -> RowKey {
        RowKey::new(Self::table(), &self.primary_key())
    }
}
