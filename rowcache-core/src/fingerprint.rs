//! Query fingerprints.
//!
//! A fingerprint is the SHA-256 of a query's canonical statement text
//! followed by its bound parameters, sorted by name and rendered as JSON.
//! Identical text and parameter values always produce the same fingerprint,
//! independent of the order in which parameters were bound.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::ValidationError;

/// Separator between the statement text and each rendered parameter.
const FINGERPRINT_SEPARATOR: &str = " ";

/// Characters that may not appear in an explicit cache-key override.
const RESERVED_KEY_CHARS: &[char] = &[':', '*', '?', '[', ']', '|'];

/// Fixed-length digest identifying a query and its parameter values.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryFingerprint(String);

impl QueryFingerprint {
    /// Fingerprint a statement and its bound parameters.
    pub fn compute<'a, I>(statement: &str, parameters: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a Value)>,
    {
        let sorted: BTreeMap<&str, &Value> = parameters.into_iter().collect();

        let mut hasher = Sha256::new();
        hasher.update(statement.as_bytes());
        for (name, value) in sorted {
            hasher.update(FINGERPRINT_SEPARATOR.as_bytes());
            hasher.update(name.as_bytes());
            hasher.update(b"=");
            hasher.update(value.to_string().as_bytes());
        }
        Self(hex::encode(hasher.finalize()))
    }

    /// Fingerprint anything that exposes a compiled statement.
    pub fn of<Q: CompiledStatement + ?Sized>(query: &Q) -> Self {
        let params = query.parameters();
        Self::compute(
            query.statement(),
            params.iter().map(|(k, v)| (k.as_str(), v)),
        )
    }

    /// Accept a caller-chosen cache key in place of a derived fingerprint.
    ///
    /// The key becomes the last segment of `{prefix}:{table}:{key}`, so it may
    /// not be empty, contain whitespace, the key separator, or glob syntax.
    pub fn from_override(key: impl Into<String>) -> Result<Self, ValidationError> {
        let key = key.into();
        if key.is_empty() {
            return Err(ValidationError::RequiredFieldMissing {
                field: "cache_key".to_string(),
            });
        }
        if key
            .chars()
            .any(|c| c.is_whitespace() || RESERVED_KEY_CHARS.contains(&c))
        {
            return Err(ValidationError::InvalidValue {
                field: "cache_key".to_string(),
                reason: format!("'{}' contains whitespace or a reserved character", key),
            });
        }
        Ok(Self(key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueryFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A query compiled by the mapping layer.
///
/// This is the only view of a query the cache needs: the table whose
/// namespace holds its cached results, the canonical statement text, and the
/// bound parameter values.
pub trait CompiledStatement: Send + Sync {
    /// Primary table the query reads; owns the query's cache namespace.
    fn table(&self) -> &str;

    /// Canonical compiled statement text.
    fn statement(&self) -> &str;

    /// Bound parameters by name, in any order.
    fn parameters(&self) -> Vec<(String, Value)>;
}

/// Plain-value compiled query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledQuery {
    pub table: String,
    pub statement: String,
    pub params: BTreeMap<String, Value>,
}

impl CompiledQuery {
    pub fn new(table: impl Into<String>, statement: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            statement: statement.into(),
            params: BTreeMap::new(),
        }
    }

    /// Bind a named parameter.
    pub fn bind(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn fingerprint(&self) -> QueryFingerprint {
        QueryFingerprint::of(self)
    }
}

impl CompiledStatement for CompiledQuery {
    fn table(&self) -> &str {
        &self.table
    }

    fn statement(&self) -> &str {
        &self.statement
    }

    fn parameters(&self) -> Vec<(String, Value)> {
        self.params
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}
