//! Identity types for lock holders

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Duration in milliseconds, as reported by the store's remaining-TTL query.
pub type DurationMs = u64;

/// Process-unique identifier of a lock holder.
///
/// Uses UUIDv7 so identifiers seen in the store sort by creation time, which
/// makes stuck lock records easier to attribute when inspecting the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HolderId(Uuid);

impl HolderId {
    /// Generate a fresh holder identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Wrap an existing UUID.
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }

    /// Hash-field name used inside a lock record.
    pub fn as_field(&self) -> String {
        self.0.simple().to_string()
    }
}

impl Default for HolderId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for HolderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_holder_ids_are_unique() {
        let a = HolderId::new();
        let b = HolderId::new();
        assert_ne!(a, b);
        assert_ne!(a.as_field(), b.as_field());
    }

    #[test]
    fn test_holder_field_has_no_separators() {
        let field = HolderId::new().as_field();
        assert_eq!(field.len(), 32);
        assert!(!field.contains('-'));
        assert!(!field.contains(':'));
    }
}
