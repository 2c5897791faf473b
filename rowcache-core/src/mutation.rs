//! Mutation notifications delivered by the mapping layer before a write.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;

use crate::error::CodecError;
use crate::row::{CacheableRow, RowKey};

/// Lifecycle point a notification was raised at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MutationKind {
    BeforeInsert,
    BeforeUpdate,
    BeforeDelete,
}

impl MutationKind {
    /// Whether this mutation sweeps every cached query result of the table.
    ///
    /// Inserts and deletes can change the membership of any predicate, so
    /// they evict the whole table namespace. Updates only refresh the row.
    pub fn sweeps_table(&self) -> bool {
        matches!(self, MutationKind::BeforeInsert | MutationKind::BeforeDelete)
    }
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MutationKind::BeforeInsert => "before_insert",
            MutationKind::BeforeUpdate => "before_update",
            MutationKind::BeforeDelete => "before_delete",
        };
        f.write_str(s)
    }
}

/// Primary-key value history from the change tracker.
///
/// Values are rendered the same way as [`crate::PrimaryKey::value`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyHistory {
    /// Values present after the change.
    pub added: Vec<String>,
    /// Values untouched by the change.
    pub unchanged: Vec<String>,
    /// Values present before the change.
    pub deleted: Vec<String>,
}

impl KeyHistory {
    /// History for a key that did not change.
    pub fn unchanged(value: impl ToString) -> Self {
        Self {
            unchanged: vec![value.to_string()],
            ..Default::default()
        }
    }

    /// History for a key whose value changed from `before` to `after`.
    pub fn changed(before: impl ToString, after: impl ToString) -> Self {
        Self {
            added: vec![after.to_string()],
            deleted: vec![before.to_string()],
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.unchanged.is_empty() && self.deleted.is_empty()
    }

    /// Every value mentioned, deduplicated and sorted.
    pub fn all_values(&self) -> BTreeSet<&str> {
        self.added
            .iter()
            .chain(&self.unchanged)
            .chain(&self.deleted)
            .map(String::as_str)
            .collect()
    }
}

/// One mutation notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationEvent {
    pub kind: MutationKind,
    pub table: String,
    /// Primary-key column part (`id`, or `a+b` for composite keys).
    pub pk_column: String,
    /// Current primary-key value.
    pub pk_value: String,
    /// New row value; present for updates.
    pub row: Option<Value>,
    /// Primary-key history; consulted for deletes.
    pub history: KeyHistory,
}

impl MutationEvent {
    fn for_row<T: CacheableRow>(kind: MutationKind, row: &T) -> Self {
        let pk = row.primary_key();
        Self {
            kind,
            table: T::table().to_string(),
            pk_column: pk.column(),
            pk_value: pk.value(),
            row: None,
            history: KeyHistory::default(),
        }
    }

    pub fn insert<T: CacheableRow>(row: &T) -> Self {
        Self::for_row(MutationKind::BeforeInsert, row)
    }

    /// Update notification carrying the row's new value.
    pub fn update<T: CacheableRow>(row: &T) -> Result<Self, CodecError> {
        let value = serde_json::to_value(row).map_err(|e| CodecError::Serialization {
            reason: e.to_string(),
        })?;
        let mut event = Self::for_row(MutationKind::BeforeUpdate, row);
        event.row = Some(value);
        Ok(event)
    }

    pub fn delete<T: CacheableRow>(row: &T, history: KeyHistory) -> Self {
        let mut event = Self::for_row(MutationKind::BeforeDelete, row);
        event.history = history;
        event
    }

    /// Row key of the row's current primary key.
    pub fn row_key(&self) -> RowKey {
        RowKey::for_value(&self.table, &self.pk_column, &self.pk_value)
    }

    /// Row keys a delete must evict: the current key plus every value in the
    /// key history, deduplicated.
    pub fn row_keys_to_evict(&self) -> Vec<RowKey> {
        let mut values = self.history.all_values();
        values.insert(self.pk_value.as_str());
        values
            .into_iter()
            .map(|v| RowKey::for_value(&self.table, &self.pk_column, v))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PrimaryKey;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Item {
        id: i64,
        qty: i64,
    }

    impl CacheableRow for Item {
        fn table() -> &'static str {
            "item"
        }

        fn primary_key(&self) -> PrimaryKey {
            PrimaryKey::single("id", self.id)
        }
    }

    #[test]
    fn test_sweep_policy() {
        assert!(MutationKind::BeforeInsert.sweeps_table());
        assert!(MutationKind::BeforeDelete.sweeps_table());
        assert!(!MutationKind::BeforeUpdate.sweeps_table());
    }

    #[test]
    fn test_update_carries_row_value() {
        let event = MutationEvent::update(&Item { id: 3, qty: 9 }).expect("serializable row");
        assert_eq!(event.kind, MutationKind::BeforeUpdate);
        assert_eq!(event.row_key().as_str(), "item:id:3");
        assert_eq!(event.row, Some(serde_json::json!({"id": 3, "qty": 9})));
    }

    #[test]
    fn test_delete_evicts_history_values() {
        let event = MutationEvent::delete(&Item { id: 2, qty: 0 }, KeyHistory::changed(1, 2));
        let keys: Vec<String> = event
            .row_keys_to_evict()
            .into_iter()
            .map(RowKey::into_string)
            .collect();
        assert_eq!(keys, vec!["item:id:1".to_string(), "item:id:2".to_string()]);
    }

    #[test]
    fn test_delete_without_history_evicts_current_key() {
        let event = MutationEvent::delete(&Item { id: 8, qty: 0 }, KeyHistory::default());
        assert_eq!(event.row_keys_to_evict(), vec![RowKey::for_value("item", "id", "8")]);
    }
}
