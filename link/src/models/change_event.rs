use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;

use super::record::{value_key, Record};

/// Operation carried by a change notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOperation {
    Insert,
    Update,
    Delete,
}

impl fmt::Display for ChangeOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeOperation::Insert => write!(f, "insert"),
            ChangeOperation::Update => write!(f, "update"),
            ChangeOperation::Delete => write!(f, "delete"),
        }
    }
}

/// Payload of a change notification.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeKind {
    Insert {
        record: Record,
    },
    /// `record` may be partial; its columns overwrite the cached row.
    Update {
        record: Record,
        old_record: Option<Record>,
    },
    /// Either the deleted row's id or its previous values, or both.
    Delete {
        record_id: Option<JsonValue>,
        old_record: Option<Record>,
    },
}

/// A single insert/update/delete notification for one table.
///
/// Consumed once by the cache and discarded.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub table: String,
    pub kind: ChangeKind,
    /// Server-side commit time as sent by the feed (epoch millis or ISO-8601).
    pub timestamp: Option<JsonValue>,
}

impl ChangeEvent {
    pub fn insert(table: impl Into<String>, record: Record) -> Self {
        Self {
            table: table.into(),
            kind: ChangeKind::Insert { record },
            timestamp: None,
        }
    }

    pub fn update(table: impl Into<String>, record: Record) -> Self {
        Self {
            table: table.into(),
            kind: ChangeKind::Update {
                record,
                old_record: None,
            },
            timestamp: None,
        }
    }

    pub fn update_from(table: impl Into<String>, old_record: Record, record: Record) -> Self {
        Self {
            table: table.into(),
            kind: ChangeKind::Update {
                record,
                old_record: Some(old_record),
            },
            timestamp: None,
        }
    }

    /// Delete by primary key value.
    pub fn delete(table: impl Into<String>, record_id: impl Into<JsonValue>) -> Self {
        Self {
            table: table.into(),
            kind: ChangeKind::Delete {
                record_id: Some(record_id.into()),
                old_record: None,
            },
            timestamp: None,
        }
    }

    /// Delete carrying the row's previous values.
    pub fn delete_record(table: impl Into<String>, old_record: Record) -> Self {
        Self {
            table: table.into(),
            kind: ChangeKind::Delete {
                record_id: None,
                old_record: Some(old_record),
            },
            timestamp: None,
        }
    }

    pub fn with_timestamp(mut self, timestamp: impl Into<JsonValue>) -> Self {
        self.timestamp = Some(timestamp.into());
        self
    }

    pub fn operation(&self) -> ChangeOperation {
        match self.kind {
            ChangeKind::Insert { .. } => ChangeOperation::Insert,
            ChangeKind::Update { .. } => ChangeOperation::Update,
            ChangeKind::Delete { .. } => ChangeOperation::Delete,
        }
    }

    /// Current row values, for inserts and updates.
    pub fn record(&self) -> Option<&Record> {
        match &self.kind {
            ChangeKind::Insert { record } | ChangeKind::Update { record, .. } => Some(record),
            ChangeKind::Delete { .. } => None,
        }
    }

    /// Primary key of the affected row.
    ///
    /// Updates fall back to the old record when the new one is partial and
    /// omits the key.
    pub fn key(&self, primary_key: &str) -> Option<String> {
        match &self.kind {
            ChangeKind::Insert { record } => record.key(primary_key),
            ChangeKind::Update { record, old_record } => record
                .key(primary_key)
                .or_else(|| old_record.as_ref().and_then(|old| old.key(primary_key))),
            ChangeKind::Delete {
                record_id,
                old_record,
            } => record_id
                .as_ref()
                .and_then(value_key)
                .or_else(|| old_record.as_ref().and_then(|old| old.key(primary_key))),
        }
    }
}
