use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::change_event::{ChangeEvent, ChangeKind, ChangeOperation};
use super::record::Record;
use crate::error::{LinkError, Result};

/// Server-to-client frames on the realtime channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Subscription registered.
    Subscribed { table: String },

    /// Row change on a subscribed table.
    Change {
        table: String,

        operation: ChangeOperation,

        /// New/current row values (insert, update)
        #[serde(default, skip_serializing_if = "Option::is_none")]
        record: Option<JsonValue>,

        /// Previous row values (update, delete)
        #[serde(default, skip_serializing_if = "Option::is_none")]
        old_record: Option<JsonValue>,

        /// Primary key of the affected row (delete)
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<JsonValue>,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<JsonValue>,
    },

    /// Application-level keepalive reply.
    Pong,

    /// Channel-level error reported by the server.
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },
}

impl ServerMessage {
    /// Convert a `change` frame into a [`ChangeEvent`].
    ///
    /// Returns `Ok(None)` for control frames.
    pub fn into_change_event(self) -> Result<Option<ChangeEvent>> {
        let ServerMessage::Change {
            table,
            operation,
            record,
            old_record,
            id,
            timestamp,
        } = self
        else {
            return Ok(None);
        };

        let record = record.map(Record::from_json).transpose()?;
        let old_record = old_record.map(Record::from_json).transpose()?;

        let kind = match operation {
            ChangeOperation::Insert => ChangeKind::Insert {
                record: record.ok_or_else(|| missing_record(&table, operation))?,
            },
            ChangeOperation::Update => ChangeKind::Update {
                record: record.ok_or_else(|| missing_record(&table, operation))?,
                old_record,
            },
            ChangeOperation::Delete => {
                if id.is_none() && old_record.is_none() {
                    return Err(LinkError::SerializationError(format!(
                        "delete on '{}' carries neither id nor old_record",
                        table
                    )));
                }
                ChangeKind::Delete {
                    record_id: id,
                    old_record,
                }
            },
        };

        Ok(Some(ChangeEvent {
            table,
            kind,
            timestamp,
        }))
    }
}

fn missing_record(table: &str, operation: ChangeOperation) -> LinkError {
    LinkError::SerializationError(format!("{} on '{}' carries no record", operation, table))
}
