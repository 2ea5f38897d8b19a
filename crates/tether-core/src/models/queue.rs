//! Pending mutation model

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// The kind of mutation recorded in the sync queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueAction {
    Insert,
    Update,
    Delete,
}

impl QueueAction {
    /// Storage representation used in the `sync_queue` table
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for QueueAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "insert" => Ok(Self::Insert),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(format!("unknown queue action: {other}")),
        }
    }
}

/// A durable record of a mutation awaiting replay against the remote service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueItem {
    /// Queue entry identifier (UUID v7, time-sortable)
    pub id: String,
    /// Table the mutated record belongs to
    pub table: String,
    /// Mutation kind
    pub action: QueueAction,
    /// Record id the mutation targets
    pub record_id: String,
    /// Record payload at enqueue time (the local optimistic value)
    pub data: Value,
    /// Enqueue timestamp (Unix ms); drain order is by this, then insertion
    pub enqueued_at: i64,
    /// Transient-failure replay count
    pub attempts: u32,
    /// Set when the last drain left this item awaiting user resolution
    pub conflicted: bool,
}

impl QueueItem {
    /// Create a new queue item for a mutation made now
    #[must_use]
    pub fn new(
        table: impl Into<String>,
        action: QueueAction,
        record_id: impl Into<String>,
        data: Value,
    ) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            table: table.into(),
            action,
            record_id: record_id.into(),
            data,
            enqueued_at: chrono::Utc::now().timestamp_millis(),
            attempts: 0,
            conflicted: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn action_round_trips_through_storage_form() {
        for action in [QueueAction::Insert, QueueAction::Update, QueueAction::Delete] {
            assert_eq!(action.as_str().parse::<QueueAction>().unwrap(), action);
        }
        assert!("upsert".parse::<QueueAction>().is_err());
    }

    #[test]
    fn new_item_starts_unconflicted_with_zero_attempts() {
        let item = QueueItem::new("tasks", QueueAction::Insert, "t1", json!({"id": "t1"}));
        assert_eq!(item.attempts, 0);
        assert!(!item.conflicted);
        assert_eq!(item.table, "tasks");
        assert_eq!(item.record_id, "t1");
    }
}
