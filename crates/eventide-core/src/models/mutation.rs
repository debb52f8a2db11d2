//! Mutation queue item model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use super::event::{EventFields, EventPatch};
use crate::util::now_millis;

static ITEM_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Kind of record a mutation or conflict refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Event,
}

impl EntityType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Event => "event",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "event" => Ok(Self::Event),
            other => Err(format!("unknown entity type '{other}'")),
        }
    }
}

/// Operation a mutation applies on the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl Operation {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(format!("unknown operation '{other}'")),
        }
    }
}

/// Operation-specific data carried by a queue item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum MutationPayload {
    /// Creation payload
    Create { data: EventFields },
    /// Partial update guarded by the version seen before the local edit
    #[serde(rename_all = "camelCase")]
    Update {
        id: String,
        data: EventPatch,
        original_version: i64,
    },
    /// Delete by id
    Delete { id: String },
}

impl MutationPayload {
    #[must_use]
    pub const fn operation(&self) -> Operation {
        match self {
            Self::Create { .. } => Operation::Create,
            Self::Update { .. } => Operation::Update,
            Self::Delete { .. } => Operation::Delete,
        }
    }
}

/// A pending operation awaiting remote application
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationItem {
    /// Unique id, sortable by enqueue time for a given record
    pub id: String,
    pub entity_type: EntityType,
    /// Server id when known, otherwise the local id
    pub entity_id: String,
    pub local_id: String,
    pub operation: Operation,
    pub payload: MutationPayload,
    /// Enqueue time (Unix ms)
    pub timestamp: i64,
    pub retry_count: u32,
    /// Earliest time the next attempt may run (Unix ms)
    pub next_retry_at: Option<i64>,
    /// Last failure message
    pub error: Option<String>,
}

impl MutationItem {
    /// Build a new queue item stamped with the current time
    #[must_use]
    pub fn new(
        entity_type: EntityType,
        entity_id: impl Into<String>,
        local_id: impl Into<String>,
        payload: MutationPayload,
    ) -> Self {
        let local_id = local_id.into();
        let operation = payload.operation();
        let timestamp = now_millis();
        let sequence = ITEM_SEQUENCE.fetch_add(1, Ordering::Relaxed);
        Self {
            id: format!("{entity_type}:{local_id}:{operation}:{timestamp}:{sequence}"),
            entity_type,
            entity_id: entity_id.into(),
            local_id,
            operation,
            payload,
            timestamp,
            retry_count: 0,
            next_retry_at: None,
            error: None,
        }
    }

    /// Whether the backoff window has elapsed at `now`
    #[must_use]
    pub fn is_due(&self, now: i64) -> bool {
        self.next_retry_at.is_none_or(|at| at <= now)
    }

    /// Whether automatic retries are used up
    #[must_use]
    pub const fn is_exhausted(&self, max_retries: u32) -> bool {
        self.retry_count >= max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_id_encodes_entity_and_operation() {
        let item = MutationItem::new(
            EntityType::Event,
            "local-1",
            "local-1",
            MutationPayload::Delete {
                id: "local-1".to_string(),
            },
        );
        assert!(item.id.starts_with("event:local-1:delete:"));
        assert_eq!(item.operation, Operation::Delete);
        assert_eq!(item.retry_count, 0);
    }

    #[test]
    fn test_item_ids_unique_within_same_millisecond() {
        let payload = MutationPayload::Delete {
            id: "x".to_string(),
        };
        let a = MutationItem::new(EntityType::Event, "x", "x", payload.clone());
        let b = MutationItem::new(EntityType::Event, "x", "x", payload);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_is_due_respects_next_retry_at() {
        let mut item = MutationItem::new(
            EntityType::Event,
            "x",
            "x",
            MutationPayload::Delete {
                id: "x".to_string(),
            },
        );
        assert!(item.is_due(0));
        item.next_retry_at = Some(1_000);
        assert!(!item.is_due(999));
        assert!(item.is_due(1_000));
    }

    #[test]
    fn test_update_payload_wire_format() {
        let payload = MutationPayload::Update {
            id: "evt_1".to_string(),
            data: EventPatch {
                title: Some("New".to_string()),
                ..EventPatch::default()
            },
            original_version: 2,
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["kind"], "update");
        assert_eq!(json["originalVersion"], 2);
        assert_eq!(json["data"]["title"], "New");
    }

    #[test]
    fn test_operation_parse() {
        assert_eq!("update".parse::<Operation>(), Ok(Operation::Update));
        assert!("upsert".parse::<Operation>().is_err());
    }
}
