//! Event record model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::mutation::Operation;
use crate::util::now_millis;

/// Generate a client-side identity for a record that has not reached the server yet.
///
/// Uses UUID v7 so identities sort by creation time.
#[must_use]
pub fn new_local_id() -> String {
    format!("local-{}", Uuid::now_v7())
}

/// Business fields of an event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventFields {
    /// Event title
    pub title: String,
    /// Free-form description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Where the event takes place
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub venue: Option<String>,
    /// Start time (Unix ms)
    pub starts_at: i64,
    /// End time (Unix ms)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ends_at: Option<i64>,
    /// Maximum number of attendees
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity: Option<u32>,
}

impl EventFields {
    /// Create fields with a title and start time
    pub fn new(title: impl Into<String>, starts_at: i64) -> Self {
        Self {
            title: title.into(),
            description: None,
            venue: None,
            starts_at,
            ends_at: None,
            capacity: None,
        }
    }

    /// Apply every field present in `patch`
    pub fn apply(&mut self, patch: &EventPatch) {
        if let Some(title) = &patch.title {
            self.title.clone_from(title);
        }
        if let Some(description) = &patch.description {
            self.description = Some(description.clone());
        }
        if let Some(venue) = &patch.venue {
            self.venue = Some(venue.clone());
        }
        if let Some(starts_at) = patch.starts_at {
            self.starts_at = starts_at;
        }
        if let Some(ends_at) = patch.ends_at {
            self.ends_at = Some(ends_at);
        }
        if let Some(capacity) = patch.capacity {
            self.capacity = Some(capacity);
        }
    }
}

/// Partial update of event fields; `None` leaves a field untouched
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub venue: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub starts_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ends_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity: Option<u32>,
}

impl EventPatch {
    /// Whether the patch changes nothing
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.venue.is_none()
            && self.starts_at.is_none()
            && self.ends_at.is_none()
            && self.capacity.is_none()
    }
}

impl From<&EventFields> for EventPatch {
    fn from(fields: &EventFields) -> Self {
        Self {
            title: Some(fields.title.clone()),
            description: fields.description.clone(),
            venue: fields.venue.clone(),
            starts_at: Some(fields.starts_at),
            ends_at: fields.ends_at,
            capacity: fields.capacity,
        }
    }
}

/// An event as returned by the remote API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteEvent {
    /// Server-assigned identity
    pub id: String,
    /// Business fields
    #[serde(flatten)]
    pub fields: EventFields,
    /// Server-side version counter
    #[serde(default = "default_version")]
    pub version: i64,
}

const fn default_version() -> i64 {
    1
}

/// Flat sync status of a record, as stored and counted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Synced,
    Pending,
    Syncing,
    Failed,
    Conflict,
}

impl SyncStatus {
    /// Storage representation
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Synced => "synced",
            Self::Pending => "pending",
            Self::Syncing => "syncing",
            Self::Failed => "failed",
            Self::Conflict => "conflict",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "synced" => Ok(Self::Synced),
            "pending" => Ok(Self::Pending),
            "syncing" => Ok(Self::Syncing),
            "failed" => Ok(Self::Failed),
            "conflict" => Ok(Self::Conflict),
            other => Err(format!("unknown sync status '{other}'")),
        }
    }
}

/// Sync state of a record.
///
/// Combines the sync status with the outstanding operation so that a
/// `Synced` record can never carry an operation or a retry count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum RecordState {
    /// Matches the server
    Synced,
    /// Waiting in the queue
    Pending {
        operation: Operation,
        retry_count: u32,
        last_error: Option<String>,
    },
    /// Currently being sent
    Syncing {
        operation: Operation,
        retry_count: u32,
    },
    /// Retries exhausted, needs a manual retry
    Failed {
        operation: Operation,
        retry_count: u32,
        last_error: String,
    },
    /// Server diverged, needs resolution
    Conflict { operation: Operation },
}

impl RecordState {
    /// Fresh pending state for a new local write
    #[must_use]
    pub const fn pending(operation: Operation) -> Self {
        Self::Pending {
            operation,
            retry_count: 0,
            last_error: None,
        }
    }

    /// State after a local write queues `operation` behind whatever is outstanding.
    ///
    /// A failed record stays failed until its exhausted item is retried by
    /// hand; a queued delete still hides it.
    #[must_use]
    pub fn after_local_write(&self, operation: Operation) -> Self {
        match self {
            Self::Failed {
                operation: blocked,
                retry_count,
                last_error,
            } => Self::Failed {
                operation: if operation == Operation::Delete {
                    operation
                } else {
                    *blocked
                },
                retry_count: *retry_count,
                last_error: last_error.clone(),
            },
            _ => Self::pending(operation),
        }
    }

    #[must_use]
    pub const fn status(&self) -> SyncStatus {
        match self {
            Self::Synced => SyncStatus::Synced,
            Self::Pending { .. } => SyncStatus::Pending,
            Self::Syncing { .. } => SyncStatus::Syncing,
            Self::Failed { .. } => SyncStatus::Failed,
            Self::Conflict { .. } => SyncStatus::Conflict,
        }
    }

    /// Outstanding operation, if any
    #[must_use]
    pub const fn operation(&self) -> Option<Operation> {
        match self {
            Self::Synced => None,
            Self::Pending { operation, .. }
            | Self::Syncing { operation, .. }
            | Self::Failed { operation, .. }
            | Self::Conflict { operation } => Some(*operation),
        }
    }

    #[must_use]
    pub const fn retry_count(&self) -> u32 {
        match self {
            Self::Pending { retry_count, .. }
            | Self::Syncing { retry_count, .. }
            | Self::Failed { retry_count, .. } => *retry_count,
            Self::Synced | Self::Conflict { .. } => 0,
        }
    }

    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        match self {
            Self::Pending { last_error, .. } => last_error.as_deref(),
            Self::Failed { last_error, .. } => Some(last_error),
            _ => None,
        }
    }

    /// Rebuild the state from its stored columns.
    ///
    /// Rejects combinations the enum cannot represent, such as a synced row
    /// with an operation attached.
    pub fn from_columns(
        status: SyncStatus,
        operation: Option<Operation>,
        retry_count: u32,
        last_error: Option<String>,
    ) -> Result<Self, String> {
        match (status, operation) {
            (SyncStatus::Synced, None) => Ok(Self::Synced),
            (SyncStatus::Synced, Some(operation)) => Err(format!(
                "synced record cannot carry pending operation '{operation}'"
            )),
            (_, None) => Err(format!("{status} record is missing its pending operation")),
            (SyncStatus::Pending, Some(operation)) => Ok(Self::Pending {
                operation,
                retry_count,
                last_error,
            }),
            (SyncStatus::Syncing, Some(operation)) => Ok(Self::Syncing {
                operation,
                retry_count,
            }),
            (SyncStatus::Failed, Some(operation)) => Ok(Self::Failed {
                operation,
                retry_count,
                last_error: last_error.unwrap_or_default(),
            }),
            (SyncStatus::Conflict, Some(operation)) => Ok(Self::Conflict { operation }),
        }
    }
}

/// An event record held in the local cache
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Server-assigned identity, `None` until the create reaches the server
    pub id: Option<String>,
    /// Client-assigned identity, stable for the life of the local record
    pub local_id: String,
    /// Business fields
    pub fields: EventFields,
    /// Version counter used for conflict detection
    pub version: i64,
    /// Sync state
    pub state: RecordState,
    /// Last local modification (Unix ms)
    pub last_modified: i64,
}

impl Event {
    /// Create an optimistic local record waiting for its create to sync
    #[must_use]
    pub fn new_local(fields: EventFields) -> Self {
        Self {
            id: None,
            local_id: new_local_id(),
            fields,
            version: 1,
            state: RecordState::pending(Operation::Create),
            last_modified: now_millis(),
        }
    }

    /// Build a synced record from a server response
    #[must_use]
    pub fn from_remote(local_id: impl Into<String>, remote: &RemoteEvent) -> Self {
        Self {
            id: Some(remote.id.clone()),
            local_id: local_id.into(),
            fields: remote.fields.clone(),
            version: remote.version,
            state: RecordState::Synced,
            last_modified: now_millis(),
        }
    }

    /// Identity to address the record with on the server side
    #[must_use]
    pub fn remote_id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    #[must_use]
    pub const fn status(&self) -> SyncStatus {
        self.state.status()
    }

    /// Whether the record is waiting for a delete to reach the server
    #[must_use]
    pub const fn is_pending_delete(&self) -> bool {
        matches!(self.state.operation(), Some(Operation::Delete))
    }

    /// Take the server's view of the record and mark it synced
    pub fn apply_remote(&mut self, remote: &RemoteEvent) {
        self.id = Some(remote.id.clone());
        self.fields = remote.fields.clone();
        self.version = remote.version;
        self.state = RecordState::Synced;
        self.last_modified = now_millis();
    }
}

/// Record counts per sync status across the local cache
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncStats {
    pub total: usize,
    pub synced: usize,
    pub pending: usize,
    pub syncing: usize,
    pub failed: usize,
    pub conflict: usize,
}

impl SyncStats {
    /// Add `count` records with the given status
    pub fn add(&mut self, status: SyncStatus, count: usize) {
        self.total += count;
        match status {
            SyncStatus::Synced => self.synced += count,
            SyncStatus::Pending => self.pending += count,
            SyncStatus::Syncing => self.syncing += count,
            SyncStatus::Failed => self.failed += count,
            SyncStatus::Conflict => self.conflict += count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_local_event_is_pending_create() {
        let event = Event::new_local(EventFields::new("Launch party", 1_000));
        assert!(event.id.is_none());
        assert!(event.local_id.starts_with("local-"));
        assert_eq!(event.version, 1);
        assert_eq!(event.status(), SyncStatus::Pending);
        assert_eq!(event.state.operation(), Some(Operation::Create));
    }

    #[test]
    fn test_local_ids_unique() {
        assert_ne!(new_local_id(), new_local_id());
    }

    #[test]
    fn test_synced_state_has_no_operation() {
        let state = RecordState::Synced;
        assert_eq!(state.operation(), None);
        assert_eq!(state.retry_count(), 0);
    }

    #[test]
    fn test_local_write_keeps_failed_record_failed() {
        let failed = RecordState::Failed {
            operation: Operation::Create,
            retry_count: 5,
            last_error: "timeout".to_string(),
        };

        let edited = failed.after_local_write(Operation::Update);
        assert_eq!(edited, failed);

        let deleted = failed.after_local_write(Operation::Delete);
        assert_eq!(deleted.status(), SyncStatus::Failed);
        assert_eq!(deleted.operation(), Some(Operation::Delete));
        assert_eq!(deleted.last_error(), Some("timeout"));

        assert_eq!(
            RecordState::Synced.after_local_write(Operation::Update),
            RecordState::pending(Operation::Update)
        );
    }

    #[test]
    fn test_from_columns_rejects_synced_with_operation() {
        let result =
            RecordState::from_columns(SyncStatus::Synced, Some(Operation::Update), 0, None);
        assert!(result.is_err());

        let result = RecordState::from_columns(SyncStatus::Pending, None, 0, None);
        assert!(result.is_err());
    }

    #[test]
    fn test_from_columns_rebuilds_failed_state() {
        let state = RecordState::from_columns(
            SyncStatus::Failed,
            Some(Operation::Delete),
            5,
            Some("timeout".to_string()),
        )
        .unwrap();
        assert_eq!(state.status(), SyncStatus::Failed);
        assert_eq!(state.retry_count(), 5);
        assert_eq!(state.last_error(), Some("timeout"));
    }

    #[test]
    fn test_apply_patch_only_touches_present_fields() {
        let mut fields = EventFields::new("Standup", 10);
        fields.venue = Some("Room 1".to_string());

        fields.apply(&EventPatch {
            title: Some("Daily standup".to_string()),
            capacity: Some(12),
            ..EventPatch::default()
        });

        assert_eq!(fields.title, "Daily standup");
        assert_eq!(fields.venue.as_deref(), Some("Room 1"));
        assert_eq!(fields.capacity, Some(12));
        assert_eq!(fields.starts_at, 10);
    }

    #[test]
    fn test_apply_remote_marks_synced() {
        let mut event = Event::new_local(EventFields::new("Draft", 1));
        let remote = RemoteEvent {
            id: "evt_1".to_string(),
            fields: EventFields::new("Final", 2),
            version: 4,
        };
        event.apply_remote(&remote);

        assert_eq!(event.id.as_deref(), Some("evt_1"));
        assert_eq!(event.fields.title, "Final");
        assert_eq!(event.version, 4);
        assert_eq!(event.state, RecordState::Synced);
    }

    #[test]
    fn test_remote_event_wire_format() {
        let json = r#"{"id":"evt_9","title":"Gig","startsAt":5,"capacity":200}"#;
        let remote: RemoteEvent = serde_json::from_str(json).unwrap();
        assert_eq!(remote.id, "evt_9");
        assert_eq!(remote.fields.capacity, Some(200));
        assert_eq!(remote.version, 1);
    }

    #[test]
    fn test_sync_stats_add() {
        let mut stats = SyncStats::default();
        stats.add(SyncStatus::Synced, 3);
        stats.add(SyncStatus::Conflict, 1);
        assert_eq!(stats.total, 4);
        assert_eq!(stats.synced, 3);
        assert_eq!(stats.conflict, 1);
    }
}
