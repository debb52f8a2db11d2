//! Aggregate sync state published by the coordinator.

use serde::Serialize;

/// Coordinator activity
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    #[default]
    Idle,
    Syncing,
    Error,
}

impl SyncState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Syncing => "syncing",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view for status displays
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSnapshot {
    pub state: SyncState,
    /// Queue rows still waiting, exhausted ones included
    pub pending_count: usize,
    /// Completion time of the last drain (Unix ms)
    pub last_sync_at: Option<i64>,
    pub last_error: Option<String>,
    pub is_online: bool,
}
