//! Sync conflict model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::event::{EventFields, RemoteEvent};
use super::mutation::EntityType;
use crate::util::now_millis;

/// How a conflict was settled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    /// Local data overwrote the server
    Local,
    /// Server data replaced local edits
    Server,
    /// Caller-supplied merge was submitted
    Merged,
}

impl Resolution {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Server => "server",
            Self::Merged => "merged",
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Resolution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(Self::Local),
            "server" => Ok(Self::Server),
            "merged" => Ok(Self::Merged),
            other => Err(format!("unknown resolution '{other}'")),
        }
    }
}

/// Batch strategy for `auto_resolve_conflicts`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionStrategy {
    Local,
    Server,
    /// Leave every conflict for a person to decide
    Manual,
}

/// Recorded divergence between a local edit and the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conflict {
    pub id: String,
    pub entity_type: EntityType,
    /// Server id of the record
    pub entity_id: String,
    pub local_id: String,
    /// Local fields at detection time
    pub local_data: EventFields,
    /// Local version at detection time
    pub local_version: i64,
    /// Server record at detection time
    pub server_data: RemoteEvent,
    /// Detection timestamp (Unix ms)
    pub detected_at: i64,
    /// Resolution timestamp (Unix ms)
    pub resolved_at: Option<i64>,
    pub resolution: Option<Resolution>,
}

impl Conflict {
    /// Snapshot both sides of a freshly detected conflict
    #[must_use]
    pub fn new(
        entity_id: impl Into<String>,
        local_id: impl Into<String>,
        local_data: EventFields,
        local_version: i64,
        server_data: RemoteEvent,
    ) -> Self {
        Self {
            id: format!("conflict-{}", Uuid::now_v7()),
            entity_type: EntityType::Event,
            entity_id: entity_id.into(),
            local_id: local_id.into(),
            local_data,
            local_version,
            server_data,
            detected_at: now_millis(),
            resolved_at: None,
            resolution: None,
        }
    }

    #[must_use]
    pub const fn is_resolved(&self) -> bool {
        self.resolution.is_some()
    }
}
