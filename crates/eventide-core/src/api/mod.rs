//! Remote event API
//!
//! [`EventApi`] is the narrow seam the sync engine talks to. [`HttpEventApi`]
//! is the reqwest implementation; [`InMemoryEventApi`] is an in-process
//! server used by tests and demos.

mod http;
mod memory;

use std::future::Future;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{EventFields, EventPatch, RemoteEvent};

pub use http::HttpEventApi;
pub use memory::{ApiCall, InMemoryEventApi};

/// Errors returned by a remote event API
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApiError {
    /// Transport failure, timeout or unreachable server
    #[error("network error: {0}")]
    Network(String),
    /// The server rejected a write against a stale version
    #[error("version conflict")]
    Conflict {
        /// Current server record, when the response carried it
        current: Option<Box<RemoteEvent>>,
    },
    #[error("not found: {0}")]
    NotFound(String),
    /// Any other non-2xx response
    #[error("{message}")]
    Status { status: u16, message: String },
    /// The response body could not be decoded
    #[error("invalid response: {0}")]
    Decode(String),
}

impl ApiError {
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// One page of events from the list endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventPage {
    #[serde(alias = "events")]
    pub data: Vec<RemoteEvent>,
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub limit: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
}

/// Operations the sync engine needs from the server
///
/// Futures are `Send` so the coordinator can drive them from a spawned task.
pub trait EventApi: Send + Sync + 'static {
    /// Fetch one page (1-based)
    fn list(&self, page: u32, limit: u32) -> impl Future<Output = ApiResult<EventPage>> + Send;

    /// Fetch one event by server id
    fn get(&self, id: &str) -> impl Future<Output = ApiResult<RemoteEvent>> + Send;

    /// Create an event, returning the server record with its assigned id
    fn create(&self, data: &EventFields) -> impl Future<Output = ApiResult<RemoteEvent>> + Send;

    /// Apply a partial update guarded by `original_version`
    ///
    /// Fails with [`ApiError::Conflict`] when the server copy moved past it.
    fn update(
        &self,
        id: &str,
        data: &EventPatch,
        original_version: i64,
    ) -> impl Future<Output = ApiResult<RemoteEvent>> + Send;

    /// Delete an event by server id
    fn delete(&self, id: &str) -> impl Future<Output = ApiResult<()>> + Send;
}
