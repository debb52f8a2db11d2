//! eventide-core - Core library for Eventide
//!
//! Offline-first sync for event records: a libSQL-backed local store, a
//! durable mutation queue with exponential backoff, version-conflict
//! detection and resolution, and a coordinator that drains the queue on an
//! interval and on reconnect.

pub mod api;
pub mod config;
pub mod db;
mod engine;
pub mod error;
pub mod models;
pub mod network;
pub mod services;
pub mod state;
pub mod sync;
mod util;

pub use api::{ApiError, EventApi, HttpEventApi, InMemoryEventApi};
pub use config::SyncConfig;
pub use db::LocalStore;
pub use engine::SyncEngine;
pub use error::{Error, Result};
pub use models::{Conflict, Event, EventFields, EventPatch, MutationItem, SyncStatus};
pub use network::NetworkStatus;
pub use services::{EventRepository, ListResult};
pub use state::{SyncSnapshot, SyncState};
pub use sync::{ConflictResolver, MutationQueue, RetryPolicy, SyncCoordinator};

#[cfg(test)]
mod tests;
