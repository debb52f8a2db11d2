//! Data models for Eventide

mod conflict;
mod event;
mod mutation;

pub use conflict::{Conflict, Resolution, ResolutionStrategy};
pub use event::{
    new_local_id, Event, EventFields, EventPatch, RecordState, RemoteEvent, SyncStats, SyncStatus,
};
pub use mutation::{EntityType, MutationItem, MutationPayload, Operation};
