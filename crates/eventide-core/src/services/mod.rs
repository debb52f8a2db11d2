//! Client-facing services built on the store, queue and remote API.

mod events;

pub use events::{EventRepository, ListResult};
