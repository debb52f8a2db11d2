//! Database layer for Eventide

mod connection;
mod migrations;
mod store;

pub use connection::Database;
pub use store::{EventFilter, LocalStore, StoreChange};
