use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] eventide_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Event title cannot be empty")]
    EmptyTitle,
    #[error("Event ID cannot be empty")]
    EmptyEventId,
    #[error("Event not found: {0}")]
    EventNotFound(String),
    #[error("Nothing to change; pass at least one field to edit")]
    EmptyEdit,
    #[error("Invalid time '{0}': use RFC 3339, `YYYY-MM-DD HH:MM`, `YYYY-MM-DD` or Unix milliseconds")]
    InvalidTimestamp(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Refusing to wipe local data without --yes")]
    ResetNotConfirmed,
}
