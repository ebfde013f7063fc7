use std::io;

use focus_core::offline::TransportError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] focus_core::Error),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Task title cannot be empty")]
    EmptyTitle,
    #[error("ID cannot be empty")]
    EmptyId,
    #[error("Nothing to update; pass at least one field")]
    NothingToUpdate,
    #[error("No {0} found for id/prefix: {1}")]
    NotFound(&'static str, String),
    #[error("{0}")]
    AmbiguousId(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Sync is not configured. Pass --api-url or set FOCUS_API_URL.")]
    SyncNotConfigured,
    #[error("Sync server at {0} is unreachable; local changes stay queued")]
    ServerUnreachable(String),
}
