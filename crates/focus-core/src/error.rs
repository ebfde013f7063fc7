//! Error types for focus-core

use thiserror::Error;

/// Result type alias using focus-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in focus-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Entity or record not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Optimistic write lost a race against a concurrent mutation
    #[error("Stale version for {entity_id}: expected {expected}")]
    StaleVersion { entity_id: String, expected: i64 },

    /// Transport failure while talking to the sync server
    #[error(transparent)]
    Transport(#[from] crate::offline::TransportError),

    /// Storage lock poisoned by a panicking writer
    #[error("Storage lock poisoned")]
    LockPoisoned,
}

impl Error {
    /// Whether retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(error) => error.is_transient(),
            Self::StaleVersion { .. } => true,
            _ => false,
        }
    }
}
