//! Error types for quill-core

use thiserror::Error;

use crate::config::ConfigError;
use crate::models::OwnerId;
use crate::remote::RemoteError;

/// Result type alias using quill-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in quill-core operations
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

    /// Note or label not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Remote store error
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// Invalid sync settings
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A sync run is already active for this owner
    #[error("Sync already in progress for owner {0}")]
    SyncInProgress(OwnerId),
}
