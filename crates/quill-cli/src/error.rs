use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] quill_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("No note content provided")]
    EmptyContent,
    #[error("Note ID cannot be empty")]
    EmptyNoteId,
    #[error("Expected a full note ID, got '{0}'")]
    FullNoteIdRequired(String),
    #[error("Search query cannot be empty")]
    EmptySearchQuery,
    #[error("Nothing to change; pass --title, --body, --label or --clear-labels")]
    NothingToEdit,
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Sync failed: {0}")]
    SyncFailed(String),
    #[error(
        "Sync is not configured. Run `quill config init --api-url <URL> --owner <ID> --token <TOKEN>`."
    )]
    SyncNotConfigured,
}
