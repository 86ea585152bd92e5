//! Client side of the remote authoritative store.
//!
//! [`RemoteStore`] is the seam the sync engine talks through. [`HttpRemote`]
//! speaks the `/v1` JSON API; [`EmbeddedRemote`] drives an in-process
//! [`AuthorityStore`](crate::authority::AuthorityStore).

mod embedded;
mod http;

pub use embedded::EmbeddedRemote;
pub use http::HttpRemote;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{
    ChangeSet, CreateLabelRequest, CreateNoteRequest, LabelId, LabelRecord, NoteId, NoteRecord,
    OwnerId, SyncScope, UpdateLabelRequest, UpdateNoteRequest,
};

/// Failure of a single remote call
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// Timeout, unreachable host, or server-side failure; retried next cycle
    #[error("Remote unavailable: {0}")]
    Transient(String),

    /// Credentials were refused; retried once the identity is refreshed
    #[error("Remote refused credentials: {0}")]
    Unauthenticated(String),

    /// Validation failure; not retried until the entity is edited
    #[error("Remote rejected request: {0}")]
    Rejected(String),

    #[error("Remote entity not found: {0}")]
    NotFound(String),
}

impl RemoteError {
    /// Network-class failures that the next cycle may succeed on
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Unauthenticated(_))
    }
}

pub type RemoteResult<T> = Result<T, RemoteError>;

/// Operations the sync engine needs from the remote authority.
///
/// Creates carry client-generated ids; replaying one upserts the stored entity.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn create_note(
        &self,
        owner: &OwnerId,
        request: &CreateNoteRequest,
    ) -> RemoteResult<NoteRecord>;

    /// Replace the full state of a note
    async fn update_note(
        &self,
        owner: &OwnerId,
        id: &NoteId,
        request: &UpdateNoteRequest,
    ) -> RemoteResult<NoteRecord>;

    /// Soft delete; idempotent
    async fn delete_note(&self, owner: &OwnerId, id: &NoteId) -> RemoteResult<NoteRecord>;

    async fn get_note(&self, owner: &OwnerId, id: &NoteId) -> RemoteResult<NoteRecord>;

    async fn list_notes(
        &self,
        owner: &OwnerId,
        include_deleted: bool,
    ) -> RemoteResult<Vec<NoteRecord>>;

    async fn create_label(
        &self,
        owner: &OwnerId,
        request: &CreateLabelRequest,
    ) -> RemoteResult<LabelRecord>;

    async fn update_label(
        &self,
        owner: &OwnerId,
        id: &LabelId,
        request: &UpdateLabelRequest,
    ) -> RemoteResult<LabelRecord>;

    /// Soft delete; idempotent
    async fn delete_label(&self, owner: &OwnerId, id: &LabelId) -> RemoteResult<LabelRecord>;

    async fn list_labels(
        &self,
        owner: &OwnerId,
        include_deleted: bool,
    ) -> RemoteResult<Vec<LabelRecord>>;

    /// Entities changed strictly after `since`
    async fn changes_since(
        &self,
        owner: &OwnerId,
        scope: &SyncScope,
        since: i64,
    ) -> RemoteResult<ChangeSet>;

    /// Every live entity of a scope
    async fn full_snapshot(&self, owner: &OwnerId, scope: &SyncScope) -> RemoteResult<ChangeSet>;

    async fn current_cursor(&self, owner: &OwnerId, scope: &SyncScope) -> RemoteResult<i64>;
}
