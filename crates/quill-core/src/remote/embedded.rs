//! In-process remote backed by an [`AuthorityStore`]

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{RemoteError, RemoteResult, RemoteStore};
use crate::authority::{AuthorityError, AuthorityStore};
use crate::models::{
    ChangeSet, CreateLabelRequest, CreateNoteRequest, LabelId, LabelRecord, NoteId, NoteRecord,
    OwnerId, SyncScope, UpdateLabelRequest, UpdateNoteRequest,
};

/// Page size used when listing every note
const LIST_ALL: usize = u32::MAX as usize;

/// Remote store living in the same process, e.g. for a single-binary setup or tests
#[derive(Clone)]
pub struct EmbeddedRemote {
    store: Arc<Mutex<AuthorityStore>>,
}

impl EmbeddedRemote {
    pub fn new(store: AuthorityStore) -> Self {
        Self {
            store: Arc::new(Mutex::new(store)),
        }
    }

    /// Shared handle to the underlying store
    pub fn store(&self) -> Arc<Mutex<AuthorityStore>> {
        Arc::clone(&self.store)
    }
}

impl From<AuthorityError> for RemoteError {
    fn from(error: AuthorityError) -> Self {
        match error {
            AuthorityError::NotFound(message) => Self::NotFound(message),
            AuthorityError::Rejected(message) | AuthorityError::Conflict(message) => {
                Self::Rejected(message)
            }
            AuthorityError::Sqlite(error) => Self::Transient(error.to_string()),
            AuthorityError::Setup(error) => Self::Transient(error.to_string()),
        }
    }
}

#[async_trait]
impl RemoteStore for EmbeddedRemote {
    async fn create_note(
        &self,
        owner: &OwnerId,
        request: &CreateNoteRequest,
    ) -> RemoteResult<NoteRecord> {
        let store = self.store.lock().await;
        Ok(store.create_note(owner, request.clone())?)
    }

    async fn update_note(
        &self,
        owner: &OwnerId,
        id: &NoteId,
        request: &UpdateNoteRequest,
    ) -> RemoteResult<NoteRecord> {
        let store = self.store.lock().await;
        Ok(store.update_note(owner, id, request.clone())?)
    }

    async fn delete_note(&self, owner: &OwnerId, id: &NoteId) -> RemoteResult<NoteRecord> {
        let store = self.store.lock().await;
        Ok(store.delete_note(owner, id)?)
    }

    async fn get_note(&self, owner: &OwnerId, id: &NoteId) -> RemoteResult<NoteRecord> {
        let store = self.store.lock().await;
        Ok(store.get_note(owner, id)?)
    }

    async fn list_notes(
        &self,
        owner: &OwnerId,
        include_deleted: bool,
    ) -> RemoteResult<Vec<NoteRecord>> {
        let store = self.store.lock().await;
        Ok(store.list_notes(owner, include_deleted, LIST_ALL, 0)?)
    }

    async fn create_label(
        &self,
        owner: &OwnerId,
        request: &CreateLabelRequest,
    ) -> RemoteResult<LabelRecord> {
        let store = self.store.lock().await;
        Ok(store.create_label(owner, request.clone())?)
    }

    async fn update_label(
        &self,
        owner: &OwnerId,
        id: &LabelId,
        request: &UpdateLabelRequest,
    ) -> RemoteResult<LabelRecord> {
        let store = self.store.lock().await;
        Ok(store.update_label(owner, id, request.clone())?)
    }

    async fn delete_label(&self, owner: &OwnerId, id: &LabelId) -> RemoteResult<LabelRecord> {
        let store = self.store.lock().await;
        Ok(store.delete_label(owner, id)?)
    }

    async fn list_labels(
        &self,
        owner: &OwnerId,
        include_deleted: bool,
    ) -> RemoteResult<Vec<LabelRecord>> {
        let store = self.store.lock().await;
        Ok(store.list_labels(owner, include_deleted)?)
    }

    async fn changes_since(
        &self,
        owner: &OwnerId,
        scope: &SyncScope,
        since: i64,
    ) -> RemoteResult<ChangeSet> {
        let store = self.store.lock().await;
        Ok(store.changes_since(owner, scope, since)?)
    }

    async fn full_snapshot(&self, owner: &OwnerId, scope: &SyncScope) -> RemoteResult<ChangeSet> {
        let store = self.store.lock().await;
        Ok(store.full_snapshot(owner, scope)?)
    }

    async fn current_cursor(&self, owner: &OwnerId, scope: &SyncScope) -> RemoteResult<i64> {
        let store = self.store.lock().await;
        Ok(store.current_cursor(owner, scope)?)
    }
}
