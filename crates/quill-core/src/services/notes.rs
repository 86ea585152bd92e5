//! Write path used by clients.
//!
//! Every mutation lands in the local replica first and always succeeds there.
//! When a remote store is configured and the network is usable, the change is
//! pushed right away; otherwise it waits for the next sync run.

use std::sync::Arc;
use std::time::Duration;

use crate::connectivity::Connectivity;
use crate::db::DeleteOutcome;
use crate::models::{
    Label, LabelDraft, LabelId, LabelPatch, Note, NoteDraft, NoteId, NotePatch, NoteQuery, OwnerId,
};
use crate::remote::RemoteStore;
use crate::services::ReplicaService;
use crate::sync::{push_label, push_note, PushOutcome};
use crate::{Error, Result};

/// Notes and labels of one owner
#[derive(Clone)]
pub struct NoteService {
    replica: ReplicaService,
    owner: OwnerId,
    remote: Option<Arc<dyn RemoteStore>>,
    connectivity: Option<Arc<dyn Connectivity>>,
    call_timeout: Duration,
}

impl NoteService {
    /// Local-only service; changes are pushed by sync runs
    pub fn new(replica: ReplicaService, owner: OwnerId) -> Self {
        Self {
            replica,
            owner,
            remote: None,
            connectivity: None,
            call_timeout: Duration::from_secs(30),
        }
    }

    /// Push each change immediately while `connectivity` reports the network usable
    #[must_use]
    pub fn with_remote(
        mut self,
        remote: Arc<dyn RemoteStore>,
        connectivity: Arc<dyn Connectivity>,
        call_timeout: Duration,
    ) -> Self {
        self.remote = Some(remote);
        self.connectivity = Some(connectivity);
        self.call_timeout = call_timeout;
        self
    }

    #[must_use]
    pub const fn owner(&self) -> &OwnerId {
        &self.owner
    }

    #[must_use]
    pub const fn replica(&self) -> &ReplicaService {
        &self.replica
    }

    /// Remote store to push to right now, if any
    async fn online_remote(&self) -> Option<&dyn RemoteStore> {
        let remote = self.remote.as_deref()?;
        let online = match &self.connectivity {
            Some(connectivity) => connectivity.is_online().await,
            None => true,
        };
        online.then_some(remote)
    }

    async fn push_note_now(&self, note: Note) -> Result<Note> {
        let Some(remote) = self.online_remote().await else {
            return Ok(note);
        };
        let outcome = push_note(&self.replica, remote, &self.owner, &note, self.call_timeout).await?;
        if matches!(outcome, PushOutcome::Failed(_) | PushOutcome::Deferred) {
            // Still pending; the next sync run retries
            return Ok(note);
        }
        self.replica
            .get_note(&note.id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("note {}", note.id)))
    }

    async fn push_label_now(&self, label: Label) -> Result<Label> {
        let Some(remote) = self.online_remote().await else {
            return Ok(label);
        };
        let outcome =
            push_label(&self.replica, remote, &self.owner, &label, self.call_timeout).await?;
        if matches!(outcome, PushOutcome::Failed(_)) {
            return Ok(label);
        }
        self.replica
            .get_label(&label.id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("label {}", label.id)))
    }

    /// Resolve a full ID or a unique prefix of a live note
    pub async fn resolve_note_id(&self, raw: &str) -> Result<NoteId> {
        if let Ok(id) = raw.trim().parse::<NoteId>() {
            return Ok(id);
        }
        let matches = self.replica.find_notes_by_prefix(&self.owner, raw, 2).await?;
        match matches.as_slice() {
            [id] => Ok(*id),
            [] => Err(Error::NotFound(format!("note {raw}"))),
            _ => Err(Error::InvalidInput(format!(
                "Note ID prefix '{raw}' is ambiguous"
            ))),
        }
    }

    async fn require_own_note(&self, id: &NoteId) -> Result<Note> {
        match self.replica.get_note(id).await? {
            Some(note) if note.owner == self.owner => Ok(note),
            _ => Err(Error::NotFound(format!("note {id}"))),
        }
    }

    async fn require_own_label(&self, id: &LabelId) -> Result<Label> {
        match self.replica.get_label(id).await? {
            Some(label) if label.owner == self.owner => Ok(label),
            _ => Err(Error::NotFound(format!("label {id}"))),
        }
    }

    // ------------------------------------------------------------------
    // Notes
    // ------------------------------------------------------------------

    pub async fn create_note(&self, draft: NoteDraft) -> Result<Note> {
        let note = self.replica.create_note(&self.owner, draft).await?;
        tracing::info!(note_id = %note.id, "Created note");
        self.push_note_now(note).await
    }

    pub async fn get_note(&self, id: &NoteId) -> Result<Note> {
        self.require_own_note(id).await
    }

    pub async fn list_notes(&self, query: &NoteQuery) -> Result<Vec<Note>> {
        self.replica.list_notes(&self.owner, query).await
    }

    pub async fn search_notes(&self, text: &str, limit: usize) -> Result<Vec<Note>> {
        let query = NoteQuery {
            search: Some(text.to_string()),
            limit,
            ..NoteQuery::default()
        };
        self.replica.list_notes(&self.owner, &query).await
    }

    pub async fn list_deleted_notes(&self, limit: usize) -> Result<Vec<Note>> {
        let query = NoteQuery {
            deleted: true,
            limit,
            ..NoteQuery::default()
        };
        self.replica.list_notes(&self.owner, &query).await
    }

    pub async fn update_note(&self, id: &NoteId, patch: &NotePatch) -> Result<Note> {
        self.require_own_note(id).await?;
        if patch.is_empty() {
            return Err(Error::InvalidInput("Nothing to update".to_string()));
        }
        let note = self.replica.update_note(id, patch).await?;
        tracing::info!(note_id = %id, "Updated note");
        self.push_note_now(note).await
    }

    /// Soft delete; a note the remote store never saw is dropped outright
    pub async fn delete_note(&self, id: &NoteId) -> Result<DeleteOutcome<Note>> {
        self.require_own_note(id).await?;
        match self.replica.delete_note(id).await? {
            DeleteOutcome::Purged => {
                tracing::info!(note_id = %id, "Discarded unsynced note");
                Ok(DeleteOutcome::Purged)
            }
            DeleteOutcome::Tombstoned(note) => {
                tracing::info!(note_id = %id, "Deleted note");
                Ok(DeleteOutcome::Tombstoned(self.push_note_now(note).await?))
            }
        }
    }

    pub async fn restore_note(&self, id: &NoteId) -> Result<Note> {
        self.require_own_note(id).await?;
        let note = self.replica.restore_note(id).await?;
        tracing::info!(note_id = %id, status = %note.sync_status, "Restored note");
        self.push_note_now(note).await
    }

    /// Physically remove a note from this device only
    pub async fn purge_note(&self, id: &NoteId) -> Result<()> {
        self.require_own_note(id).await?;
        self.replica.purge_note(id).await?;
        tracing::info!(note_id = %id, "Purged note from local replica");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Labels
    // ------------------------------------------------------------------

    pub async fn create_label(&self, draft: LabelDraft) -> Result<Label> {
        let label = self.replica.create_label(&self.owner, draft).await?;
        tracing::info!(label_id = %label.id, "Created label");
        self.push_label_now(label).await
    }

    pub async fn list_labels(&self) -> Result<Vec<Label>> {
        self.replica.list_labels(&self.owner, false).await
    }

    /// Find a live label by id or by name
    pub async fn resolve_label(&self, raw: &str) -> Result<Label> {
        if let Ok(id) = raw.trim().parse::<LabelId>() {
            return self.require_own_label(&id).await;
        }
        self.replica
            .find_label_by_name(&self.owner, raw)
            .await?
            .ok_or_else(|| Error::NotFound(format!("label {raw}")))
    }

    pub async fn update_label(&self, id: &LabelId, patch: &LabelPatch) -> Result<Label> {
        self.require_own_label(id).await?;
        let label = self.replica.update_label(id, patch).await?;
        tracing::info!(label_id = %id, "Updated label");
        self.push_label_now(label).await
    }

    pub async fn delete_label(&self, id: &LabelId) -> Result<DeleteOutcome<Label>> {
        self.require_own_label(id).await?;
        match self.replica.delete_label(id).await? {
            DeleteOutcome::Purged => Ok(DeleteOutcome::Purged),
            DeleteOutcome::Tombstoned(label) => {
                tracing::info!(label_id = %id, "Deleted label");
                Ok(DeleteOutcome::Tombstoned(self.push_label_now(label).await?))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authority::AuthorityStore;
    use crate::connectivity::ConnectivityFlag;
    use crate::models::SyncStatus;
    use crate::remote::EmbeddedRemote;

    fn owner() -> OwnerId {
        OwnerId::new("user-1")
    }

    fn draft(body: &str) -> NoteDraft {
        NoteDraft {
            title: None,
            body: Some(body.to_string()),
            label_ids: Vec::new(),
        }
    }

    fn online_service(flag: &ConnectivityFlag) -> (NoteService, EmbeddedRemote) {
        let remote = EmbeddedRemote::new(AuthorityStore::open_in_memory().unwrap());
        let service = NoteService::new(ReplicaService::open_in_memory().unwrap(), owner())
            .with_remote(
                Arc::new(remote.clone()),
                Arc::new(flag.clone()),
                Duration::from_secs(5),
            );
        (service, remote)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn online_create_is_synced_immediately() {
        let flag = ConnectivityFlag::new(true);
        let (service, remote) = online_service(&flag);

        let note = service.create_note(draft("hello")).await.unwrap();
        assert_eq!(note.sync_status, SyncStatus::Synced);
        assert!(remote.get_note(&owner(), &note.id).await.is_ok());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn offline_writes_stay_pending() {
        let flag = ConnectivityFlag::new(false);
        let (service, remote) = online_service(&flag);

        let note = service.create_note(draft("hello")).await.unwrap();
        assert_eq!(note.sync_status, SyncStatus::PendingCreate);
        assert!(remote.list_notes(&owner(), true).await.unwrap().is_empty());

        flag.set_online(true);
        let edited = service
            .update_note(
                &note.id,
                &NotePatch {
                    body: Some("hello again".to_string()),
                    ..NotePatch::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(edited.sync_status, SyncStatus::Synced);
        let stored = remote.get_note(&owner(), &note.id).await.unwrap();
        assert_eq!(stored.body.as_deref(), Some("hello again"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn other_owners_notes_are_invisible() {
        let replica = ReplicaService::open_in_memory().unwrap();
        let mine = NoteService::new(replica.clone(), owner());
        let theirs = NoteService::new(replica, OwnerId::new("user-2"));

        let note = mine.create_note(draft("private")).await.unwrap();
        assert!(matches!(
            theirs.get_note(&note.id).await,
            Err(Error::NotFound(_))
        ));
        assert!(theirs.delete_note(&note.id).await.is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn resolve_note_id_accepts_unique_prefix() {
        let service = NoteService::new(ReplicaService::open_in_memory().unwrap(), owner());
        let note = service.create_note(draft("prefix me")).await.unwrap();
        let full = note.id.to_string();

        assert_eq!(service.resolve_note_id(&full).await.unwrap(), note.id);
        assert_eq!(service.resolve_note_id(&full[..13]).await.unwrap(), note.id);
        assert!(service.resolve_note_id("zzzz").await.is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn labels_resolve_by_name_case_insensitively() {
        let service = NoteService::new(ReplicaService::open_in_memory().unwrap(), owner());
        let label = service
            .create_label(LabelDraft {
                name: "Work".to_string(),
                color: None,
            })
            .await
            .unwrap();
        assert_eq!(service.resolve_label("work").await.unwrap().id, label.id);
        assert_eq!(
            service.resolve_label(&label.id.to_string()).await.unwrap().id,
            label.id
        );
    }
}
