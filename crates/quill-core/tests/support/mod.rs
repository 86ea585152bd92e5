//! Shared fixtures for sync integration tests

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use quill_core::authority::AuthorityStore;
use quill_core::clock::ManualClock;
use quill_core::config::SyncSettings;
use quill_core::models::{
    ChangeSet, CreateLabelRequest, CreateNoteRequest, LabelDraft, LabelId, LabelRecord, NoteDraft,
    NoteId, NoteRecord, OwnerId, SyncScope, UpdateLabelRequest, UpdateNoteRequest,
};
use quill_core::remote::{EmbeddedRemote, RemoteError, RemoteResult, RemoteStore};
use quill_core::services::{NoteService, ReplicaService};
use quill_core::sync::SyncOrchestrator;
use quill_core::{Label, Note};

pub fn owner() -> OwnerId {
    OwnerId::new("user-1")
}

/// Remote store that can be told to misbehave
pub struct FaultyRemote {
    inner: EmbeddedRemote,
    offline: AtomicBool,
    lose_next_ack: AtomicBool,
    failing_notes: Mutex<HashSet<NoteId>>,
    calls: AtomicUsize,
}

impl FaultyRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: EmbeddedRemote::new(AuthorityStore::open_in_memory().unwrap()),
            offline: AtomicBool::new(false),
            lose_next_ack: AtomicBool::new(false),
            failing_notes: Mutex::new(HashSet::new()),
            calls: AtomicUsize::new(0),
        })
    }

    /// Every call fails as if the network were down
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// The next note create is committed remotely but reported as timed out
    pub fn lose_next_ack(&self) {
        self.lose_next_ack.store(true, Ordering::SeqCst);
    }

    /// Calls touching this note fail transiently
    pub fn fail_note(&self, id: NoteId) {
        self.failing_notes.lock().unwrap().insert(id);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn embedded(&self) -> &EmbeddedRemote {
        &self.inner
    }

    fn gate(&self) -> RemoteResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.offline.load(Ordering::SeqCst) {
            return Err(RemoteError::Transient("network unreachable".to_string()));
        }
        Ok(())
    }

    fn gate_note(&self, id: &NoteId) -> RemoteResult<()> {
        self.gate()?;
        if self.failing_notes.lock().unwrap().contains(id) {
            return Err(RemoteError::Transient(format!("injected failure for {id}")));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for FaultyRemote {
    async fn create_note(
        &self,
        owner: &OwnerId,
        request: &CreateNoteRequest,
    ) -> RemoteResult<NoteRecord> {
        if let Some(id) = &request.id {
            self.gate_note(id)?;
        } else {
            self.gate()?;
        }
        let record = self.inner.create_note(owner, request).await?;
        if self.lose_next_ack.swap(false, Ordering::SeqCst) {
            return Err(RemoteError::Transient("request timed out".to_string()));
        }
        Ok(record)
    }

    async fn update_note(
        &self,
        owner: &OwnerId,
        id: &NoteId,
        request: &UpdateNoteRequest,
    ) -> RemoteResult<NoteRecord> {
        self.gate_note(id)?;
        self.inner.update_note(owner, id, request).await
    }

    async fn delete_note(&self, owner: &OwnerId, id: &NoteId) -> RemoteResult<NoteRecord> {
        self.gate_note(id)?;
        self.inner.delete_note(owner, id).await
    }

    async fn get_note(&self, owner: &OwnerId, id: &NoteId) -> RemoteResult<NoteRecord> {
        self.gate()?;
        self.inner.get_note(owner, id).await
    }

    async fn list_notes(
        &self,
        owner: &OwnerId,
        include_deleted: bool,
    ) -> RemoteResult<Vec<NoteRecord>> {
        self.gate()?;
        self.inner.list_notes(owner, include_deleted).await
    }

    async fn create_label(
        &self,
        owner: &OwnerId,
        request: &CreateLabelRequest,
    ) -> RemoteResult<LabelRecord> {
        self.gate()?;
        self.inner.create_label(owner, request).await
    }

    async fn update_label(
        &self,
        owner: &OwnerId,
        id: &LabelId,
        request: &UpdateLabelRequest,
    ) -> RemoteResult<LabelRecord> {
        self.gate()?;
        self.inner.update_label(owner, id, request).await
    }

    async fn delete_label(&self, owner: &OwnerId, id: &LabelId) -> RemoteResult<LabelRecord> {
        self.gate()?;
        self.inner.delete_label(owner, id).await
    }

    async fn list_labels(
        &self,
        owner: &OwnerId,
        include_deleted: bool,
    ) -> RemoteResult<Vec<LabelRecord>> {
        self.gate()?;
        self.inner.list_labels(owner, include_deleted).await
    }

    async fn changes_since(
        &self,
        owner: &OwnerId,
        scope: &SyncScope,
        since: i64,
    ) -> RemoteResult<ChangeSet> {
        self.gate()?;
        self.inner.changes_since(owner, scope, since).await
    }

    async fn full_snapshot(&self, owner: &OwnerId, scope: &SyncScope) -> RemoteResult<ChangeSet> {
        self.gate()?;
        self.inner.full_snapshot(owner, scope).await
    }

    async fn current_cursor(&self, owner: &OwnerId, scope: &SyncScope) -> RemoteResult<i64> {
        self.gate()?;
        self.inner.current_cursor(owner, scope).await
    }
}

/// One client device: its own replica, a local-only write path, and a sync engine
pub struct Device {
    pub notes: NoteService,
    pub sync: SyncOrchestrator,
    pub clock: Arc<ManualClock>,
}

impl Device {
    pub fn new(remote: Arc<dyn RemoteStore>, start: i64) -> Self {
        let replica = ReplicaService::open_in_memory().unwrap();
        let clock = Arc::new(ManualClock::new(start));
        Self {
            notes: NoteService::new(replica.clone(), owner()),
            sync: SyncOrchestrator::new(replica, remote, SyncSettings::default())
                .with_clock(clock.clone()),
            clock,
        }
    }

    pub fn replica(&self) -> &ReplicaService {
        self.notes.replica()
    }

    pub async fn note(&self, title: &str, body: &str, label_ids: Vec<LabelId>) -> Note {
        self.notes
            .create_note(NoteDraft {
                title: Some(title.to_string()),
                body: Some(body.to_string()),
                label_ids,
            })
            .await
            .unwrap()
    }

    pub async fn label(&self, name: &str) -> Label {
        self.notes
            .create_label(LabelDraft {
                name: name.to_string(),
                color: None,
            })
            .await
            .unwrap()
    }

    pub async fn reload(&self, id: &NoteId) -> Note {
        self.replica().get_note(id).await.unwrap().unwrap()
    }

    /// Comparable view of every live note: (id, title, body, labels)
    pub async fn contents(&self) -> Vec<(NoteId, Option<String>, Option<String>, Vec<LabelId>)> {
        let mut notes: Vec<_> = self
            .notes
            .list_notes(&Default::default())
            .await
            .unwrap()
            .into_iter()
            .map(|note| (note.id, note.title, note.body, note.label_ids))
            .collect();
        notes.sort_by_key(|note| note.0);
        notes
    }
}
