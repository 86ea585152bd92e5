//! Shared handle to the local replica used by the write path and the sync engine.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;

use crate::config::PullPolicy;
use crate::db::{
    CursorRepository, Database, DeleteOutcome, LabelRepository, NoteRepository, PullApply,
    SqliteCursorRepository, SqliteLabelRepository, SqliteNoteRepository, StatusCounts,
};
use crate::models::{
    ChangeSet, Label, LabelDraft, LabelId, LabelPatch, Note, NoteDraft, NoteId, NotePatch,
    NoteQuery, OwnerId, SyncCursor, SyncScope,
};
use crate::Result;

/// What one pull changed locally
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ApplySummary {
    pub labels_applied: usize,
    pub notes_applied: usize,
    /// Remote records not applied because the local row has unpushed edits
    pub kept_pending: usize,
    /// Links dropped because the label is unknown locally
    pub skipped_links: usize,
}

/// Pending work and cursor state for one owner
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusSummary {
    pub notes: StatusCounts,
    pub labels: StatusCounts,
    pub cursors: Vec<SyncCursor>,
}

impl StatusSummary {
    #[must_use]
    pub const fn total_pending(&self) -> usize {
        self.notes.total_pending() + self.labels.total_pending()
    }
}

/// Thread-safe service for replica and repository operations.
#[derive(Clone)]
pub struct ReplicaService {
    db: Arc<Mutex<Database>>,
    db_path: Option<PathBuf>,
}

impl ReplicaService {
    /// Open the replica at the given filesystem path.
    pub fn open_path(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::open(&db_path)?;
        tracing::info!(path = %db_path.display(), "Opened local replica");
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            db_path: Some(db_path),
        })
    }

    /// Open an in-memory replica (primarily for tests).
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            db: Arc::new(Mutex::new(Database::open_in_memory()?)),
            db_path: None,
        })
    }

    /// Location of the replica file, if on disk
    #[must_use]
    pub fn db_path(&self) -> Option<&PathBuf> {
        self.db_path.as_ref()
    }

    // ------------------------------------------------------------------
    // Notes
    // ------------------------------------------------------------------

    pub async fn create_note(&self, owner: &OwnerId, draft: NoteDraft) -> Result<Note> {
        let db = self.db.lock().await;
        SqliteNoteRepository::new(db.connection()).create(owner, draft)
    }

    /// Fetch a note by id, tombstones included.
    pub async fn get_note(&self, id: &NoteId) -> Result<Option<Note>> {
        let db = self.db.lock().await;
        SqliteNoteRepository::new(db.connection()).get(id)
    }

    /// List notes newest-first.
    pub async fn list_notes(&self, owner: &OwnerId, query: &NoteQuery) -> Result<Vec<Note>> {
        let db = self.db.lock().await;
        SqliteNoteRepository::new(db.connection()).list(owner, query)
    }

    pub async fn find_notes_by_prefix(
        &self,
        owner: &OwnerId,
        prefix: &str,
        limit: usize,
    ) -> Result<Vec<NoteId>> {
        let db = self.db.lock().await;
        SqliteNoteRepository::new(db.connection()).find_by_prefix(owner, prefix, limit)
    }

    pub async fn update_note(&self, id: &NoteId, patch: &NotePatch) -> Result<Note> {
        let db = self.db.lock().await;
        SqliteNoteRepository::new(db.connection()).update(id, patch)
    }

    pub async fn delete_note(&self, id: &NoteId) -> Result<DeleteOutcome<Note>> {
        let db = self.db.lock().await;
        SqliteNoteRepository::new(db.connection()).delete(id)
    }

    pub async fn restore_note(&self, id: &NoteId) -> Result<Note> {
        let db = self.db.lock().await;
        SqliteNoteRepository::new(db.connection()).restore(id)
    }

    /// Physically remove a note; nothing is queued for the remote store.
    pub async fn purge_note(&self, id: &NoteId) -> Result<()> {
        let db = self.db.lock().await;
        SqliteNoteRepository::new(db.connection()).purge(id)
    }

    pub async fn pending_notes(&self, owner: &OwnerId) -> Result<Vec<Note>> {
        let db = self.db.lock().await;
        SqliteNoteRepository::new(db.connection()).pending(owner)
    }

    pub async fn rejected_notes(&self, owner: &OwnerId) -> Result<Vec<Note>> {
        let db = self.db.lock().await;
        SqliteNoteRepository::new(db.connection()).rejected(owner)
    }

    pub async fn mark_note_synced(&self, id: &NoteId, pushed_at: i64) -> Result<bool> {
        let db = self.db.lock().await;
        SqliteNoteRepository::new(db.connection()).mark_synced(id, pushed_at)
    }

    pub async fn record_note_rejection(
        &self,
        id: &NoteId,
        pushed_at: i64,
        message: &str,
    ) -> Result<bool> {
        let db = self.db.lock().await;
        SqliteNoteRepository::new(db.connection()).record_rejection(id, pushed_at, message)
    }

    // ------------------------------------------------------------------
    // Labels
    // ------------------------------------------------------------------

    pub async fn create_label(&self, owner: &OwnerId, draft: LabelDraft) -> Result<Label> {
        let db = self.db.lock().await;
        SqliteLabelRepository::new(db.connection()).create(owner, draft)
    }

    pub async fn get_label(&self, id: &LabelId) -> Result<Option<Label>> {
        let db = self.db.lock().await;
        SqliteLabelRepository::new(db.connection()).get(id)
    }

    pub async fn find_label_by_name(&self, owner: &OwnerId, name: &str) -> Result<Option<Label>> {
        let db = self.db.lock().await;
        SqliteLabelRepository::new(db.connection()).find_by_name(owner, name)
    }

    pub async fn list_labels(&self, owner: &OwnerId, include_deleted: bool) -> Result<Vec<Label>> {
        let db = self.db.lock().await;
        SqliteLabelRepository::new(db.connection()).list(owner, include_deleted)
    }

    pub async fn update_label(&self, id: &LabelId, patch: &LabelPatch) -> Result<Label> {
        let db = self.db.lock().await;
        SqliteLabelRepository::new(db.connection()).update(id, patch)
    }

    pub async fn delete_label(&self, id: &LabelId) -> Result<DeleteOutcome<Label>> {
        let db = self.db.lock().await;
        SqliteLabelRepository::new(db.connection()).delete(id)
    }

    pub async fn pending_labels(&self, owner: &OwnerId) -> Result<Vec<Label>> {
        let db = self.db.lock().await;
        SqliteLabelRepository::new(db.connection()).pending(owner)
    }

    pub async fn rejected_labels(&self, owner: &OwnerId) -> Result<Vec<Label>> {
        let db = self.db.lock().await;
        SqliteLabelRepository::new(db.connection()).rejected(owner)
    }

    pub async fn mark_label_synced(&self, id: &LabelId, pushed_at: i64) -> Result<bool> {
        let db = self.db.lock().await;
        SqliteLabelRepository::new(db.connection()).mark_synced(id, pushed_at)
    }

    pub async fn record_label_rejection(
        &self,
        id: &LabelId,
        pushed_at: i64,
        message: &str,
    ) -> Result<bool> {
        let db = self.db.lock().await;
        SqliteLabelRepository::new(db.connection()).record_rejection(id, pushed_at, message)
    }

    // ------------------------------------------------------------------
    // Sync state
    // ------------------------------------------------------------------

    /// Overwrite local rows with a pulled change set in one transaction.
    ///
    /// Labels land first so the note links rebuilt afterwards can point at them.
    pub async fn apply_change_set(
        &self,
        owner: &OwnerId,
        changes: &ChangeSet,
        policy: PullPolicy,
    ) -> Result<ApplySummary> {
        let db = self.db.lock().await;
        let conn = db.connection();
        let tx = conn.unchecked_transaction()?;
        let labels = SqliteLabelRepository::new(conn);
        let notes = SqliteNoteRepository::new(conn);
        let mut summary = ApplySummary::default();

        for record in &changes.labels {
            if record.owner_id != *owner {
                tracing::warn!(label_id = %record.id, "Ignoring pulled label of another owner");
                continue;
            }
            match labels.apply_remote(record, policy)? {
                PullApply::Applied => summary.labels_applied += 1,
                PullApply::KeptPending => {
                    tracing::debug!(label_id = %record.id, "Kept pending local label over pulled state");
                    summary.kept_pending += 1;
                }
            }
        }

        for record in &changes.notes {
            if record.owner_id != *owner {
                tracing::warn!(note_id = %record.id, "Ignoring pulled note of another owner");
                continue;
            }
            match notes.apply_remote(record, policy)? {
                PullApply::Applied => {
                    summary.notes_applied += 1;
                    let skipped = notes.replace_links(&record.id, &record.label_ids)?;
                    if !skipped.is_empty() {
                        tracing::warn!(
                            note_id = %record.id,
                            skipped = skipped.len(),
                            "Pulled note links labels unknown locally"
                        );
                        summary.skipped_links += skipped.len();
                    }
                }
                PullApply::KeptPending => {
                    tracing::debug!(note_id = %record.id, "Kept pending local note over pulled state");
                    summary.kept_pending += 1;
                }
            }
        }

        tx.commit()?;
        Ok(summary)
    }

    pub async fn cursor(&self, owner: &OwnerId, scope: &SyncScope) -> Result<Option<SyncCursor>> {
        let db = self.db.lock().await;
        SqliteCursorRepository::new(db.connection()).get(owner, scope)
    }

    pub async fn advance_cursor(
        &self,
        owner: &OwnerId,
        scope: &SyncScope,
        last_change_at: Option<i64>,
        synced_at: i64,
    ) -> Result<SyncCursor> {
        let db = self.db.lock().await;
        SqliteCursorRepository::new(db.connection()).advance(
            owner,
            scope,
            last_change_at,
            synced_at,
        )
    }

    /// Pending counts per entity kind plus every cursor of the owner
    pub async fn status_summary(&self, owner: &OwnerId) -> Result<StatusSummary> {
        let db = self.db.lock().await;
        let conn = db.connection();
        Ok(StatusSummary {
            notes: SqliteNoteRepository::new(conn).status_counts(owner)?,
            labels: SqliteLabelRepository::new(conn).status_counts(owner)?,
            cursors: SqliteCursorRepository::new(conn).list(owner)?,
        })
    }
}
