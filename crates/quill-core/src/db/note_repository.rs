//! Note repository implementation

#![allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT/OFFSET

use crate::config::PullPolicy;
use crate::error::{Error, Result};
use crate::models::{
    LabelId, Note, NoteDraft, NoteId, NotePatch, NoteQuery, NoteRecord, OwnerId, SyncStatus,
    DeleteTransition,
};
use crate::util::{escape_like, like_pattern, normalize_text_option};
use rusqlite::{params, Connection, OptionalExtension};

use super::{
    canonical_labels, ensure_live_labels, next_timestamp, parse_column, DeleteOutcome, PullApply,
    StatusCounts,
};

const NOTE_COLUMNS: &str = "id, owner_id, title, body, is_deleted, deleted_at, created_at, updated_at, sync_status, push_error";

/// Trait for note storage operations
pub trait NoteRepository {
    /// Create a new note, pending until the remote store acknowledges it
    fn create(&self, owner: &OwnerId, draft: NoteDraft) -> Result<Note>;

    /// Get a note by ID, tombstones included
    fn get(&self, id: &NoteId) -> Result<Option<Note>>;

    /// List notes, newest first
    fn list(&self, owner: &OwnerId, query: &NoteQuery) -> Result<Vec<Note>>;

    /// Live note IDs starting with `prefix`
    fn find_by_prefix(&self, owner: &OwnerId, prefix: &str, limit: usize) -> Result<Vec<NoteId>>;

    /// Apply a local edit
    fn update(&self, id: &NoteId, patch: &NotePatch) -> Result<Note>;

    /// Soft delete a note, or drop it if it was never pushed
    fn delete(&self, id: &NoteId) -> Result<DeleteOutcome<Note>>;

    /// Undo a soft delete
    fn restore(&self, id: &NoteId) -> Result<Note>;

    /// Physically remove a note; never synced
    fn purge(&self, id: &NoteId) -> Result<()>;

    /// Notes awaiting push, oldest modification first
    fn pending(&self, owner: &OwnerId) -> Result<Vec<Note>>;

    /// Pending notes parked after a remote rejection
    fn rejected(&self, owner: &OwnerId) -> Result<Vec<Note>>;

    /// Mark a pushed version as acknowledged.
    ///
    /// Returns `false` when the note changed after `pushed_at`; it then stays pending.
    fn mark_synced(&self, id: &NoteId, pushed_at: i64) -> Result<bool>;

    /// Park the pushed version after a remote rejection
    fn record_rejection(&self, id: &NoteId, pushed_at: i64, message: &str) -> Result<bool>;

    /// Overwrite the local row with the remote record (links are rebuilt separately)
    fn apply_remote(&self, record: &NoteRecord, policy: PullPolicy) -> Result<PullApply>;

    /// Replace a note's links with exactly `label_ids`, skipping labels unknown locally.
    ///
    /// Returns the skipped label IDs.
    fn replace_links(&self, id: &NoteId, label_ids: &[LabelId]) -> Result<Vec<LabelId>>;

    /// Pending and rejected counts
    fn status_counts(&self, owner: &OwnerId) -> Result<StatusCounts>;
}

/// `SQLite` implementation of `NoteRepository`
pub struct SqliteNoteRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteNoteRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Parse a note from a database row; labels are loaded separately
    fn parse_note(row: &rusqlite::Row<'_>) -> rusqlite::Result<Note> {
        let id: String = row.get(0)?;
        let owner: String = row.get(1)?;
        let status: String = row.get(8)?;
        Ok(Note {
            id: parse_column(0, &id)?,
            owner: OwnerId::new(owner),
            title: row.get(2)?,
            body: row.get(3)?,
            label_ids: Vec::new(),
            is_deleted: row.get::<_, i32>(4)? != 0,
            deleted_at: row.get(5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
            sync_status: parse_column(8, &status)?,
            push_error: row.get(9)?,
        })
    }

    fn load_labels(&self, note: &mut Note) -> Result<()> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT label_id FROM note_labels WHERE note_id = ?")?;
        let ids = stmt
            .query_map(params![note.id.as_str()], |row| {
                let raw: String = row.get(0)?;
                parse_column::<LabelId>(0, &raw)
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        note.label_ids = canonical_labels(ids);
        Ok(())
    }

    fn query_notes(&self, sql: &str, params: impl rusqlite::Params) -> Result<Vec<Note>> {
        let mut stmt = self.conn.prepare(sql)?;
        let mut notes = stmt
            .query_map(params, Self::parse_note)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        for note in &mut notes {
            self.load_labels(note)?;
        }
        Ok(notes)
    }

    fn require_live(&self, id: &NoteId) -> Result<Note> {
        match self.get(id)? {
            Some(note) if !note.is_deleted => Ok(note),
            _ => Err(Error::NotFound(format!("note {id}"))),
        }
    }

    fn pre_delete_status(&self, id: &NoteId) -> Result<Option<SyncStatus>> {
        let raw: Option<Option<String>> = self
            .conn
            .query_row(
                "SELECT pre_delete_status FROM notes WHERE id = ?",
                params![id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        raw.flatten()
            .map(|raw| parse_column(0, &raw).map_err(Error::from))
            .transpose()
    }

    fn insert_links(&self, id: &NoteId, label_ids: &[LabelId]) -> Result<()> {
        let mut stmt = self
            .conn
            .prepare_cached("INSERT OR IGNORE INTO note_labels (note_id, label_id) VALUES (?, ?)")?;
        for label_id in label_ids {
            stmt.execute(params![id.as_str(), label_id.as_str()])?;
        }
        Ok(())
    }
}

impl NoteRepository for SqliteNoteRepository<'_> {
    fn create(&self, owner: &OwnerId, draft: NoteDraft) -> Result<Note> {
        let note = Note::new(owner.clone(), draft);
        if note.is_empty() {
            return Err(Error::InvalidInput(
                "Note needs a title or a body".to_string(),
            ));
        }
        ensure_live_labels(self.conn, owner, &note.label_ids)?;

        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO notes (id, owner_id, title, body, is_deleted, deleted_at, created_at, updated_at, sync_status)
             VALUES (?, ?, ?, ?, 0, NULL, ?, ?, ?)",
            params![
                note.id.as_str(),
                owner.as_str(),
                note.title,
                note.body,
                note.created_at,
                note.updated_at,
                note.sync_status.as_str(),
            ],
        )?;
        self.insert_links(&note.id, &note.label_ids)?;
        tx.commit()?;

        tracing::debug!(note_id = %note.id, owner = %owner, "Created note locally");
        Ok(note)
    }

    fn get(&self, id: &NoteId) -> Result<Option<Note>> {
        let note = self
            .conn
            .query_row(
                &format!("SELECT {NOTE_COLUMNS} FROM notes WHERE id = ?"),
                params![id.as_str()],
                Self::parse_note,
            )
            .optional()?;
        let Some(mut note) = note else {
            return Ok(None);
        };
        self.load_labels(&mut note)?;
        Ok(Some(note))
    }

    fn list(&self, owner: &OwnerId, query: &NoteQuery) -> Result<Vec<Note>> {
        let search = query
            .search
            .as_deref()
            .map(str::trim)
            .filter(|search| !search.is_empty())
            .map(like_pattern);
        self.query_notes(
            &format!(
                "SELECT {NOTE_COLUMNS} FROM notes n
                 WHERE n.owner_id = ?1
                   AND n.is_deleted = ?2
                   AND (?3 IS NULL OR EXISTS (
                        SELECT 1 FROM note_labels nl WHERE nl.note_id = n.id AND nl.label_id = ?3))
                   AND (?4 IS NULL OR n.title LIKE ?4 ESCAPE '\\' OR n.body LIKE ?4 ESCAPE '\\')
                 ORDER BY n.updated_at DESC
                 LIMIT ?5 OFFSET ?6"
            ),
            params![
                owner.as_str(),
                i32::from(query.deleted),
                query.label.map(|label| label.as_str()),
                search,
                query.limit as i64,
                query.offset as i64,
            ],
        )
    }

    fn find_by_prefix(&self, owner: &OwnerId, prefix: &str, limit: usize) -> Result<Vec<NoteId>> {
        let mut stmt = self.conn.prepare(
            "SELECT id FROM notes
             WHERE owner_id = ? AND is_deleted = 0 AND id LIKE ? ESCAPE '\\'
             ORDER BY updated_at DESC
             LIMIT ?",
        )?;
        let pattern = format!("{}%", escape_like(prefix.trim()));
        let ids = stmt
            .query_map(params![owner.as_str(), pattern, limit as i64], |row| {
                let raw: String = row.get(0)?;
                parse_column::<NoteId>(0, &raw)
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids)
    }

    fn update(&self, id: &NoteId, patch: &NotePatch) -> Result<Note> {
        let current = self.require_live(id)?;
        let title = match &patch.title {
            Some(title) => normalize_text_option(Some(title.clone())),
            None => current.title.clone(),
        };
        let body = match &patch.body {
            Some(body) if body.trim().is_empty() => None,
            Some(body) => Some(body.clone()),
            None => current.body.clone(),
        };
        if title.is_none() && body.is_none() {
            return Err(Error::InvalidInput(
                "Note needs a title or a body".to_string(),
            ));
        }
        let label_ids = patch.label_ids.clone().map(canonical_labels);
        if let Some(label_ids) = &label_ids {
            ensure_live_labels(self.conn, &current.owner, label_ids)?;
        }

        let status = current.sync_status.after_local_update();
        let updated_at = next_timestamp(current.updated_at);

        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "UPDATE notes
             SET title = ?, body = ?, updated_at = ?, sync_status = ?, push_error = NULL
             WHERE id = ?",
            params![title, body, updated_at, status.as_str(), id.as_str()],
        )?;
        if let Some(label_ids) = &label_ids {
            tx.execute(
                "DELETE FROM note_labels WHERE note_id = ?",
                params![id.as_str()],
            )?;
            self.insert_links(id, label_ids)?;
        }
        tx.commit()?;

        tracing::debug!(note_id = %id, status = %status, "Updated note locally");
        self.get(id)?
            .ok_or_else(|| Error::NotFound(format!("note {id}")))
    }

    fn delete(&self, id: &NoteId) -> Result<DeleteOutcome<Note>> {
        let current = self.require_live(id)?;
        match current.sync_status.on_delete() {
            DeleteTransition::Purge => {
                self.conn
                    .execute("DELETE FROM notes WHERE id = ?", params![id.as_str()])?;
                tracing::debug!(note_id = %id, "Dropped never-pushed note");
                Ok(DeleteOutcome::Purged)
            }
            DeleteTransition::Tombstone => {
                let now = next_timestamp(current.updated_at);
                self.conn.execute(
                    "UPDATE notes
                     SET is_deleted = 1, deleted_at = ?, updated_at = ?,
                         pre_delete_status = sync_status, sync_status = ?, push_error = NULL
                     WHERE id = ?",
                    params![
                        now,
                        now,
                        SyncStatus::PendingDelete.as_str(),
                        id.as_str()
                    ],
                )?;
                tracing::debug!(note_id = %id, "Soft deleted note locally");
                let note = self
                    .get(id)?
                    .ok_or_else(|| Error::NotFound(format!("note {id}")))?;
                Ok(DeleteOutcome::Tombstoned(note))
            }
        }
    }

    fn restore(&self, id: &NoteId) -> Result<Note> {
        let current = self
            .get(id)?
            .ok_or_else(|| Error::NotFound(format!("note {id}")))?;
        if !current.is_deleted {
            return Err(Error::InvalidInput(format!("Note {id} is not deleted")));
        }

        // An unpushed delete unwinds to whatever was queued before it
        let status = match current.sync_status {
            SyncStatus::PendingDelete => self
                .pre_delete_status(id)?
                .unwrap_or(SyncStatus::PendingUpdate),
            other => other.after_local_update(),
        };
        let updated_at = next_timestamp(current.updated_at);
        self.conn.execute(
            "UPDATE notes
             SET is_deleted = 0, deleted_at = NULL, updated_at = ?, sync_status = ?,
                 pre_delete_status = NULL, push_error = NULL
             WHERE id = ?",
            params![updated_at, status.as_str(), id.as_str()],
        )?;

        tracing::debug!(note_id = %id, status = %status, "Restored note locally");
        self.get(id)?
            .ok_or_else(|| Error::NotFound(format!("note {id}")))
    }

    fn purge(&self, id: &NoteId) -> Result<()> {
        let rows = self
            .conn
            .execute("DELETE FROM notes WHERE id = ?", params![id.as_str()])?;
        if rows == 0 {
            return Err(Error::NotFound(format!("note {id}")));
        }
        tracing::debug!(note_id = %id, "Purged note locally");
        Ok(())
    }

    fn pending(&self, owner: &OwnerId) -> Result<Vec<Note>> {
        self.query_notes(
            &format!(
                "SELECT {NOTE_COLUMNS} FROM notes
                 WHERE owner_id = ? AND sync_status != 'synced' AND push_error IS NULL
                 ORDER BY updated_at ASC, rowid ASC"
            ),
            params![owner.as_str()],
        )
    }

    fn rejected(&self, owner: &OwnerId) -> Result<Vec<Note>> {
        self.query_notes(
            &format!(
                "SELECT {NOTE_COLUMNS} FROM notes
                 WHERE owner_id = ? AND sync_status != 'synced' AND push_error IS NOT NULL
                 ORDER BY updated_at ASC, rowid ASC"
            ),
            params![owner.as_str()],
        )
    }

    fn mark_synced(&self, id: &NoteId, pushed_at: i64) -> Result<bool> {
        let rows = self.conn.execute(
            "UPDATE notes
             SET sync_status = 'synced', pre_delete_status = NULL, push_error = NULL
             WHERE id = ? AND updated_at = ?",
            params![id.as_str(), pushed_at],
        )?;
        if rows > 0 {
            return Ok(true);
        }
        // A restore during the push may have unwound to `synced` while the remote
        // now holds the pushed state; queue the local state again.
        self.conn.execute(
            "UPDATE notes SET sync_status = 'pending_update'
             WHERE id = ? AND updated_at != ? AND sync_status = 'synced'",
            params![id.as_str(), pushed_at],
        )?;
        Ok(false)
    }

    fn record_rejection(&self, id: &NoteId, pushed_at: i64, message: &str) -> Result<bool> {
        let rows = self.conn.execute(
            "UPDATE notes SET push_error = ? WHERE id = ? AND updated_at = ?",
            params![message, id.as_str(), pushed_at],
        )?;
        Ok(rows > 0)
    }

    fn apply_remote(&self, record: &NoteRecord, policy: PullPolicy) -> Result<PullApply> {
        let local_status: Option<String> = self
            .conn
            .query_row(
                "SELECT sync_status FROM notes WHERE id = ?",
                params![record.id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(raw) = local_status {
            let status: SyncStatus = parse_column(0, &raw)?;
            if status.is_pending() && policy == PullPolicy::ProtectPending {
                return Ok(PullApply::KeptPending);
            }
        }

        self.conn.execute(
            "INSERT INTO notes (id, owner_id, title, body, is_deleted, deleted_at, created_at, updated_at, sync_status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'synced')
             ON CONFLICT(id) DO UPDATE SET
                owner_id = excluded.owner_id,
                title = excluded.title,
                body = excluded.body,
                is_deleted = excluded.is_deleted,
                deleted_at = excluded.deleted_at,
                created_at = excluded.created_at,
                updated_at = excluded.updated_at,
                sync_status = 'synced',
                pre_delete_status = NULL,
                push_error = NULL",
            params![
                record.id.as_str(),
                record.owner_id.as_str(),
                record.title,
                record.body,
                i32::from(record.is_deleted),
                record.deleted_at,
                record.created_at,
                record.updated_at,
            ],
        )?;
        Ok(PullApply::Applied)
    }

    fn replace_links(&self, id: &NoteId, label_ids: &[LabelId]) -> Result<Vec<LabelId>> {
        self.conn.execute(
            "DELETE FROM note_labels WHERE note_id = ?",
            params![id.as_str()],
        )?;
        let mut known = self
            .conn
            .prepare_cached("SELECT EXISTS(SELECT 1 FROM labels WHERE id = ?)")?;
        let mut skipped = Vec::new();
        let mut linked = Vec::with_capacity(label_ids.len());
        for label_id in label_ids {
            let exists: bool = known.query_row(params![label_id.as_str()], |row| row.get(0))?;
            if exists {
                linked.push(*label_id);
            } else {
                skipped.push(*label_id);
            }
        }
        self.insert_links(id, &linked)?;
        Ok(skipped)
    }

    fn status_counts(&self, owner: &OwnerId) -> Result<StatusCounts> {
        let mut stmt = self.conn.prepare(
            "SELECT sync_status, push_error IS NOT NULL, COUNT(*)
             FROM notes
             WHERE owner_id = ? AND sync_status != 'synced'
             GROUP BY sync_status, push_error IS NOT NULL",
        )?;
        let rows = stmt
            .query_map(params![owner.as_str()], |row| {
                let raw: String = row.get(0)?;
                Ok((
                    parse_column::<SyncStatus>(0, &raw)?,
                    row.get::<_, bool>(1)?,
                    row.get::<_, usize>(2)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tally(rows))
    }
}

/// Fold grouped `(status, rejected, count)` rows into counts
pub(super) fn tally(rows: Vec<(SyncStatus, bool, usize)>) -> StatusCounts {
    let mut counts = StatusCounts::default();
    for (status, rejected, count) in rows {
        if rejected {
            counts.rejected += count;
            continue;
        }
        match status {
            SyncStatus::PendingCreate => counts.pending_create += count,
            SyncStatus::PendingUpdate => counts.pending_update += count,
            SyncStatus::PendingDelete => counts.pending_delete += count,
            SyncStatus::Synced => {}
        }
    }
    counts
}
