//! Remote authoritative store.
//!
//! Holds the durable multi-device copy of every owner's notes and labels. It
//! has no notion of pending state: every accepted write bumps `updated_at`,
//! which is what the change feed in [`feed`] orders by. All mutations accept
//! caller-supplied ids and are idempotent with respect to them.

#![allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT/OFFSET

mod feed;
mod schema;

use std::path::Path;
use std::sync::Arc;

use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;

use crate::clock::{Clock, SystemClock};
use crate::db::{canonical_labels, configure, parse_column};
use crate::models::{
    validate_label_color, validate_label_name, CreateLabelRequest, CreateNoteRequest, LabelId,
    LabelRecord, NoteId, NoteRecord, OwnerId, UpdateLabelRequest, UpdateNoteRequest,
    DEFAULT_LABEL_COLOR,
};
use crate::util::{like_pattern, normalize_text_option};

/// Longest accepted note title, in characters
pub const MAX_TITLE_CHARS: usize = 500;
/// Longest accepted note body, in characters
pub const MAX_BODY_CHARS: usize = 100_000;

const NOTE_COLUMNS: &str =
    "id, owner_id, title, body, is_deleted, deleted_at, created_at, updated_at";
const LABEL_COLUMNS: &str = "id, owner_id, name, color, is_deleted, created_at, updated_at";

/// Errors returned by the authority store
#[derive(Debug, Error)]
pub enum AuthorityError {
    #[error("Not found: {0}")]
    NotFound(String),

    /// The request is well-formed but violates a validation rule
    #[error("Rejected: {0}")]
    Rejected(String),

    /// The id is already taken by another owner
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Setup(#[from] crate::Error),
}

pub type AuthorityResult<T> = Result<T, AuthorityError>;

/// `SQLite`-backed authority for all owners
pub struct AuthorityStore {
    conn: Connection,
    clock: Arc<dyn Clock>,
}

impl AuthorityStore {
    /// Open the store at the given path, creating it if it doesn't exist
    pub fn open(path: impl AsRef<Path>) -> AuthorityResult<Self> {
        let conn = Connection::open(path.as_ref())?;
        Self::from_connection(conn)
    }

    /// Open an in-memory store (useful for testing)
    pub fn open_in_memory() -> AuthorityResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> AuthorityResult<Self> {
        configure(&conn)?;
        schema::run(&conn)?;
        Ok(Self {
            conn,
            clock: Arc::new(SystemClock),
        })
    }

    /// Replace the clock used to stamp writes
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Modification stamp for the owner's next write.
    ///
    /// Strictly later than every stamp and feed cursor already handed out for
    /// the owner, so a write in the same millisecond as a feed read is still
    /// `> cursor`.
    fn stamp(&self, owner: &OwnerId) -> AuthorityResult<i64> {
        let latest: i64 = self.conn.query_row(
            "SELECT MAX(
                COALESCE((SELECT MAX(updated_at) FROM labels WHERE owner_id = ?1), 0),
                COALESCE((SELECT MAX(updated_at) FROM notes WHERE owner_id = ?1), 0),
                COALESCE((SELECT MAX(last_change_at) FROM feed_cursors WHERE owner_id = ?1), 0))",
            params![owner.as_str()],
            |row| row.get(0),
        )?;
        Ok(self.clock.now_millis().max(latest + 1))
    }

    // ------------------------------------------------------------------
    // Notes
    // ------------------------------------------------------------------

    /// Create a note.
    ///
    /// Replaying a known id for the same owner is an upsert: an identical
    /// replay returns the stored note untouched, a replay carrying newer
    /// content replaces title, body and labels.
    pub fn create_note(
        &self,
        owner: &OwnerId,
        request: CreateNoteRequest,
    ) -> AuthorityResult<NoteRecord> {
        let id = request.id.unwrap_or_default();

        if let Some(existing) = self.load_note(&id)? {
            if existing.owner_id != *owner {
                return Err(AuthorityError::Conflict(format!(
                    "note {id} belongs to another owner"
                )));
            }
            return self.replay_note_create(owner, existing, request);
        }

        let (title, body) = validate_note_text(request.title, request.body)?;
        let label_ids = canonical_labels(request.label_ids);
        self.ensure_live_labels(owner, &label_ids)?;

        let tx = self.conn.unchecked_transaction()?;
        let now = self.stamp(owner)?;
        tx.execute(
            "INSERT INTO notes (id, owner_id, title, body, is_deleted, deleted_at, created_at, updated_at)
             VALUES (?, ?, ?, ?, 0, NULL, ?, ?)",
            params![id.as_str(), owner.as_str(), title, body, now, now],
        )?;
        self.write_links(&id, &label_ids)?;
        tx.commit()?;

        tracing::info!(note_id = %id, owner = %owner, "Created note");
        self.require_note(owner, &id)
    }

    fn replay_note_create(
        &self,
        owner: &OwnerId,
        existing: NoteRecord,
        request: CreateNoteRequest,
    ) -> AuthorityResult<NoteRecord> {
        let (title, body) = validate_note_text(request.title, request.body)?;
        let label_ids = canonical_labels(request.label_ids);
        if existing.title == title && existing.body == body && existing.label_ids == label_ids {
            tracing::debug!(note_id = %existing.id, owner = %owner, "Replayed note create");
            return Ok(existing);
        }

        tracing::debug!(note_id = %existing.id, owner = %owner, "Replayed note create carries newer content");
        let id = existing.id;
        self.update_note(
            owner,
            &id,
            UpdateNoteRequest {
                title,
                body,
                label_ids,
                is_deleted: existing.is_deleted,
            },
        )
    }

    pub fn get_note(&self, owner: &OwnerId, id: &NoteId) -> AuthorityResult<NoteRecord> {
        self.require_note(owner, id)
    }

    /// Notes newest first
    pub fn list_notes(
        &self,
        owner: &OwnerId,
        include_deleted: bool,
        limit: usize,
        offset: usize,
    ) -> AuthorityResult<Vec<NoteRecord>> {
        self.query_notes(
            &format!(
                "SELECT {NOTE_COLUMNS} FROM notes
                 WHERE owner_id = ? AND (? OR is_deleted = 0)
                 ORDER BY updated_at DESC
                 LIMIT ? OFFSET ?"
            ),
            params![owner.as_str(), include_deleted, limit as i64, offset as i64],
        )
    }

    /// Case-insensitive substring search over live notes
    pub fn search_notes(
        &self,
        owner: &OwnerId,
        query: &str,
        limit: usize,
    ) -> AuthorityResult<Vec<NoteRecord>> {
        let pattern = like_pattern(query.trim());
        self.query_notes(
            &format!(
                "SELECT {NOTE_COLUMNS} FROM notes
                 WHERE owner_id = ?1 AND is_deleted = 0
                   AND (title LIKE ?2 ESCAPE '\\' OR body LIKE ?2 ESCAPE '\\')
                 ORDER BY updated_at DESC
                 LIMIT ?3"
            ),
            params![owner.as_str(), pattern, limit as i64],
        )
    }

    /// Replace the full state of a note, including its deleted flag and labels
    pub fn update_note(
        &self,
        owner: &OwnerId,
        id: &NoteId,
        request: UpdateNoteRequest,
    ) -> AuthorityResult<NoteRecord> {
        let tx = self.conn.unchecked_transaction()?;
        let existing = self.require_note(owner, id)?;
        let (title, body) = validate_note_text(request.title, request.body)?;
        let label_ids = canonical_labels(request.label_ids);
        self.ensure_live_labels(owner, &label_ids)?;

        let now = self.stamp(owner)?;
        let deleted_at = request
            .is_deleted
            .then(|| existing.deleted_at.unwrap_or(now));
        tx.execute(
            "UPDATE notes
             SET title = ?, body = ?, is_deleted = ?, deleted_at = ?, updated_at = ?
             WHERE id = ?",
            params![
                title,
                body,
                i32::from(request.is_deleted),
                deleted_at,
                now,
                id.as_str()
            ],
        )?;
        self.write_links(id, &label_ids)?;
        tx.commit()?;

        tracing::info!(note_id = %id, owner = %owner, deleted = request.is_deleted, "Updated note");
        self.require_note(owner, id)
    }

    /// Soft delete; deleting a tombstone again is a no-op
    pub fn delete_note(&self, owner: &OwnerId, id: &NoteId) -> AuthorityResult<NoteRecord> {
        let existing = self.require_note(owner, id)?;
        if existing.is_deleted {
            return Ok(existing);
        }
        let now = self.stamp(owner)?;
        self.conn.execute(
            "UPDATE notes SET is_deleted = 1, deleted_at = ?, updated_at = ? WHERE id = ?",
            params![now, now, id.as_str()],
        )?;
        tracing::info!(note_id = %id, owner = %owner, "Soft deleted note");
        self.require_note(owner, id)
    }

    /// Undo a soft delete; restoring a live note is a no-op
    pub fn restore_note(&self, owner: &OwnerId, id: &NoteId) -> AuthorityResult<NoteRecord> {
        let existing = self.require_note(owner, id)?;
        if !existing.is_deleted {
            return Ok(existing);
        }
        let now = self.stamp(owner)?;
        self.conn.execute(
            "UPDATE notes SET is_deleted = 0, deleted_at = NULL, updated_at = ? WHERE id = ?",
            params![now, id.as_str()],
        )?;
        tracing::info!(note_id = %id, owner = %owner, "Restored note");
        self.require_note(owner, id)
    }

    /// Physically remove a note and its links
    pub fn purge_note(&self, owner: &OwnerId, id: &NoteId) -> AuthorityResult<()> {
        let rows = self.conn.execute(
            "DELETE FROM notes WHERE id = ? AND owner_id = ?",
            params![id.as_str(), owner.as_str()],
        )?;
        if rows == 0 {
            return Err(AuthorityError::NotFound(format!("note {id}")));
        }
        tracing::info!(note_id = %id, owner = %owner, "Purged note");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Labels
    // ------------------------------------------------------------------

    /// Create a label.
    ///
    /// Replaying a known id for the same owner applies the requested name and
    /// color to the stored label; a replay against a deleted label returns the
    /// tombstone.
    pub fn create_label(
        &self,
        owner: &OwnerId,
        request: CreateLabelRequest,
    ) -> AuthorityResult<LabelRecord> {
        let id = request.id.unwrap_or_default();
        if let Some(existing) = self.load_label(&id)? {
            if existing.owner_id != *owner {
                return Err(AuthorityError::Conflict(format!(
                    "label {id} belongs to another owner"
                )));
            }
            let unchanged = existing.name == request.name.trim()
                && request
                    .color
                    .as_deref()
                    .map_or(true, |color| color.eq_ignore_ascii_case(&existing.color));
            if existing.is_deleted || unchanged {
                tracing::debug!(label_id = %id, owner = %owner, "Replayed label create");
                return Ok(existing);
            }
            tracing::debug!(label_id = %id, owner = %owner, "Replayed label create carries newer content");
            return self.update_label(
                owner,
                &id,
                UpdateLabelRequest {
                    name: Some(request.name),
                    color: request.color,
                },
            );
        }

        let name = validate_label_name(&request.name).map_err(reject)?;
        let color = match request.color.as_deref() {
            Some(color) => validate_label_color(color).map_err(reject)?,
            None => DEFAULT_LABEL_COLOR.to_string(),
        };
        self.ensure_label_name_free(owner, &name, None)?;

        let now = self.stamp(owner)?;
        self.conn.execute(
            "INSERT INTO labels (id, owner_id, name, color, is_deleted, created_at, updated_at)
             VALUES (?, ?, ?, ?, 0, ?, ?)",
            params![id.as_str(), owner.as_str(), name, color, now, now],
        )?;

        tracing::info!(label_id = %id, owner = %owner, "Created label");
        self.require_label(owner, &id)
    }

    pub fn get_label(&self, owner: &OwnerId, id: &LabelId) -> AuthorityResult<LabelRecord> {
        self.require_label(owner, id)
    }

    /// Labels by name
    pub fn list_labels(
        &self,
        owner: &OwnerId,
        include_deleted: bool,
    ) -> AuthorityResult<Vec<LabelRecord>> {
        self.query_labels(
            &format!(
                "SELECT {LABEL_COLUMNS} FROM labels
                 WHERE owner_id = ? AND (? OR is_deleted = 0)
                 ORDER BY name COLLATE NOCASE ASC"
            ),
            params![owner.as_str(), include_deleted],
        )
    }

    /// Rename and/or recolor a live label
    pub fn update_label(
        &self,
        owner: &OwnerId,
        id: &LabelId,
        request: UpdateLabelRequest,
    ) -> AuthorityResult<LabelRecord> {
        let existing = self.require_label(owner, id)?;
        if existing.is_deleted {
            return Err(AuthorityError::NotFound(format!("label {id}")));
        }
        let name = match request.name.as_deref() {
            Some(name) => validate_label_name(name).map_err(reject)?,
            None => existing.name.clone(),
        };
        let color = match request.color.as_deref() {
            Some(color) => validate_label_color(color).map_err(reject)?,
            None => existing.color.clone(),
        };
        self.ensure_label_name_free(owner, &name, Some(id))?;

        let now = self.stamp(owner)?;
        self.conn.execute(
            "UPDATE labels SET name = ?, color = ?, updated_at = ? WHERE id = ?",
            params![name, color, now, id.as_str()],
        )?;
        tracing::info!(label_id = %id, owner = %owner, "Updated label");
        self.require_label(owner, id)
    }

    /// Soft delete a label and detach it from every note.
    ///
    /// Detached notes get a new `updated_at` so the change feed carries their
    /// shrunken label sets.
    pub fn delete_label(&self, owner: &OwnerId, id: &LabelId) -> AuthorityResult<LabelRecord> {
        let existing = self.require_label(owner, id)?;
        if existing.is_deleted {
            return Ok(existing);
        }

        let tx = self.conn.unchecked_transaction()?;
        let linked: Vec<String> = {
            let mut stmt = tx.prepare(
                "SELECT n.id FROM notes n
                 JOIN note_labels nl ON nl.note_id = n.id
                 WHERE nl.label_id = ?",
            )?;
            let rows = stmt
                .query_map(params![id.as_str()], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };
        for note_id in &linked {
            tx.execute(
                "UPDATE notes SET updated_at = ? WHERE id = ?",
                params![self.stamp(owner)?, note_id],
            )?;
        }
        tx.execute(
            "DELETE FROM note_labels WHERE label_id = ?",
            params![id.as_str()],
        )?;
        tx.execute(
            "UPDATE labels SET is_deleted = 1, updated_at = ? WHERE id = ?",
            params![self.stamp(owner)?, id.as_str()],
        )?;
        tx.commit()?;

        tracing::info!(
            label_id = %id,
            owner = %owner,
            detached_notes = linked.len(),
            "Soft deleted label"
        );
        self.require_label(owner, id)
    }

    // ------------------------------------------------------------------
    // Row helpers
    // ------------------------------------------------------------------

    fn parse_note(row: &rusqlite::Row<'_>) -> rusqlite::Result<NoteRecord> {
        let id: String = row.get(0)?;
        let owner: String = row.get(1)?;
        Ok(NoteRecord {
            id: parse_column(0, &id)?,
            owner_id: OwnerId::new(owner),
            title: row.get(2)?,
            body: row.get(3)?,
            label_ids: Vec::new(),
            is_deleted: row.get::<_, i32>(4)? != 0,
            deleted_at: row.get(5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }

    fn parse_label(row: &rusqlite::Row<'_>) -> rusqlite::Result<LabelRecord> {
        let id: String = row.get(0)?;
        let owner: String = row.get(1)?;
        Ok(LabelRecord {
            id: parse_column(0, &id)?,
            owner_id: OwnerId::new(owner),
            name: row.get(2)?,
            color: row.get(3)?,
            is_deleted: row.get::<_, i32>(4)? != 0,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
        })
    }

    fn query_notes(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> AuthorityResult<Vec<NoteRecord>> {
        let mut stmt = self.conn.prepare(sql)?;
        let mut notes = stmt
            .query_map(params, Self::parse_note)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        for note in &mut notes {
            note.label_ids = self.note_label_ids(&note.id)?;
        }
        Ok(notes)
    }

    fn query_labels(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> AuthorityResult<Vec<LabelRecord>> {
        let mut stmt = self.conn.prepare(sql)?;
        let labels = stmt
            .query_map(params, Self::parse_label)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(labels)
    }

    fn note_label_ids(&self, id: &NoteId) -> AuthorityResult<Vec<LabelId>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT label_id FROM note_labels WHERE note_id = ?")?;
        let ids = stmt
            .query_map(params![id.as_str()], |row| {
                let raw: String = row.get(0)?;
                parse_column::<LabelId>(0, &raw)
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(canonical_labels(ids))
    }

    fn load_note(&self, id: &NoteId) -> AuthorityResult<Option<NoteRecord>> {
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
        note.label_ids = self.note_label_ids(&note.id)?;
        Ok(Some(note))
    }

    fn require_note(&self, owner: &OwnerId, id: &NoteId) -> AuthorityResult<NoteRecord> {
        match self.load_note(id)? {
            Some(note) if note.owner_id == *owner => Ok(note),
            _ => Err(AuthorityError::NotFound(format!("note {id}"))),
        }
    }

    fn load_label(&self, id: &LabelId) -> AuthorityResult<Option<LabelRecord>> {
        let label = self
            .conn
            .query_row(
                &format!("SELECT {LABEL_COLUMNS} FROM labels WHERE id = ?"),
                params![id.as_str()],
                Self::parse_label,
            )
            .optional()?;
        Ok(label)
    }

    fn require_label(&self, owner: &OwnerId, id: &LabelId) -> AuthorityResult<LabelRecord> {
        match self.load_label(id)? {
            Some(label) if label.owner_id == *owner => Ok(label),
            _ => Err(AuthorityError::NotFound(format!("label {id}"))),
        }
    }

    /// Links may only point at the owner's live labels
    fn ensure_live_labels(&self, owner: &OwnerId, label_ids: &[LabelId]) -> AuthorityResult<()> {
        for label_id in label_ids {
            match self.load_label(label_id)? {
                Some(label) if label.owner_id == *owner && !label.is_deleted => {}
                _ => {
                    return Err(AuthorityError::Rejected(format!(
                        "unknown label {label_id}"
                    )))
                }
            }
        }
        Ok(())
    }

    fn ensure_label_name_free(
        &self,
        owner: &OwnerId,
        name: &str,
        except: Option<&LabelId>,
    ) -> AuthorityResult<()> {
        let holder: Option<String> = self
            .conn
            .query_row(
                "SELECT id FROM labels
                 WHERE owner_id = ? AND name = ? COLLATE NOCASE AND is_deleted = 0",
                params![owner.as_str(), name],
                |row| row.get(0),
            )
            .optional()?;
        match holder {
            Some(holder) if except.map(LabelId::as_str).as_deref() != Some(holder.as_str()) => Err(
                AuthorityError::Rejected(format!("label name '{name}' already exists")),
            ),
            _ => Ok(()),
        }
    }

    fn write_links(&self, id: &NoteId, label_ids: &[LabelId]) -> AuthorityResult<()> {
        self.conn.execute(
            "DELETE FROM note_labels WHERE note_id = ?",
            params![id.as_str()],
        )?;
        let mut stmt = self
            .conn
            .prepare_cached("INSERT INTO note_labels (note_id, label_id) VALUES (?, ?)")?;
        for label_id in label_ids {
            stmt.execute(params![id.as_str(), label_id.as_str()])?;
        }
        Ok(())
    }
}

fn reject(error: crate::Error) -> AuthorityError {
    match error {
        crate::Error::InvalidInput(message) => AuthorityError::Rejected(message),
        other => AuthorityError::Setup(other),
    }
}

fn validate_note_text(
    title: Option<String>,
    body: Option<String>,
) -> AuthorityResult<(Option<String>, Option<String>)> {
    let title = normalize_text_option(title);
    let body = body.filter(|body| !body.trim().is_empty());
    if title.is_none() && body.is_none() {
        return Err(AuthorityError::Rejected(
            "note needs a title or a body".to_string(),
        ));
    }
    if title
        .as_deref()
        .is_some_and(|title| title.chars().count() > MAX_TITLE_CHARS)
    {
        return Err(AuthorityError::Rejected(format!(
            "title exceeds {MAX_TITLE_CHARS} characters"
        )));
    }
    if body
        .as_deref()
        .is_some_and(|body| body.chars().count() > MAX_BODY_CHARS)
    {
        return Err(AuthorityError::Rejected(format!(
            "body exceeds {MAX_BODY_CHARS} characters"
        )));
    }
    Ok((title, body))
}
