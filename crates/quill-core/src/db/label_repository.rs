//! Label repository implementation

use crate::config::PullPolicy;
use crate::error::{Error, Result};
use crate::models::{
    validate_label_color, validate_label_name, DeleteTransition, Label, LabelDraft, LabelId,
    LabelPatch, LabelRecord, OwnerId, SyncStatus,
};
use rusqlite::{params, Connection, OptionalExtension};

use super::note_repository::tally;
use super::{next_timestamp, parse_column, DeleteOutcome, PullApply, StatusCounts};

const LABEL_COLUMNS: &str =
    "id, owner_id, name, color, is_deleted, created_at, updated_at, sync_status, push_error";

/// Trait for label storage operations
pub trait LabelRepository {
    /// Create a label; names are unique per owner among live labels
    fn create(&self, owner: &OwnerId, draft: LabelDraft) -> Result<Label>;

    /// Get a label by ID, tombstones included
    fn get(&self, id: &LabelId) -> Result<Option<Label>>;

    /// Find a live label by name (case-insensitive)
    fn find_by_name(&self, owner: &OwnerId, name: &str) -> Result<Option<Label>>;

    /// List labels by name
    fn list(&self, owner: &OwnerId, include_deleted: bool) -> Result<Vec<Label>>;

    /// Rename and/or recolor a label
    fn update(&self, id: &LabelId, patch: &LabelPatch) -> Result<Label>;

    /// Soft delete a label and unlink it from notes, or drop it if never pushed
    fn delete(&self, id: &LabelId) -> Result<DeleteOutcome<Label>>;

    /// Labels awaiting push, oldest modification first
    fn pending(&self, owner: &OwnerId) -> Result<Vec<Label>>;

    /// Pending labels parked after a remote rejection
    fn rejected(&self, owner: &OwnerId) -> Result<Vec<Label>>;

    /// Mark a pushed version as acknowledged
    fn mark_synced(&self, id: &LabelId, pushed_at: i64) -> Result<bool>;

    /// Park the pushed version after a remote rejection
    fn record_rejection(&self, id: &LabelId, pushed_at: i64, message: &str) -> Result<bool>;

    /// Overwrite the local row with the remote record
    fn apply_remote(&self, record: &LabelRecord, policy: PullPolicy) -> Result<PullApply>;

    /// Pending and rejected counts
    fn status_counts(&self, owner: &OwnerId) -> Result<StatusCounts>;
}

/// `SQLite` implementation of `LabelRepository`
pub struct SqliteLabelRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteLabelRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_label(row: &rusqlite::Row<'_>) -> rusqlite::Result<Label> {
        let id: String = row.get(0)?;
        let owner: String = row.get(1)?;
        let status: String = row.get(7)?;
        Ok(Label {
            id: parse_column(0, &id)?,
            owner: OwnerId::new(owner),
            name: row.get(2)?,
            color: row.get(3)?,
            is_deleted: row.get::<_, i32>(4)? != 0,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
            sync_status: parse_column(7, &status)?,
            push_error: row.get(8)?,
        })
    }

    fn query_labels(&self, sql: &str, params: impl rusqlite::Params) -> Result<Vec<Label>> {
        let mut stmt = self.conn.prepare(sql)?;
        let labels = stmt
            .query_map(params, Self::parse_label)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(labels)
    }

    fn ensure_name_free(&self, owner: &OwnerId, name: &str, except: Option<&LabelId>) -> Result<()> {
        if let Some(existing) = self.find_by_name(owner, name)? {
            if except != Some(&existing.id) {
                return Err(Error::InvalidInput(format!(
                    "Label '{name}' already exists"
                )));
            }
        }
        Ok(())
    }
}

impl LabelRepository for SqliteLabelRepository<'_> {
    fn create(&self, owner: &OwnerId, draft: LabelDraft) -> Result<Label> {
        let label = Label::new(owner.clone(), draft)?;
        self.ensure_name_free(owner, &label.name, None)?;

        self.conn.execute(
            "INSERT INTO labels (id, owner_id, name, color, is_deleted, created_at, updated_at, sync_status)
             VALUES (?, ?, ?, ?, 0, ?, ?, ?)",
            params![
                label.id.as_str(),
                owner.as_str(),
                label.name,
                label.color,
                label.created_at,
                label.updated_at,
                label.sync_status.as_str(),
            ],
        )?;

        tracing::debug!(label_id = %label.id, owner = %owner, "Created label locally");
        Ok(label)
    }

    fn get(&self, id: &LabelId) -> Result<Option<Label>> {
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

    fn find_by_name(&self, owner: &OwnerId, name: &str) -> Result<Option<Label>> {
        let label = self
            .conn
            .query_row(
                &format!(
                    "SELECT {LABEL_COLUMNS} FROM labels
                     WHERE owner_id = ? AND name = ? COLLATE NOCASE AND is_deleted = 0
                     ORDER BY created_at
                     LIMIT 1"
                ),
                params![owner.as_str(), name.trim()],
                Self::parse_label,
            )
            .optional()?;
        Ok(label)
    }

    fn list(&self, owner: &OwnerId, include_deleted: bool) -> Result<Vec<Label>> {
        self.query_labels(
            &format!(
                "SELECT {LABEL_COLUMNS} FROM labels
                 WHERE owner_id = ? AND (? OR is_deleted = 0)
                 ORDER BY name COLLATE NOCASE ASC"
            ),
            params![owner.as_str(), include_deleted],
        )
    }

    fn update(&self, id: &LabelId, patch: &LabelPatch) -> Result<Label> {
        let current = match self.get(id)? {
            Some(label) if !label.is_deleted => label,
            _ => return Err(Error::NotFound(format!("label {id}"))),
        };
        let name = match &patch.name {
            Some(name) => validate_label_name(name)?,
            None => current.name.clone(),
        };
        let color = match &patch.color {
            Some(color) => validate_label_color(color)?,
            None => current.color.clone(),
        };
        self.ensure_name_free(&current.owner, &name, Some(id))?;

        let status = current.sync_status.after_local_update();
        self.conn.execute(
            "UPDATE labels
             SET name = ?, color = ?, updated_at = ?, sync_status = ?, push_error = NULL
             WHERE id = ?",
            params![
                name,
                color,
                next_timestamp(current.updated_at),
                status.as_str(),
                id.as_str()
            ],
        )?;

        tracing::debug!(label_id = %id, status = %status, "Updated label locally");
        self.get(id)?
            .ok_or_else(|| Error::NotFound(format!("label {id}")))
    }

    fn delete(&self, id: &LabelId) -> Result<DeleteOutcome<Label>> {
        let current = match self.get(id)? {
            Some(label) if !label.is_deleted => label,
            _ => return Err(Error::NotFound(format!("label {id}"))),
        };

        match current.sync_status.on_delete() {
            DeleteTransition::Purge => {
                self.conn
                    .execute("DELETE FROM labels WHERE id = ?", params![id.as_str()])?;
                tracing::debug!(label_id = %id, "Dropped never-pushed label");
                Ok(DeleteOutcome::Purged)
            }
            DeleteTransition::Tombstone => {
                let tx = self.conn.unchecked_transaction()?;
                tx.execute(
                    "UPDATE labels
                     SET is_deleted = 1, updated_at = ?, sync_status = ?, push_error = NULL
                     WHERE id = ?",
                    params![
                        next_timestamp(current.updated_at),
                        SyncStatus::PendingDelete.as_str(),
                        id.as_str()
                    ],
                )?;
                tx.execute(
                    "DELETE FROM note_labels WHERE label_id = ?",
                    params![id.as_str()],
                )?;
                tx.commit()?;
                tracing::debug!(label_id = %id, "Soft deleted label locally");
                let label = self
                    .get(id)?
                    .ok_or_else(|| Error::NotFound(format!("label {id}")))?;
                Ok(DeleteOutcome::Tombstoned(label))
            }
        }
    }

    fn pending(&self, owner: &OwnerId) -> Result<Vec<Label>> {
        self.query_labels(
            &format!(
                "SELECT {LABEL_COLUMNS} FROM labels
                 WHERE owner_id = ? AND sync_status != 'synced' AND push_error IS NULL
                 ORDER BY updated_at ASC, rowid ASC"
            ),
            params![owner.as_str()],
        )
    }

    fn rejected(&self, owner: &OwnerId) -> Result<Vec<Label>> {
        self.query_labels(
            &format!(
                "SELECT {LABEL_COLUMNS} FROM labels
                 WHERE owner_id = ? AND sync_status != 'synced' AND push_error IS NOT NULL
                 ORDER BY updated_at ASC, rowid ASC"
            ),
            params![owner.as_str()],
        )
    }

    fn mark_synced(&self, id: &LabelId, pushed_at: i64) -> Result<bool> {
        let rows = self.conn.execute(
            "UPDATE labels SET sync_status = 'synced', push_error = NULL
             WHERE id = ? AND updated_at = ?",
            params![id.as_str(), pushed_at],
        )?;
        Ok(rows > 0)
    }

    fn record_rejection(&self, id: &LabelId, pushed_at: i64, message: &str) -> Result<bool> {
        let rows = self.conn.execute(
            "UPDATE labels SET push_error = ? WHERE id = ? AND updated_at = ?",
            params![message, id.as_str(), pushed_at],
        )?;
        Ok(rows > 0)
    }

    fn apply_remote(&self, record: &LabelRecord, policy: PullPolicy) -> Result<PullApply> {
        let local_status: Option<String> = self
            .conn
            .query_row(
                "SELECT sync_status FROM labels WHERE id = ?",
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
            "INSERT INTO labels (id, owner_id, name, color, is_deleted, created_at, updated_at, sync_status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'synced')
             ON CONFLICT(id) DO UPDATE SET
                owner_id = excluded.owner_id,
                name = excluded.name,
                color = excluded.color,
                is_deleted = excluded.is_deleted,
                created_at = excluded.created_at,
                updated_at = excluded.updated_at,
                sync_status = 'synced',
                push_error = NULL",
            params![
                record.id.as_str(),
                record.owner_id.as_str(),
                record.name,
                record.color,
                i32::from(record.is_deleted),
                record.created_at,
                record.updated_at,
            ],
        )?;
        if record.is_deleted {
            self.conn.execute(
                "DELETE FROM note_labels WHERE label_id = ?",
                params![record.id.as_str()],
            )?;
        }
        Ok(PullApply::Applied)
    }

    fn status_counts(&self, owner: &OwnerId) -> Result<StatusCounts> {
        let mut stmt = self.conn.prepare(
            "SELECT sync_status, push_error IS NOT NULL, COUNT(*)
             FROM labels
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
