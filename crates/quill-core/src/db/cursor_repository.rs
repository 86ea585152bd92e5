//! Sync cursor repository

use crate::error::Result;
use crate::models::{OwnerId, SyncCursor, SyncScope};
use rusqlite::{params, Connection, OptionalExtension};

use super::parse_column;

/// Trait for per-scope sync cursor storage
pub trait CursorRepository {
    /// Get the cursor for a scope, if it was ever advanced
    fn get(&self, owner: &OwnerId, scope: &SyncScope) -> Result<Option<SyncCursor>>;

    /// Move a cursor forward; values older than the stored ones are ignored
    fn advance(
        &self,
        owner: &OwnerId,
        scope: &SyncScope,
        last_change_at: Option<i64>,
        synced_at: i64,
    ) -> Result<SyncCursor>;

    /// All cursors of an owner
    fn list(&self, owner: &OwnerId) -> Result<Vec<SyncCursor>>;
}

/// `SQLite` implementation of `CursorRepository`
pub struct SqliteCursorRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteCursorRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_cursor(row: &rusqlite::Row<'_>) -> rusqlite::Result<SyncCursor> {
        let owner: String = row.get(0)?;
        let scope: String = row.get(1)?;
        Ok(SyncCursor {
            owner: OwnerId::new(owner),
            scope: parse_column(1, &scope)?,
            last_change_at: row.get(2)?,
            last_synced_at: row.get(3)?,
        })
    }
}

impl CursorRepository for SqliteCursorRepository<'_> {
    fn get(&self, owner: &OwnerId, scope: &SyncScope) -> Result<Option<SyncCursor>> {
        let cursor = self
            .conn
            .query_row(
                "SELECT owner_id, scope, last_change_at, last_synced_at
                 FROM sync_cursors WHERE owner_id = ? AND scope = ?",
                params![owner.as_str(), scope.key()],
                Self::parse_cursor,
            )
            .optional()?;
        Ok(cursor)
    }

    fn advance(
        &self,
        owner: &OwnerId,
        scope: &SyncScope,
        last_change_at: Option<i64>,
        synced_at: i64,
    ) -> Result<SyncCursor> {
        // MAX() with a NULL argument yields NULL in SQLite, hence the COALESCEs
        self.conn.execute(
            "INSERT INTO sync_cursors (owner_id, scope, last_change_at, last_synced_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(owner_id, scope) DO UPDATE SET
                last_change_at = CASE
                    WHEN excluded.last_change_at IS NULL THEN sync_cursors.last_change_at
                    ELSE MAX(COALESCE(sync_cursors.last_change_at, excluded.last_change_at), excluded.last_change_at)
                END,
                last_synced_at = MAX(COALESCE(sync_cursors.last_synced_at, excluded.last_synced_at), excluded.last_synced_at)",
            params![owner.as_str(), scope.key(), last_change_at, synced_at],
        )?;

        let cursor = self
            .get(owner, scope)?
            .unwrap_or_else(|| SyncCursor::empty(owner.clone(), *scope));
        tracing::debug!(
            owner = %owner,
            scope = %scope,
            last_synced_at = ?cursor.last_synced_at,
            "Advanced sync cursor"
        );
        Ok(cursor)
    }

    fn list(&self, owner: &OwnerId) -> Result<Vec<SyncCursor>> {
        let mut stmt = self.conn.prepare(
            "SELECT owner_id, scope, last_change_at, last_synced_at
             FROM sync_cursors WHERE owner_id = ? ORDER BY scope",
        )?;
        let cursors = stmt
            .query_map(params![owner.as_str()], Self::parse_cursor)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(cursors)
    }
}
