//! Authority store migrations

use rusqlite::Connection;

use crate::db::migrations::{apply, get_version};
use crate::error::Result;

/// Run all pending migrations
pub fn run(conn: &Connection) -> Result<()> {
    if get_version(conn)? < 1 {
        migrate_v1(conn)?;
    }
    Ok(())
}

/// Migration to version 1: owner-keyed notes, labels, links, and feed cursors
fn migrate_v1(conn: &Connection) -> Result<()> {
    apply(
        conn,
        1,
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        );
        CREATE TABLE IF NOT EXISTS notes (
            id TEXT PRIMARY KEY,
            owner_id TEXT NOT NULL,
            title TEXT,
            body TEXT,
            is_deleted INTEGER NOT NULL DEFAULT 0,
            deleted_at INTEGER,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_notes_owner_updated ON notes(owner_id, updated_at);
        CREATE TABLE IF NOT EXISTS labels (
            id TEXT PRIMARY KEY,
            owner_id TEXT NOT NULL,
            name TEXT NOT NULL,
            color TEXT NOT NULL,
            is_deleted INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );
        CREATE UNIQUE INDEX IF NOT EXISTS idx_labels_owner_live_name
            ON labels(owner_id, name COLLATE NOCASE) WHERE is_deleted = 0;
        CREATE INDEX IF NOT EXISTS idx_labels_owner_updated ON labels(owner_id, updated_at);
        CREATE TABLE IF NOT EXISTS note_labels (
            note_id TEXT NOT NULL REFERENCES notes(id) ON DELETE CASCADE,
            label_id TEXT NOT NULL REFERENCES labels(id) ON DELETE CASCADE,
            PRIMARY KEY (note_id, label_id)
        );
        CREATE INDEX IF NOT EXISTS idx_note_labels_label ON note_labels(label_id);
        CREATE TABLE IF NOT EXISTS feed_cursors (
            owner_id TEXT NOT NULL,
            scope TEXT NOT NULL,
            last_change_at INTEGER NOT NULL,
            PRIMARY KEY (owner_id, scope)
        );",
    )?;
    tracing::info!("Migrated authority store to version 1");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_live_label_names_are_unique() {
        let conn = Connection::open_in_memory().unwrap();
        run(&conn).unwrap();
        conn.execute(
            "INSERT INTO labels (id, owner_id, name, color, created_at, updated_at)
             VALUES ('l1', 'u1', 'Work', '#808080', 0, 0)",
            [],
        )
        .unwrap();
        let duplicate = conn.execute(
            "INSERT INTO labels (id, owner_id, name, color, created_at, updated_at)
             VALUES ('l2', 'u1', 'work', '#808080', 0, 0)",
            [],
        );
        assert!(duplicate.is_err());

        conn.execute(
            "INSERT INTO labels (id, owner_id, name, color, is_deleted, created_at, updated_at)
             VALUES ('l3', 'u1', 'Work', '#808080', 1, 0, 0)",
            [],
        )
        .unwrap();
    }
}
