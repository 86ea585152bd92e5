//! Local replica migrations

use crate::error::Result;
use rusqlite::Connection;

/// Current schema version
const CURRENT_VERSION: i64 = 2;

/// Run all pending migrations
pub fn run(conn: &Connection) -> Result<()> {
    let version = get_version(conn)?;

    if version < 1 {
        migrate_v1(conn)?;
    }
    if version < 2 {
        migrate_v2(conn)?;
    }

    Ok(())
}

/// Get the current schema version
pub(crate) fn get_version(conn: &Connection) -> Result<i64> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
        [],
        |row| row.get(0),
    )?;

    if !exists {
        return Ok(0);
    }

    let version = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;
    Ok(version)
}

/// Run a migration's statements atomically and record the version
pub(crate) fn apply(conn: &Connection, version: i64, sql: &str) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(sql)?;
    tx.execute(
        "INSERT INTO schema_version (version) VALUES (?)",
        [version],
    )?;
    tx.commit()?;
    Ok(())
}

/// Migration to version 1: notes, labels, and links
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
            updated_at INTEGER NOT NULL,
            sync_status TEXT NOT NULL DEFAULT 'pending_create'
                CHECK (sync_status IN ('synced', 'pending_create', 'pending_update', 'pending_delete')),
            pre_delete_status TEXT,
            push_error TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_notes_owner_updated ON notes(owner_id, updated_at DESC);
        CREATE INDEX IF NOT EXISTS idx_notes_sync_status ON notes(owner_id, sync_status);
        CREATE TABLE IF NOT EXISTS labels (
            id TEXT PRIMARY KEY,
            owner_id TEXT NOT NULL,
            name TEXT NOT NULL,
            color TEXT NOT NULL,
            is_deleted INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            sync_status TEXT NOT NULL DEFAULT 'pending_create'
                CHECK (sync_status IN ('synced', 'pending_create', 'pending_update', 'pending_delete')),
            push_error TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_labels_owner_name ON labels(owner_id, name COLLATE NOCASE);
        CREATE TABLE IF NOT EXISTS note_labels (
            note_id TEXT NOT NULL REFERENCES notes(id) ON DELETE CASCADE,
            label_id TEXT NOT NULL REFERENCES labels(id) ON DELETE CASCADE,
            PRIMARY KEY (note_id, label_id)
        );
        CREATE INDEX IF NOT EXISTS idx_note_labels_label ON note_labels(label_id);",
    )?;
    tracing::info!("Migrated local replica to version 1");
    Ok(())
}

/// Migration to version 2: per-scope sync cursors
fn migrate_v2(conn: &Connection) -> Result<()> {
    apply(
        conn,
        2,
        "CREATE TABLE IF NOT EXISTS sync_cursors (
            owner_id TEXT NOT NULL,
            scope TEXT NOT NULL,
            last_change_at INTEGER,
            last_synced_at INTEGER,
            PRIMARY KEY (owner_id, scope)
        );",
    )?;
    tracing::info!("Migrated local replica to version {CURRENT_VERSION}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> Connection {
        Connection::open_in_memory().unwrap()
    }

    #[test]
    fn test_migrations() {
        let conn = setup();
        run(&conn).unwrap();
        assert_eq!(get_version(&conn).unwrap(), CURRENT_VERSION);
    }

    #[test]
    fn test_migrations_idempotent() {
        let conn = setup();
        run(&conn).unwrap();
        run(&conn).unwrap();
        assert_eq!(get_version(&conn).unwrap(), CURRENT_VERSION);
    }

    #[test]
    fn test_sync_status_is_constrained() {
        let conn = setup();
        run(&conn).unwrap();
        let result = conn.execute(
            "INSERT INTO notes (id, owner_id, created_at, updated_at, sync_status)
             VALUES ('n1', 'u1', 0, 0, 'pending')",
            [],
        );
        assert!(result.is_err());
    }
}
