//! Database connection management

use crate::error::Result;
use rusqlite::Connection;
use std::path::Path;

use super::migrations;

/// Local replica database backed by `SQLite`
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open the replica at the given path, creating it if it doesn't exist
    ///
    /// Runs migrations automatically.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;
        configure(&conn)?;
        migrations::run(&conn)?;
        tracing::debug!(path = %path.as_ref().display(), "Opened local replica");
        Ok(Self { conn })
    }

    /// Open an in-memory database (useful for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        configure(&conn)?;
        migrations::run(&conn)?;
        Ok(Self { conn })
    }

    /// Get a reference to the underlying connection
    pub const fn connection(&self) -> &Connection {
        &self.conn
    }
}

/// Configure `SQLite` pragmas shared by the replica and the authority store
pub(crate) fn configure(conn: &Connection) -> Result<()> {
    // WAL is unavailable for in-memory databases; the pragma then reports "memory"
    conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get::<_, String>(0))?;
    conn.execute_batch(
        "PRAGMA synchronous = NORMAL;
         PRAGMA foreign_keys = ON;
         PRAGMA cache_size = 10000;",
    )?;
    Ok(())
}
