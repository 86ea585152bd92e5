//! Local replica database layer for Quill

mod connection;
mod cursor_repository;
mod label_repository;
pub(crate) mod migrations;
mod note_repository;

pub use connection::Database;
pub(crate) use connection::configure;
pub use cursor_repository::{CursorRepository, SqliteCursorRepository};
pub use label_repository::{LabelRepository, SqliteLabelRepository};
pub use note_repository::{NoteRepository, SqliteNoteRepository};

use std::fmt::Display;
use std::str::FromStr;

use rusqlite::types::Type;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::{LabelId, OwnerId};

/// Result of a local delete
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteOutcome<T> {
    /// The entity never reached the remote store and was removed outright
    Purged,
    /// A tombstone was kept and the delete queued for push
    Tombstoned(T),
}

/// Whether a remote record was written over the local row during pull
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullApply {
    Applied,
    /// Local row has unpushed changes and was left alone
    KeptPending,
}

/// Pending entity counts for one owner and entity kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pending_create: usize,
    pub pending_update: usize,
    pub pending_delete: usize,
    /// Pending entities parked after a remote rejection
    pub rejected: usize,
}

impl StatusCounts {
    #[must_use]
    pub const fn total_pending(&self) -> usize {
        self.pending_create + self.pending_update + self.pending_delete
    }
}

/// Parse a text column into a typed value, reporting failures as conversion errors
pub(crate) fn parse_column<T>(idx: usize, raw: &str) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    raw.parse().map_err(|error: T::Err| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            Box::new(std::io::Error::other(format!("invalid value '{raw}': {error}"))),
        )
    })
}

/// Next modification time for a row last written at `previous`.
///
/// Always moves forward so a compare-and-set on `updated_at` observes every edit.
pub(crate) fn next_timestamp(previous: i64) -> i64 {
    crate::util::now_millis().max(previous + 1)
}

/// Reject label references that are unknown, deleted, or owned by someone else
pub(crate) fn ensure_live_labels(
    conn: &Connection,
    owner: &OwnerId,
    label_ids: &[LabelId],
) -> Result<()> {
    let mut stmt = conn.prepare_cached(
        "SELECT EXISTS(SELECT 1 FROM labels WHERE id = ? AND owner_id = ? AND is_deleted = 0)",
    )?;
    for label_id in label_ids {
        let exists: bool =
            stmt.query_row(rusqlite::params![label_id.as_str(), owner.as_str()], |row| {
                row.get(0)
            })?;
        if !exists {
            return Err(Error::InvalidInput(format!("Unknown label: {label_id}")));
        }
    }
    Ok(())
}

/// Sort and deduplicate a label set
pub(crate) fn canonical_labels(mut label_ids: Vec<LabelId>) -> Vec<LabelId> {
    label_ids.sort_unstable();
    label_ids.dedup();
    label_ids
}
