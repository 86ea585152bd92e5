//! Note model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::{LabelId, OwnerId, SyncStatus};
use crate::util::normalize_text_option;

/// A unique identifier for a note, using UUID v7 (time-sortable)
///
/// Generated on the device that creates the note and kept stable across
/// every retry of its remote create.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NoteId(Uuid);

impl NoteId {
    /// Create a new unique note ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for NoteId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for NoteId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// A note as held by the local replica
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    /// Unique identifier
    pub id: NoteId,
    /// Owning user
    pub owner: OwnerId,
    pub title: Option<String>,
    pub body: Option<String>,
    /// Attached labels, sorted by id
    pub label_ids: Vec<LabelId>,
    /// Soft delete flag
    pub is_deleted: bool,
    /// Soft delete timestamp (Unix ms)
    pub deleted_at: Option<i64>,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
    /// Last update timestamp (Unix ms)
    pub updated_at: i64,
    pub sync_status: SyncStatus,
    /// Last remote rejection; the note is not pushed again until edited
    pub push_error: Option<String>,
}

impl Note {
    /// Build a fresh, never-pushed note from a draft.
    #[must_use]
    pub fn new(owner: OwnerId, draft: NoteDraft) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        let mut label_ids = draft.label_ids;
        label_ids.sort_unstable();
        label_ids.dedup();
        Self {
            id: NoteId::new(),
            owner,
            title: normalize_text_option(draft.title),
            body: draft.body.filter(|body| !body.trim().is_empty()),
            label_ids,
            is_deleted: false,
            deleted_at: None,
            created_at: now,
            updated_at: now,
            sync_status: SyncStatus::PendingCreate,
            push_error: None,
        }
    }

    /// Title if present, otherwise the first line of the body, truncated to `max_len` characters
    #[must_use]
    pub fn title_preview(&self, max_len: usize) -> String {
        self.title
            .as_deref()
            .or_else(|| self.body.as_deref().and_then(|body| body.lines().next()))
            .unwrap_or("")
            .chars()
            .take(max_len)
            .collect()
    }

    /// Check if the note has neither a title nor a non-blank body
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.body.as_deref().is_none_or(|body| body.trim().is_empty())
    }

    #[must_use]
    pub fn has_label(&self, label_id: &LabelId) -> bool {
        self.label_ids.binary_search(label_id).is_ok()
    }
}

/// User input for a new note
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteDraft {
    pub title: Option<String>,
    pub body: Option<String>,
    #[serde(default)]
    pub label_ids: Vec<LabelId>,
}

/// Partial edit of a note; `None` fields keep their current value
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotePatch {
    pub title: Option<String>,
    pub body: Option<String>,
    pub label_ids: Option<Vec<LabelId>>,
}

impl NotePatch {
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.title.is_none() && self.body.is_none() && self.label_ids.is_none()
    }
}

/// Filters for listing notes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoteQuery {
    /// Only notes carrying this label
    pub label: Option<LabelId>,
    /// Case-insensitive substring of title or body
    pub search: Option<String>,
    /// List tombstones instead of live notes
    pub deleted: bool,
    pub limit: usize,
    pub offset: usize,
}

impl Default for NoteQuery {
    fn default() -> Self {
        Self {
            label: None,
            search: None,
            deleted: false,
            limit: 100,
            offset: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner() -> OwnerId {
        OwnerId::new("user-1")
    }

    #[test]
    fn test_note_id_unique() {
        let id1 = NoteId::new();
        let id2 = NoteId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_note_id_parse() {
        let id = NoteId::new();
        let parsed: NoteId = id.as_str().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_note_new_is_pending_create() {
        let note = Note::new(
            owner(),
            NoteDraft {
                title: Some("  Groceries ".to_string()),
                body: Some("Buy milk".to_string()),
                label_ids: Vec::new(),
            },
        );
        assert_eq!(note.title.as_deref(), Some("Groceries"));
        assert_eq!(note.sync_status, SyncStatus::PendingCreate);
        assert!(!note.is_deleted);
        assert_eq!(note.created_at, note.updated_at);
    }

    #[test]
    fn test_note_new_dedups_labels() {
        let label = LabelId::new();
        let note = Note::new(
            owner(),
            NoteDraft {
                label_ids: vec![label, label],
                ..NoteDraft::default()
            },
        );
        assert_eq!(note.label_ids, vec![label]);
        assert!(note.has_label(&label));
    }

    #[test]
    fn test_title_preview_falls_back_to_body() {
        let note = Note::new(
            owner(),
            NoteDraft {
                body: Some("First line\nSecond line".to_string()),
                ..NoteDraft::default()
            },
        );
        assert_eq!(note.title_preview(50), "First line");
        assert_eq!(note.title_preview(5), "First");
    }

    #[test]
    fn test_is_empty() {
        let empty = Note::new(owner(), NoteDraft::default());
        assert!(empty.is_empty());

        let not_empty = Note::new(
            owner(),
            NoteDraft {
                body: Some("Hello".to_string()),
                ..NoteDraft::default()
            },
        );
        assert!(!not_empty.is_empty());
    }
}
