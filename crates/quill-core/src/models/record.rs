//! Wire records exchanged with the remote store
//!
//! Remote records have no sync status: the remote store is authoritative and
//! only knows the latest acknowledged state of each entity.

use serde::{Deserialize, Serialize};

use super::{Label, LabelId, Note, NoteId, OwnerId, SyncScope};

/// A note as stored by the remote authority
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteRecord {
    pub id: NoteId,
    pub owner_id: OwnerId,
    pub title: Option<String>,
    pub body: Option<String>,
    /// Full association set, sorted by id
    #[serde(default)]
    pub label_ids: Vec<LabelId>,
    pub is_deleted: bool,
    pub deleted_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A label as stored by the remote authority
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelRecord {
    pub id: LabelId,
    pub owner_id: OwnerId,
    pub name: String,
    pub color: String,
    pub is_deleted: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Entities changed in one scope, ascending by `updated_at` within each kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub scope: SyncScope,
    #[serde(default)]
    pub labels: Vec<LabelRecord>,
    #[serde(default)]
    pub notes: Vec<NoteRecord>,
    /// Newest `updated_at` among the returned entities, or the request's lower bound
    pub cursor: i64,
}

impl ChangeSet {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty() && self.notes.is_empty()
    }
}

/// Current change cursor of a scope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorResponse {
    pub scope: SyncScope,
    pub cursor: i64,
}

/// Create a note; replaying the same `id` upserts the stored note
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateNoteRequest {
    #[serde(default)]
    pub id: Option<NoteId>,
    pub title: Option<String>,
    pub body: Option<String>,
    #[serde(default)]
    pub label_ids: Vec<LabelId>,
}

/// Replace the full state of a note
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateNoteRequest {
    pub title: Option<String>,
    pub body: Option<String>,
    #[serde(default)]
    pub label_ids: Vec<LabelId>,
    #[serde(default)]
    pub is_deleted: bool,
}

/// Create a label; replaying the same `id` upserts the stored label
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateLabelRequest {
    #[serde(default)]
    pub id: Option<LabelId>,
    pub name: String,
    pub color: Option<String>,
}

/// Rename and/or recolor a label
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateLabelRequest {
    pub name: Option<String>,
    pub color: Option<String>,
}

impl From<&Note> for CreateNoteRequest {
    fn from(note: &Note) -> Self {
        Self {
            id: Some(note.id),
            title: note.title.clone(),
            body: note.body.clone(),
            label_ids: note.label_ids.clone(),
        }
    }
}

impl From<&Note> for UpdateNoteRequest {
    fn from(note: &Note) -> Self {
        Self {
            title: note.title.clone(),
            body: note.body.clone(),
            label_ids: note.label_ids.clone(),
            is_deleted: note.is_deleted,
        }
    }
}

impl From<&Label> for CreateLabelRequest {
    fn from(label: &Label) -> Self {
        Self {
            id: Some(label.id),
            name: label.name.clone(),
            color: Some(label.color.clone()),
        }
    }
}

impl From<&Label> for UpdateLabelRequest {
    fn from(label: &Label) -> Self {
        Self {
            name: Some(label.name.clone()),
            color: Some(label.color.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NoteDraft;

    #[test]
    fn create_request_carries_client_id() {
        let note = Note::new(
            OwnerId::new("user-1"),
            NoteDraft {
                body: Some("Buy milk".to_string()),
                ..NoteDraft::default()
            },
        );
        let request = CreateNoteRequest::from(&note);
        assert_eq!(request.id, Some(note.id));
        assert_eq!(request.body.as_deref(), Some("Buy milk"));
    }

    #[test]
    fn update_request_defaults_missing_fields() {
        let request: UpdateNoteRequest = serde_json::from_str(r#"{"title":"t","body":null}"#).unwrap();
        assert!(request.label_ids.is_empty());
        assert!(!request.is_deleted);
    }
}
