//! Data models for Quill

mod label;
mod note;
mod record;
mod sync;

pub use label::{
    validate_label_color, validate_label_name, Label, LabelDraft, LabelId, LabelPatch,
    DEFAULT_LABEL_COLOR,
};
pub use note::{Note, NoteDraft, NoteId, NotePatch, NoteQuery};
pub use record::{
    ChangeSet, CreateLabelRequest, CreateNoteRequest, CursorResponse, LabelRecord, NoteRecord,
    UpdateLabelRequest, UpdateNoteRequest,
};
pub use sync::{DeleteTransition, OwnerId, SyncCursor, SyncScope, SyncStatus};
