//! Async services shared by clients and the sync engine

mod notes;
mod replica;

pub use notes::NoteService;
pub use replica::{ApplySummary, ReplicaService, StatusSummary};
