//! quill-core - offline-first note sync engine
//!
//! This crate contains the shared models, the local replica, the remote
//! authority store with its change feed, and the sync orchestrator and
//! scheduler used by the Quill API server and CLI.

pub mod auth;
pub mod authority;
pub mod clock;
pub mod config;
pub mod connectivity;
pub mod db;
pub mod error;
pub mod models;
pub mod remote;
pub mod services;
pub mod sync;
pub mod util;

pub use error::{Error, Result};
pub use models::{Label, LabelId, Note, NoteId, OwnerId, SyncScope, SyncStatus};
