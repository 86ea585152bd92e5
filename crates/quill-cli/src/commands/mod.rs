pub mod common;
pub mod config;
pub mod label;
pub mod note;
pub mod sync;
