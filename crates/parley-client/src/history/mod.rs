//! Local History Store
//!
//! - `store`: one user's SQLite database and its operations
//! - `repository`: SQL for the log and session tables
//! - `models`: entries read back from a store
//! - `paths`: per-user file naming
//! - `manager`: the single active store and user switching
//! - `recorder`: event bus subscriber that persists incoming messages

pub mod manager;
pub mod models;
pub mod paths;
pub mod recorder;
mod repository;
pub mod store;

pub use manager::HistoryManager;
pub use models::{AudioLog, EntryKind, LogEntry, MessageLog, SessionRecord};
pub use recorder::HistoryRecorder;
pub use store::HistoryStore;
