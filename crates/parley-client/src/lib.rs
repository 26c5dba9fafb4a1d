//! Parley Client
//!
//! The stateful half of the chat client: the session that multiplexes calls
//! and push events over one TCP connection, the per-user local history, and
//! [`ChatClient`], which owns both and the event bus between them.

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod client;
pub mod errors;
pub mod history;
pub mod session;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use client::ChatClient;
pub use errors::{ClientError, ClientResult, StorageError, StorageResult};
pub use history::{
    AudioLog, EntryKind, HistoryManager, HistoryRecorder, HistoryStore, LogEntry, MessageLog,
    SessionRecord,
};
pub use session::{AuthContext, PendingCalls, Session, SessionState, SessionStats};
