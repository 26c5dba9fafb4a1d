//! Error types for the Parley client
//!
//! Transport and protocol failures come from `parley-core`. Storage failures
//! are local to this crate and are always returned to the caller; nothing here
//! swallows a failed write.

use std::path::PathBuf;

use parley_core::ParleyError;

// ----------------------------------------------------------------------------
// Storage Errors
// ----------------------------------------------------------------------------

/// Failures of the local history store
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid log entry: {reason}")]
    InvalidEntry { reason: String },

    #[error("Corrupt row in {table}: {reason}")]
    CorruptRow { table: &'static str, reason: String },

    #[error("No history store is open")]
    NoActiveStore,
}

impl StorageError {
    pub fn invalid_entry<R: Into<String>>(reason: R) -> Self {
        StorageError::InvalidEntry {
            reason: reason.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StorageError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type StorageResult<T> = core::result::Result<T, StorageError>;

// ----------------------------------------------------------------------------
// Client Errors
// ----------------------------------------------------------------------------

/// Errors surfaced by [`ChatClient`](crate::ChatClient)
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Parley(#[from] ParleyError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Not logged in")]
    NotLoggedIn,
}

impl ClientError {
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, ClientError::Parley(e) if e.is_connection_lost())
    }
}

pub type ClientResult<T> = core::result::Result<T, ClientError>;
