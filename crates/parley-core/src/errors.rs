//! Error types for the Parley client core
//!
//! Transport failures abort an in-flight call with a distinct error value and
//! never masquerade as a [`Response`](crate::protocol::Response). Failures the
//! server reports are ordinary response data; [`ParleyError::Server`] exists only
//! for callers that explicitly ask a typed helper to interpret a failed response.

use crate::protocol::StatusCode;

// ----------------------------------------------------------------------------
// Specific Error Types
// ----------------------------------------------------------------------------

/// Failures of the physical connection
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Connection to {addr} failed: {reason}")]
    ConnectionFailed { addr: String, reason: String },
    #[error("Connection lost: {reason}")]
    ConnectionLost { reason: String },
    #[error("No response within {duration_ms}ms")]
    Timeout { duration_ms: u64 },
    #[error("Session is not connected")]
    NotConnected,
    #[error("Session is already connected to {addr}")]
    AlreadyConnected { addr: String },
    #[error("Network I/O error: {0}")]
    NetworkIo(#[from] std::io::Error),
}

/// Malformed or unexpected frames and payloads
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge { size: usize, max: usize },
    #[error("Malformed frame: {reason}")]
    MalformedFrame { reason: String },
    #[error("Unexpected frame: {reason}")]
    UnexpectedFrame { reason: String },
    #[error("Missing payload key '{key}'")]
    MissingKey { key: String },
    #[error("Invalid value for payload key '{key}': {reason}")]
    InvalidValue { key: String, reason: String },
}

// ----------------------------------------------------------------------------
// Core Error Type
// ----------------------------------------------------------------------------

/// Core error type for the Parley client
#[derive(Debug, thiserror::Error)]
pub enum ParleyError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A failed response a typed helper was asked to interpret
    #[error("Server rejected request ({status}): {message}")]
    Server { status: StatusCode, message: String },

    #[error("Configuration error: {reason}")]
    Configuration { reason: String },
}

// ----------------------------------------------------------------------------
// Convenience Error Constructors
// ----------------------------------------------------------------------------

impl ParleyError {
    /// Create a connection failed error
    pub fn connection_failed<A: Into<String>, R: Into<String>>(addr: A, reason: R) -> Self {
        ParleyError::Transport(TransportError::ConnectionFailed {
            addr: addr.into(),
            reason: reason.into(),
        })
    }

    /// Create a connection lost error
    pub fn connection_lost<R: Into<String>>(reason: R) -> Self {
        ParleyError::Transport(TransportError::ConnectionLost {
            reason: reason.into(),
        })
    }

    /// Create a timeout error
    pub fn timeout(duration_ms: u64) -> Self {
        ParleyError::Transport(TransportError::Timeout { duration_ms })
    }

    /// Create a malformed frame error
    pub fn malformed<R: Into<String>>(reason: R) -> Self {
        ParleyError::Protocol(ProtocolError::MalformedFrame {
            reason: reason.into(),
        })
    }

    /// Create a missing payload key error
    pub fn missing_key<K: Into<String>>(key: K) -> Self {
        ParleyError::Protocol(ProtocolError::MissingKey { key: key.into() })
    }

    /// Create an invalid payload value error
    pub fn invalid_value<K: Into<String>, R: Into<String>>(key: K, reason: R) -> Self {
        ParleyError::Protocol(ProtocolError::InvalidValue {
            key: key.into(),
            reason: reason.into(),
        })
    }

    /// Create a configuration error
    pub fn config_error<R: Into<String>>(reason: R) -> Self {
        ParleyError::Configuration {
            reason: reason.into(),
        }
    }

    /// Whether the error means the connection is gone and pending calls are void
    pub fn is_connection_lost(&self) -> bool {
        matches!(
            self,
            ParleyError::Transport(TransportError::ConnectionLost { .. })
        )
    }

    /// Whether the error is a bounded wait that expired
    pub fn is_timeout(&self) -> bool {
        matches!(self, ParleyError::Transport(TransportError::Timeout { .. }))
    }
}

// ----------------------------------------------------------------------------
// Type Aliases
// ----------------------------------------------------------------------------

pub type Result<T> = core::result::Result<T, ParleyError>;
pub type ParleyResult<T> = Result<T>;
