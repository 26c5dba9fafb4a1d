//! Response envelope and status codes

use core::fmt;
use serde::{Deserialize, Serialize};

use super::Payload;
use crate::{ParleyError, Result};

/// Outcome classification carried by every response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusCode {
    Ok,
    Created,
    ClientError,
    Unauthorized,
    NotFound,
    ServerError,
}

impl StatusCode {
    pub fn is_success(&self) -> bool {
        matches!(self, StatusCode::Ok | StatusCode::Created)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StatusCode::Ok => "OK",
            StatusCode::Created => "CREATED",
            StatusCode::ClientError => "CLIENT_ERROR",
            StatusCode::Unauthorized => "UNAUTHORIZED",
            StatusCode::NotFound => "NOT_FOUND",
            StatusCode::ServerError => "SERVER_ERROR",
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The server's answer to one request
///
/// Validation failures (bad credentials, unknown target, forbidden) arrive as
/// ordinary responses with `success == false`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub success: bool,
    #[serde(default)]
    pub message: String,
    pub status_code: StatusCode,
    #[serde(default)]
    pub payload: Payload,
}

impl Response {
    /// Successful response with `OK`
    pub fn ok(payload: Payload) -> Self {
        Self {
            success: true,
            message: String::new(),
            status_code: StatusCode::Ok,
            payload,
        }
    }

    /// Successful response with `CREATED`
    pub fn created(payload: Payload) -> Self {
        Self {
            status_code: StatusCode::Created,
            ..Self::ok(payload)
        }
    }

    /// Failed response with the given status
    pub fn failure(status_code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            status_code,
            payload: Payload::new(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Turn a failed response into [`ParleyError::Server`]; successful ones pass through
    pub fn into_result(self) -> Result<Self> {
        if self.success {
            Ok(self)
        } else {
            Err(ParleyError::Server {
                status: self.status_code,
                message: self.message,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_is_data_until_interpreted() {
        let response = Response::failure(StatusCode::Unauthorized, "login required");
        assert!(!response.success);

        match response.into_result() {
            Err(ParleyError::Server { status, message }) => {
                assert_eq!(status, StatusCode::Unauthorized);
                assert_eq!(message, "login required");
            }
            other => panic!("expected server error, got {:?}", other),
        }
    }

    #[test]
    fn test_status_code_wire_names() {
        let json = serde_json::to_value(StatusCode::ClientError).unwrap();
        assert_eq!(json, "CLIENT_ERROR");
        assert!(StatusCode::Created.is_success());
        assert!(!StatusCode::NotFound.is_success());
    }
}
