//! Application error model with HTTP response mapping
//!
//! Defines a typed error hierarchy using `thiserror` for internal error handling,
//! and maps each variant to an HTTP status, a stable machine code, and the
//! human-readable message returned in the `{success: false, error}` body.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

/// Application error type
///
/// Network-phase variants carry the underlying detail for logs; the text a
/// caller sees comes from [`AppError::user_message`].
#[derive(Debug, Error)]
pub enum AppError {
    /// Missing or malformed request input; no network I/O was attempted
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// Host name did not resolve to any address
    #[error("host not found: {0}")]
    HostNotFound(String),
    /// TCP/TLS/greeting failure (refused, unreachable, handshake error)
    #[error("connection failed: {0}")]
    Connect(String),
    /// Server rejected the credentials
    #[error("authentication failed: {0}")]
    Auth(String),
    /// INBOX could not be opened
    #[error("mailbox error: {0}")]
    Mailbox(String),
    /// Listing the mailbox failed
    #[error("search failed: {0}")]
    Search(String),
    /// Retrieval of the target message failed
    #[error("fetch failed: {0}")]
    Fetch(String),
    /// Deadline or phase timeout exceeded
    #[error("operation timed out: {0}")]
    Timeout(String),
    /// Unexpected internal fault
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Convenience constructor for `InvalidRequest`
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    /// Stable machine-readable code included in error bodies
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::HostNotFound(_) => "host_not_found",
            Self::Connect(_) => "connect_failed",
            Self::Auth(_) => "auth_failed",
            Self::Mailbox(_) => "mailbox_error",
            Self::Search(_) => "search_failed",
            Self::Fetch(_) => "fetch_failed",
            Self::Timeout(_) => "timeout",
            Self::Internal(_) => "internal",
        }
    }

    /// HTTP status for the error class
    ///
    /// Client-caused failures (bad input, unreachable user-supplied host,
    /// rejected credentials, deadline) are 4xx; only `Internal` is 5xx.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::Auth(_) => StatusCode::UNAUTHORIZED,
            Self::Timeout(_) => StatusCode::REQUEST_TIMEOUT,
            Self::HostNotFound(_)
            | Self::Connect(_)
            | Self::Mailbox(_)
            | Self::Search(_)
            | Self::Fetch(_) => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Human-readable message for the response body
    pub fn user_message(&self) -> String {
        match self {
            Self::InvalidRequest(msg) | Self::Timeout(msg) => msg.clone(),
            Self::HostNotFound(_) => {
                "IMAP host not found. Please check the server address.".to_owned()
            }
            Self::Connect(detail) => format!("IMAP connection failed: {detail}"),
            Self::Auth(_) => "Invalid email or password. Please check your credentials.".to_owned(),
            Self::Mailbox(detail) => format!("Failed to open INBOX: {detail}"),
            Self::Search(detail) => format!("Search failed: {detail}"),
            Self::Fetch(detail) => format!("Fetch failed: {detail}"),
            Self::Internal(_) => "Internal server error".to_owned(),
        }
    }
}

/// Failure body shared by every endpoint
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub success: bool,
    pub error: String,
    pub code: &'static str,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            success: false,
            error: self.user_message(),
            code: self.code(),
        };
        (self.status_code(), Json(body)).into_response()
    }
}

/// Type alias for fallible return values
///
/// Use this for all internal functions that can fail. Provides a consistent
/// error type throughout the codebase.
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;

    use super::AppError;

    #[test]
    fn client_caused_errors_are_4xx_and_internal_is_5xx() {
        let client_side = [
            AppError::invalid("Missing required credentials"),
            AppError::HostNotFound("nowhere.invalid".to_owned()),
            AppError::Connect("connection refused".to_owned()),
            AppError::Auth("NO LOGIN failed".to_owned()),
            AppError::Mailbox("no such mailbox".to_owned()),
            AppError::Search("BAD".to_owned()),
            AppError::Fetch("empty".to_owned()),
            AppError::Timeout("Connection timeout after 30 seconds".to_owned()),
        ];
        for err in client_side {
            assert!(err.status_code().is_client_error(), "{err}");
        }
        assert_eq!(
            AppError::Internal("boom".to_owned()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn auth_message_hides_server_detail() {
        let err = AppError::Auth("NO [AUTHENTICATIONFAILED] user@example.com".to_owned());
        assert_eq!(
            err.user_message(),
            "Invalid email or password. Please check your credentials."
        );
        assert_eq!(err.code(), "auth_failed");
    }

    #[test]
    fn invalid_request_message_passes_through() {
        let err = AppError::invalid("Missing required credentials");
        assert_eq!(err.user_message(), "Missing required credentials");
    }
}
