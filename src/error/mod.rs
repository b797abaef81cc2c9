//! Error taxonomy shared by the engine and its collaborators.
//!
//! External calls fail with a [`CallError`] carrying an [`ErrorClass`]; the
//! engine turns those into record state (backoff or `Failed`) instead of
//! propagating them. Only [`ReconcileError`] ever escapes an engine operation.

use std::fmt;

use thiserror::Error;

/// Whether a failed external call is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Rate limited, timed out, upstream 5xx. Retried with backoff.
    Transient,
    /// Not found, unauthorized, malformed payload. Needs an explicit replay.
    Permanent,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transient => f.write_str("transient"),
            Self::Permanent => f.write_str("permanent"),
        }
    }
}

/// Classified failure of an upstream, summarizer or artifact call.
#[derive(Debug, Clone, Error)]
#[error("{class} error: {message}")]
pub struct CallError {
    pub class: ErrorClass,
    pub message: String,
    /// HTTP status, when the failure was an upstream answer.
    pub status: Option<u16>,
}

impl CallError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            class: ErrorClass::Transient,
            message: message.into(),
            status: None,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            class: ErrorClass::Permanent,
            message: message.into(),
            status: None,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.class == ErrorClass::Transient
    }

    pub fn is_not_found(&self) -> bool {
        self.status == Some(404)
    }

    /// Classify an HTTP status the upstream answered with.
    ///
    /// 408, 429 and 5xx are transient; everything else is permanent.
    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let message = format!("HTTP {}: {}", status.as_u16(), truncate(body, 300));
        let class = if status == reqwest::StatusCode::TOO_MANY_REQUESTS
            || status == reqwest::StatusCode::REQUEST_TIMEOUT
            || status.is_server_error()
        {
            ErrorClass::Transient
        } else {
            ErrorClass::Permanent
        };
        Self {
            class,
            message,
            status: Some(status.as_u16()),
        }
    }

    /// Classify a transport-level reqwest failure.
    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        if err.is_decode() {
            return Self::permanent(format!("malformed response: {err}"));
        }
        if let Some(status) = err.status() {
            return Self::from_status(status, &err.to_string());
        }
        if err.is_builder() {
            return Self::permanent(format!("invalid request: {err}"));
        }
        Self::transient(format!("network error: {err}"))
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push_str("...");
    out
}

/// Failure of the metadata store itself.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("metadata store unavailable: {0}")]
    Unavailable(String),
    #[error("metadata store holds an unreadable row: {0}")]
    Corrupt(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::FromSqlConversionFailure(_, _, inner) => {
                Self::Corrupt(inner.to_string())
            }
            rusqlite::Error::InvalidColumnType(idx, name, ty) => {
                Self::Corrupt(format!("column {idx} ({name}) has type {ty}"))
            }
            other => Self::Unavailable(other.to_string()),
        }
    }
}

/// The only errors that abort an engine invocation.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    StoreUnavailable(#[from] StoreError),
    #[error("configuration error: {0}")]
    Configuration(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn test_rate_limit_and_server_errors_are_transient() {
        for status in [
            StatusCode::TOO_MANY_REQUESTS,
            StatusCode::REQUEST_TIMEOUT,
            StatusCode::INTERNAL_SERVER_ERROR,
            StatusCode::BAD_GATEWAY,
            StatusCode::SERVICE_UNAVAILABLE,
        ] {
            assert!(CallError::from_status(status, "").is_transient(), "{status}");
        }
    }

    #[test]
    fn test_client_errors_are_permanent() {
        for status in [
            StatusCode::NOT_FOUND,
            StatusCode::UNAUTHORIZED,
            StatusCode::FORBIDDEN,
            StatusCode::BAD_REQUEST,
        ] {
            let err = CallError::from_status(status, "nope");
            assert_eq!(err.class, ErrorClass::Permanent, "{status}");
            assert_eq!(err.status, Some(status.as_u16()));
        }
    }

    #[test]
    fn test_long_bodies_are_truncated() {
        let body = "x".repeat(1000);
        let err = CallError::from_status(StatusCode::BAD_REQUEST, &body);
        assert!(err.message.len() < 400);
        assert!(err.message.ends_with("..."));
    }

    #[test]
    fn test_display_includes_class() {
        let err = CallError::transient("slow down");
        assert_eq!(err.to_string(), "transient error: slow down");
    }
}
