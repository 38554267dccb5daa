//! Typed errors for job-control API calls.

use serde::Deserialize;

/// Error raised by a job-control call.
///
/// `Clone` because failures travel through the session machine as data
/// (every failure becomes a phase transition plus a user-visible notice,
/// never an unwound error).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// Input rejected before any network call was made.
    #[error("{0}")]
    Validation(String),
    /// The backend answered with a non-success status.
    #[error("backend returned {status}: {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Message extracted from the error body, possibly empty.
        message: String,
    },
    /// The request never completed (DNS, TCP, TLS, timeout).
    #[error("request failed: {0}")]
    Network(String),
    /// The backend answered 2xx but the body did not match the known shape.
    #[error("malformed response: {0}")]
    Malformed(String),
}

/// Error body shape produced by the backend (`{"message": "..."}`).
#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

impl BackendError {
    /// Build a [`BackendError::Status`] from a response status and raw body,
    /// extracting the backend's `message` field when the body carries one.
    #[must_use]
    pub fn from_status(status: u16, body: &str) -> Self {
        let message = serde_json::from_str::<ErrorBody>(body)
            .ok()
            .and_then(|b| b.message)
            .unwrap_or_default();
        Self::Status { status, message }
    }

    /// User-facing message: the backend's own words when it said any,
    /// otherwise the caller's per-operation fallback.
    #[must_use]
    pub fn display(&self, fallback: &str) -> String {
        match self {
            Self::Validation(message) => message.clone(),
            Self::Status { message, .. } if !message.trim().is_empty() => message.clone(),
            _ => fallback.to_string(),
        }
    }

    /// Short classification string for logging.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Status { .. } => "status",
            Self::Network(_) => "network",
            Self::Malformed(_) => "malformed",
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
