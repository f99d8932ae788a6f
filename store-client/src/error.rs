//! Error taxonomy for content store operations.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

/// Failures reported by a [`crate::ContentStore`].
///
/// Only [`StoreError::Transient`] is retried at the transport boundary.
/// `NotFound` and `Conflict` carry the path so callers can decide whether to
/// absorb them (idempotent delete) or re-read and retry (stale token).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("object not found: {path}")]
    NotFound { path: String },

    #[error("version token for {path} is stale")]
    Conflict { path: String },

    #[error("credential rejected: {0}")]
    Unauthorized(String),

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("{0}")]
    Validation(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, StoreError::Unauthorized(_))
    }

    /// Maps an HTTP error status to the taxonomy.
    ///
    /// `rate_limited` is true when the response said the caller ran out of
    /// request quota; GitHub reports that as 403 rather than 429.
    pub fn from_status(status: u16, message: String, path: &str, rate_limited: bool) -> Self {
        match status {
            404 => StoreError::NotFound {
                path: path.to_string(),
            },
            409 => StoreError::Conflict {
                path: path.to_string(),
            },
            422 if message.to_ascii_lowercase().contains("sha") => StoreError::Conflict {
                path: path.to_string(),
            },
            401 => StoreError::Unauthorized(message),
            403 if rate_limited || message.to_ascii_lowercase().contains("rate limit") => {
                StoreError::Transient(format!("rate limited: {message}"))
            }
            403 => StoreError::Unauthorized(message),
            429 => StoreError::Transient(format!("rate limited: {message}")),
            500..=599 => StoreError::Transient(format!("server error {status}: {message}")),
            _ => StoreError::Api { status, message },
        }
    }
}

impl From<reqwest::Error> for StoreError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_builder() {
            StoreError::InvalidConfig(err.to_string())
        } else if err.is_decode() {
            StoreError::InvalidResponse(err.to_string())
        } else {
            StoreError::Transient(err.to_string())
        }
    }
}
