// src/error.rs

//! Unified error handling for the sync and monitor engine.

use std::fmt;

use thiserror::Error;

/// Retry hint sent with a duplicate sync request; the running job's
/// progress can be polled meanwhile.
pub const CONFLICT_RETRY_SECS: u64 = 10;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// Access key did not match the configured secret
    #[error("Unauthorized: invalid access key")]
    Unauthorized,

    /// A non-terminal job already exists for the source
    #[error("Sync already in progress (job {job_id})")]
    Conflict { job_id: String },

    /// A check is already running for the monitor
    #[error("Check already in progress for monitor {0}")]
    Busy(String),

    /// Operation is cooling down
    #[error("Rate limited: retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// Requested record does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Catalog API or monitored page unreachable, non-2xx, or timed out
    #[error("Upstream fetch failed for {context}: {message}")]
    UpstreamFetch { context: String, message: String },

    /// Store rejected or failed a write
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Page content had an unexpected shape
    #[error("Classification error: {0}")]
    Classification(String),

    /// Job state machine violation
    #[error("Invalid job transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization failed
    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// CSS selector parsing failed
    #[error("Invalid selector '{selector}': {message}")]
    Selector { selector: String, message: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data validation error
    #[error("Validation error: {0}")]
    Validation(String),
}

impl AppError {
    /// Create a selector parsing error.
    pub fn selector(selector: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Selector {
            selector: selector.into(),
            message: message.to_string(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create an upstream fetch error with context.
    pub fn upstream(context: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::UpstreamFetch {
            context: context.into(),
            message: message.to_string(),
        }
    }

    /// Create a persistence error.
    pub fn persistence(message: impl fmt::Display) -> Self {
        Self::Persistence(message.to_string())
    }

    /// Create a not-found error.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// HTTP-equivalent status code for the API surface.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Unauthorized => 401,
            Self::NotFound(_) => 404,
            Self::Conflict { .. } | Self::RateLimited { .. } => 429,
            Self::Busy(_) => 409,
            Self::Validation(_) => 400,
            _ => 500,
        }
    }

    /// Seconds the caller should wait before retrying, if any.
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after_secs } => Some(*retry_after_secs),
            Self::Conflict { .. } => Some(CONFLICT_RETRY_SECS),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(AppError::Unauthorized.status_code(), 401);
        assert_eq!(AppError::not_found("job x").status_code(), 404);
        assert_eq!(
            AppError::Conflict {
                job_id: "j1".into()
            }
            .status_code(),
            429
        );
        assert_eq!(AppError::Busy("m1".into()).status_code(), 409);
        assert_eq!(AppError::persistence("disk full").status_code(), 500);
    }

    #[test]
    fn test_retry_after_for_429s_only() {
        let limited = AppError::RateLimited {
            retry_after_secs: 42,
        };
        assert_eq!(limited.retry_after(), Some(42));
        let duplicate = AppError::Conflict {
            job_id: "j1".into(),
        };
        assert_eq!(duplicate.retry_after(), Some(CONFLICT_RETRY_SECS));
        assert_eq!(AppError::Busy("m1".into()).retry_after(), None);
        assert_eq!(AppError::Unauthorized.retry_after(), None);
    }

    #[test]
    fn test_upstream_display() {
        let err = AppError::upstream("https://example.com", "HTTP 503");
        assert_eq!(
            err.to_string(),
            "Upstream fetch failed for https://example.com: HTTP 503"
        );
    }
}
