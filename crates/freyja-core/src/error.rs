//! Error types for the Freyja storage layer.

use serde::Serialize;
use thiserror::Error;

use crate::models::ResourceId;

/// Result type alias using Freyja's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// A single item that failed during a migration run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemFailure {
    /// Derivative path or file id that failed.
    pub item: String,
    /// Rendered cause.
    pub reason: String,
}

/// Core error type for Freyja operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Resource not found in any consulted backend
    #[error("Not found: {0}")]
    NotFound(String),

    /// A backend could not be reached or answered with a transport failure
    #[error("Backend unavailable ({backend}): {message}")]
    BackendUnavailable {
        backend: &'static str,
        message: String,
    },

    /// One or more derivatives or files failed to migrate
    #[error("Partial migration of {resource_id}: {} item(s) failed", .failures.len())]
    PartialMigration {
        resource_id: ResourceId,
        failures: Vec<ItemFailure>,
    },

    /// Job queue error
    #[error("Job error: {0}")]
    Job(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// HTTP/network request failed
    #[error("Request error: {0}")]
    Request(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True when the error means "no backend has this id".
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    /// True for transport and database failures, as opposed to lookups that
    /// completed and found nothing.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            Error::BackendUnavailable { .. } | Error::Database(_) | Error::Request(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Request(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_not_found() {
        let err = Error::NotFound("test resource".to_string());
        assert_eq!(err.to_string(), "Not found: test resource");
    }

    #[test]
    fn test_error_display_backend_unavailable() {
        let err = Error::BackendUnavailable {
            backend: "legacy",
            message: "connection refused".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Backend unavailable (legacy): connection refused"
        );
    }

    #[test]
    fn test_error_display_partial_migration() {
        let err = Error::PartialMigration {
            resource_id: ResourceId::new("fs-1"),
            failures: vec![
                ItemFailure {
                    item: "a-thumbnail.jpg".to_string(),
                    reason: "disk full".to_string(),
                },
                ItemFailure {
                    item: "f1".to_string(),
                    reason: "404".to_string(),
                },
            ],
        };
        assert_eq!(err.to_string(), "Partial migration of fs-1: 2 item(s) failed");
    }

    #[test]
    fn test_not_found_is_distinguished_from_unavailable() {
        let not_found = Error::NotFound("x".to_string());
        assert!(not_found.is_not_found());
        assert!(!not_found.is_unavailable());

        let unavailable = Error::BackendUnavailable {
            backend: "primary",
            message: "timeout".to_string(),
        };
        assert!(!unavailable.is_not_found());
        assert!(unavailable.is_unavailable());

        assert!(Error::Request("reset".to_string()).is_unavailable());
        assert!(!Error::Internal("bug".to_string()).is_unavailable());
    }

    #[test]
    fn test_error_display_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = Error::Io(io_err);
        assert!(err.to_string().contains("I/O error:"));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<i32>("not a number");
        assert!(json_err.is_err());

        let err: Error = json_err.unwrap_err().into();
        match err {
            Error::Serialization(msg) => {
                assert!(!msg.is_empty());
            }
            _ => panic!("Expected Serialization error"),
        }
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<Error>();
        assert_sync::<Error>();
    }
}
