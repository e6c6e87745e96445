//! Error types and result aliases for pkgcdn operations.
//!
//! Provides a unified error type that covers every failure a package request
//! can run into, from an unknown package to a timed out lock wait. Errors are
//! cheap to clone so that one single-flight outcome can be handed to every
//! caller waiting on it.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Unified error type for all pkgcdn operations
#[derive(Error, Debug, Clone)]
pub enum CdnError {
    // Resolution errors
    #[error("Package '{name}' not found in registry")]
    PackageNotFound { name: String },

    #[error("No version of '{name}' matches '{requested}'")]
    VersionNotFound { name: String, requested: String },

    #[error("File '{path}' not found in {package}")]
    EntryNotFound { package: String, path: String },

    #[error("No path requested and {package}@{version} declares no entry point")]
    Unprocessable { package: String, version: String },

    // Upstream errors
    #[error("Network error: {message}")]
    Network {
        message: String,
        #[source]
        source: Option<Arc<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Invalid metadata for '{name}': {message}")]
    InvalidMetadata { name: String, message: String },

    // Concurrency errors
    #[error("Timed out after {waited:?} waiting for {operation} of '{key}'")]
    Timeout {
        operation: String,
        key: String,
        waited: Duration,
    },

    // Config errors
    #[error("Failed to parse config: {message} at line {line}, column {column}")]
    ConfigParse {
        message: String,
        line: usize,
        column: usize,
    },

    #[error("Configuration field '{field}' is invalid: {reason}")]
    ConfigValidation { field: String, reason: String },

    // IO errors
    #[error("IO error: {message}")]
    Io {
        message: String,
        #[source]
        source: Arc<std::io::Error>,
    },
}

/// Result type alias for pkgcdn operations
pub type CdnResult<T> = Result<T, CdnError>;

impl CdnError {
    /// Create a network error from any error type
    pub fn network<E>(message: String, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Network {
            message,
            source: Some(Arc::new(source)),
        }
    }

    /// Create an IO error from std::io::Error
    pub fn io(message: String, source: std::io::Error) -> Self {
        Self::Io {
            message,
            source: Arc::new(source),
        }
    }

    /// Check if this error means "does not exist" rather than "failed"
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            CdnError::PackageNotFound { .. }
                | CdnError::VersionNotFound { .. }
                | CdnError::EntryNotFound { .. }
        )
    }

    /// Check if this error is transient and worth retrying
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            CdnError::Network { .. } | CdnError::Timeout { .. } | CdnError::Io { .. }
        )
    }

    /// HTTP status code a request failing with this error is answered with
    pub fn status_code(&self) -> u16 {
        match self {
            _ if self.is_not_found() => 404,
            CdnError::Unprocessable { .. } => 422,
            _ => 500,
        }
    }
}

impl From<std::io::Error> for CdnError {
    fn from(err: std::io::Error) -> Self {
        Self::io("IO operation failed".to_string(), err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        let not_found = CdnError::PackageNotFound { name: "left-pad".to_string() };
        assert_eq!(not_found.status_code(), 404);

        let missing_entry = CdnError::EntryNotFound {
            package: "left-pad@1.3.0".to_string(),
            path: "nope.js".to_string(),
        };
        assert_eq!(missing_entry.status_code(), 404);

        let unprocessable = CdnError::Unprocessable {
            package: "types-only".to_string(),
            version: "1.0.0".to_string(),
        };
        assert_eq!(unprocessable.status_code(), 422);

        let timeout = CdnError::Timeout {
            operation: "tarball".to_string(),
            key: "react".to_string(),
            waited: Duration::from_secs(10),
        };
        assert_eq!(timeout.status_code(), 500);
    }

    #[test]
    fn test_clone_keeps_source() {
        let err = CdnError::io(
            "Failed to open archive".to_string(),
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        let copy = err.clone();

        assert_eq!(err.to_string(), copy.to_string());
        assert!(std::error::Error::source(&copy).is_some());
    }

    #[test]
    fn test_recoverable() {
        assert!(CdnError::network("boom".to_string(), std::fmt::Error).is_recoverable());
        assert!(!CdnError::PackageNotFound { name: "x".to_string() }.is_recoverable());
    }
}
