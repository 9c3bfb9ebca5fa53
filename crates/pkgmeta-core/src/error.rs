//! Error types for package metadata resolution.
//!
//! Most failures inside a resolution run are tier failures: they are logged,
//! counted and downgraded to "unresolved" by the pipeline. Only lock timeouts
//! and cancellation are meant to reach the caller of `resolve`.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Main error type for the metadata engine.
#[derive(Debug, Error)]
pub enum MetadataError {
    // Network errors
    #[error("Network error: {message}")]
    Network {
        message: String,
        /// Optional cause description
        cause: Option<String>,
    },

    #[error("Request timeout after {0:?}")]
    Timeout(Duration),

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    #[error("Invalid package descriptor {path:?}: {message}")]
    Descriptor { path: Option<PathBuf>, message: String },

    #[error("Invalid registry page {url}: {message}")]
    Page { url: String, message: String },

    // Coordination errors
    #[error("Timed out after {waited:?} waiting for lock on {resource}")]
    LockTimeout { resource: String, waited: Duration },

    #[error("Operation was cancelled")]
    Cancelled,

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("{0}")]
    Other(String),
}

/// Result type alias for metadata operations.
pub type Result<T> = std::result::Result<T, MetadataError>;

impl From<std::io::Error> for MetadataError {
    fn from(err: std::io::Error) -> Self {
        MetadataError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for MetadataError {
    fn from(err: serde_json::Error) -> Self {
        MetadataError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<reqwest::Error> for MetadataError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            MetadataError::Timeout(Duration::from_secs(0))
        } else {
            MetadataError::Network {
                message: err.to_string(),
                cause: err.url().map(|u| u.to_string()),
            }
        }
    }
}

impl From<roxmltree::Error> for MetadataError {
    fn from(err: roxmltree::Error) -> Self {
        MetadataError::Descriptor {
            path: None,
            message: err.to_string(),
        }
    }
}

impl MetadataError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        MetadataError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Whether this error is a tier failure that the pipeline downgrades to
    /// "unresolved" and falls through to the next tier.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            MetadataError::Network { .. }
                | MetadataError::Timeout(_)
                | MetadataError::Io { .. }
                | MetadataError::Json { .. }
                | MetadataError::Descriptor { .. }
                | MetadataError::Page { .. }
                | MetadataError::Other(_)
        )
    }

    /// Whether this error must abort the whole resolution call.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            MetadataError::LockTimeout { .. } | MetadataError::Cancelled
        )
    }
}
