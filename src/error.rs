//! Error types for snapcache

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for snapshot operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(std::io::Error),

    #[error("Permission denied: {0}")]
    PermissionDenied(std::io::Error),

    #[error("Failed to hash {path}: {source}")]
    Hash {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No cached copy of {filename}")]
    CacheMiss { filename: String },

    #[error("Failed to write archive {path}: {reason}")]
    ArchiveWrite { path: PathBuf, reason: String },

    #[error("Failed to read archive {path}: {reason}")]
    ArchiveRead { path: PathBuf, reason: String },

    #[error("Backup file not found: {path}")]
    NotFound { path: PathBuf },

    #[error("Another backup or restore is already running")]
    Busy,

    #[error("Invalid backup name '{name}'")]
    InvalidName { name: String },

    #[error("Background task failed: {0}")]
    Task(String),

    #[error("Invalid exclusion pattern '{pattern}': {reason}")]
    Pattern { pattern: String, reason: String },

    #[error("Invalid interval '{value}'")]
    InvalidInterval { value: String },

    #[error("Invalid configuration: {reason}")]
    Config { reason: String },

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Walkdir error: {0}")]
    Walk(#[from] walkdir::Error),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::PermissionDenied => Error::PermissionDenied(err),
            _ => Error::Io(err),
        }
    }
}

/// Result type alias for snapshot operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn permission_errors_get_their_own_variant() {
        let err: Error = io::Error::new(io::ErrorKind::PermissionDenied, "nope").into();
        assert!(matches!(err, Error::PermissionDenied(_)));

        let err: Error = io::Error::new(io::ErrorKind::NotFound, "gone").into();
        assert!(matches!(err, Error::Io(_)));
    }
}
