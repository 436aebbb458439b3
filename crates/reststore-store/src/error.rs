use std::path::PathBuf;

/// Errors from storage engine operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// I/O error from the underlying filesystem.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A path component that must be a directory is a file.
    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),

    /// Non-recursive delete of a collection that still has children.
    #[error("directory not empty. Use recursive=true parameter to delete")]
    DirectoryNotEmpty,

    /// The staged file could not be moved into place before the deadline.
    #[error("could not publish {path} within {waited_ms} ms: {reason}")]
    PublishTimeout {
        path: PathBuf,
        waited_ms: u128,
        reason: String,
    },

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The staged file was already closed by an earlier finalization.
    #[error("staged file already closed")]
    AlreadyClosed,
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

impl From<StoreError> for std::io::Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Io(io) => io,
            other => std::io::Error::new(std::io::ErrorKind::Other, other.to_string()),
        }
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
