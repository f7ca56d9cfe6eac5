use std::io;
use std::path::PathBuf;

/// Errors produced by journal and cache storage.
#[derive(Debug, thiserror::Error)]
pub enum JournalError {
    /// I/O error during journal or cache file operations.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Journal directory could not be created or is not a directory.
    #[error("journal path unusable: {0}")]
    InvalidPath(PathBuf),

    /// The backend refused the write (used by failure injection).
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

impl From<bincode::Error> for JournalError {
    fn from(e: bincode::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for JournalError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Convenience alias used throughout the journal crate.
pub type JournalResult<T> = std::result::Result<T, JournalError>;
