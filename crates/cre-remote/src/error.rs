use thiserror::Error;

/// How a remote call failed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    /// Network failure or timeout. Retryable; the engine falls back to the
    /// local journal.
    #[error("transient network error: {0}")]
    Transient(String),

    /// The target no longer exists remotely. Treated as already deleted.
    #[error("not found: {0}")]
    NotFound(String),

    /// The remote source refused the request (permission, validation,
    /// conflict). Not retryable.
    #[error("rejected by remote: {0}")]
    Rejected(String),
}

impl RemoteError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

pub type RemoteResult<T> = Result<T, RemoteError>;
