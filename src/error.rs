use thiserror::Error;

/// Main error type for fpindex operations
#[derive(Error, Debug)]
pub enum FpIndexError {
    #[error("Invalid fingerprint: {0}")]
    InvalidFingerprint(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Already locked: {0}")]
    Locked(String),

    #[error("Already committed: {0}")]
    AlreadyCommitted(String),

    #[error("Corrupt segment: {0}")]
    CorruptSegment(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for fpindex operations
pub type Result<T> = std::result::Result<T, FpIndexError>;

impl FpIndexError {
    pub(crate) fn invalid_fingerprint(reason: impl Into<String>) -> Self {
        FpIndexError::InvalidFingerprint(reason.into())
    }

    /// Check if this error indicates a transient failure that could be retried
    pub fn is_retriable(&self) -> bool {
        matches!(self, FpIndexError::Locked(_))
    }
}
