use thiserror::Error;

/// Result type for session persistence operations
pub type SessionResult<T> = Result<T, SessionError>;

/// Errors surfaced by the session layer
#[derive(Error, Debug)]
pub enum SessionError {
    /// File system errors on the session directory
    #[error("session I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("session serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Session ids become file names; ids with path separators are refused
    #[error("invalid session id: {0:?}")]
    InvalidSessionId(String),
}
