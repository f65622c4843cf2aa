use thiserror::Error;

/// Result type for browser operations
pub type BrowserResult<T> = Result<T, BrowserError>;

/// Errors surfaced by instances and the cluster
#[derive(Error, Debug)]
pub enum BrowserError {
    /// Browser process failed to launch
    #[error("browser launch failed: {0}")]
    Launch(String),

    /// CDP-level failure on a page or browser operation
    #[error("browser operation failed: {0}")]
    Cdp(String),

    /// Operation exceeded the configured timeout. Timeouts are failures,
    /// never silently retried.
    #[error("{operation} timed out after {timeout_s}s")]
    Timeout { operation: &'static str, timeout_s: u64 },

    /// Session id has no live session on this instance
    #[error("no session found with id {0:?}")]
    SessionNotFound(String),

    /// No healthy instance available, even with overload allowance
    #[error("no healthy browser instances available")]
    NoCapacity,

    /// Profile directory creation failed
    #[error("profile directory error: {0}")]
    Io(#[from] std::io::Error),

    /// Session persistence failure bubbled up from the store
    #[error(transparent)]
    Session(#[from] umbra_session::SessionError),
}

impl From<chromiumoxide::error::CdpError> for BrowserError {
    fn from(e: chromiumoxide::error::CdpError) -> Self {
        BrowserError::Cdp(e.to_string())
    }
}
