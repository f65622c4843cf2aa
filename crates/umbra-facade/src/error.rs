//! Error record surfaced to upper layers
//!
//! Every failed request produces exactly one record: an error kind, a
//! human-readable detail, the session involved, the instance involved when
//! known, and how many attempts were made (failover included).

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Error kinds surfaced by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Navigation or interaction failed from a recoverable cause; failover
    /// was already attempted.
    TransientBrowser,
    /// The remote signalled throttling.
    RateLimited,
    /// The remote served a hostile page without a solvable challenge.
    Blocked,
    /// A challenge was detected but every strategy was exhausted.
    CaptchaUnsolvable,
    /// No healthy instance available, even with overload allowance.
    NoCapacity,
    /// Session persistence I/O failed. Never fatal to a request.
    Persistence,
    /// Invalid configuration, caught at initialization only.
    Configuration,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::TransientBrowser => "transient_browser",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::Blocked => "blocked",
            ErrorKind::CaptchaUnsolvable => "captcha_unsolvable",
            ErrorKind::NoCapacity => "no_capacity",
            ErrorKind::Persistence => "persistence",
            ErrorKind::Configuration => "configuration",
        }
    }
}

/// The single error record handed to upper layers.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("{} ({}): {detail}", kind.as_str(), session_id)]
pub struct EngineError {
    pub kind: ErrorKind,
    pub detail: String,
    pub session_id: String,
    pub instance_id: Option<String>,
    pub attempt_count: u32,
}

impl EngineError {
    pub fn new(kind: ErrorKind, detail: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
            session_id: session_id.into(),
            instance_id: None,
            attempt_count: 1,
        }
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempt_count = attempts;
        self
    }

    pub fn with_instance(mut self, instance_id: impl Into<String>) -> Self {
        self.instance_id = Some(instance_id.into());
        self
    }

    pub fn configuration(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Configuration, detail, "")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_kind_and_session() {
        let e = EngineError::new(ErrorKind::CaptchaUnsolvable, "recaptcha_v2 failed", "s7");
        let text = e.to_string();
        assert!(text.contains("captcha_unsolvable"));
        assert!(text.contains("s7"));
        assert!(text.contains("recaptcha_v2 failed"));
    }

    #[test]
    fn builders_fill_optional_fields() {
        let e = EngineError::new(ErrorKind::TransientBrowser, "nav failed", "s1")
            .with_attempts(2)
            .with_instance("i-42");
        assert_eq!(e.attempt_count, 2);
        assert_eq!(e.instance_id.as_deref(), Some("i-42"));
    }

    #[test]
    fn serializes_as_snake_case() {
        let e = EngineError::new(ErrorKind::NoCapacity, "pool empty", "s1");
        let json = serde_json::to_value(&e).unwrap();
        assert_eq!(json["kind"], "no_capacity");
    }
}
