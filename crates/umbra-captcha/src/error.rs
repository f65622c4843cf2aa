use thiserror::Error;

/// Result type for CAPTCHA operations
pub type CaptchaResult<T> = Result<T, CaptchaError>;

/// Errors surfaced by the CAPTCHA pipeline
#[derive(Error, Debug)]
pub enum CaptchaError {
    /// External solver HTTP failure
    #[error("solver request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// External solver rejected the task or returned an error status
    #[error("solver service {service}: {detail}")]
    Service { service: String, detail: String },

    /// External solver did not produce a solution within its timeout
    #[error("solver service {0} timed out")]
    ServiceTimeout(String),

    /// The service has no credentials or is misconfigured
    #[error("solver configuration error: {0}")]
    Configuration(String),
}
