//! # Umbra Captcha
//!
//! Detection and handling of anti-bot obstacles in page content.
//!
//! The [`CaptchaDetector`] scores each known challenge variant from weighted
//! matches across four feature groups (CSS selectors, visible keywords,
//! script sources, URL patterns) and extracts variant-specific payload data.
//! The [`CaptchaSolver`] walks a detected challenge through its state machine
//! (`detected → solving → solved | failed | bypassed | unsupported`), trying
//! bypass waits, local strategies, then configured external services in
//! priority order. The [`CaptchaHandler`] ties both together and keeps an
//! in-memory history for statistics.

pub mod challenge;
pub mod detector;
pub mod error;
pub mod handler;
pub mod services;
pub mod solver;

pub use challenge::{
    default_strategies, CaptchaChallenge, ChallengeStatus, ChallengeVariant, SolvingStrategy,
};
pub use detector::CaptchaDetector;
pub use error::{CaptchaError, CaptchaResult};
pub use handler::{CaptchaHandler, ChallengeStats, VariantStats};
pub use services::{
    AntiCaptchaService, CapSolverService, ExternalServiceConfig, ExternalSolver, TwoCaptchaService,
};
pub use solver::{CaptchaSolver, SolverConfig};

/// Current wall-clock time as fractional seconds since the Unix epoch.
pub(crate) fn epoch_now() -> f64 {
    let now = chrono::Utc::now();
    now.timestamp() as f64 + f64::from(now.timestamp_subsec_millis()) / 1000.0
}
