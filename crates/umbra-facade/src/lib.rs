//! # Umbra Facade
//!
//! The engine tying the anti-detection core together. One request flows:
//! governor admission → cluster navigation (with one failover) → CAPTCHA
//! inspection → governor feedback. Upper layers see either the page HTML or
//! a single [`EngineError`] record.
//!
//! ## Usage
//!
//! ```no_run
//! # async fn example() -> Result<(), umbra_facade::EngineError> {
//! use umbra_facade::{Engine, EngineConfig};
//!
//! let engine = Engine::new(EngineConfig::default())?;
//! engine.initialize().await?;
//!
//! let html = engine.request("caller-1", "https://example.org/lookup").await?;
//! engine.save_session("caller-1").await;
//! engine.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod governor;

mod engine;

pub use config::{CaptchaSettings, EngineConfig};
pub use engine::{Engine, EngineStats};
pub use error::{EngineError, EngineResult, ErrorKind};
pub use governor::{FeedbackKind, GovernorConfig, GovernorStats, RateGovernor};

// Re-exported so callers do not need the component crates on their own
// dependency list for common interactions.
pub use umbra_browser::{ChallengeOutcome, ClusterStats};
pub use umbra_captcha::{ChallengeStats, ChallengeVariant};
pub use umbra_session::SessionSummary;
