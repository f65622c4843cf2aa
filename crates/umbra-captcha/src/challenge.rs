//! Challenge model
//!
//! Sum types for the challenge variant and its lifecycle status, the
//! challenge record itself, and the strategy table mapping variants to
//! ordered solving strategies.

use serde::{Deserialize, Serialize};

use crate::epoch_now;

/// Known anti-bot challenge variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeVariant {
    RecaptchaV2,
    RecaptchaV3,
    HCaptcha,
    Image,
    Text,
    Cloudflare,
    FunCaptcha,
    Unknown,
}

impl ChallengeVariant {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChallengeVariant::RecaptchaV2 => "recaptcha_v2",
            ChallengeVariant::RecaptchaV3 => "recaptcha_v3",
            ChallengeVariant::HCaptcha => "hcaptcha",
            ChallengeVariant::Image => "image_captcha",
            ChallengeVariant::Text => "text_captcha",
            ChallengeVariant::Cloudflare => "cloudflare",
            ChallengeVariant::FunCaptcha => "funcaptcha",
            ChallengeVariant::Unknown => "unknown",
        }
    }
}

/// Lifecycle of a challenge through the solving state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeStatus {
    Detected,
    Solving,
    Solved,
    Failed,
    Bypassed,
    Unsupported,
}

impl ChallengeStatus {
    /// Terminal states end the state machine.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ChallengeStatus::Solved
                | ChallengeStatus::Failed
                | ChallengeStatus::Bypassed
                | ChallengeStatus::Unsupported
        )
    }

    /// Whether the page can be considered passable.
    pub fn is_resolved(&self) -> bool {
        matches!(self, ChallengeStatus::Solved | ChallengeStatus::Bypassed)
    }
}

/// A detected anti-bot challenge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptchaChallenge {
    pub variant: ChallengeVariant,
    /// Detection confidence in [0, 1].
    pub confidence: f64,
    pub page_url: String,
    pub session_id: String,
    /// Signals that contributed to detection, for diagnostics.
    pub matched_signals: Vec<String>,
    pub detected_at: f64,

    // Variant-specific payload.
    pub site_key: Option<String>,
    pub image_url: Option<String>,
    pub question: Option<String>,

    pub status: ChallengeStatus,
    pub solution: Option<String>,
    /// Wall-clock seconds spent in the solver, set on terminal transition.
    pub solve_time: Option<f64>,
}

impl CaptchaChallenge {
    pub fn new(variant: ChallengeVariant, confidence: f64, page_url: impl Into<String>) -> Self {
        Self {
            variant,
            confidence: confidence.min(1.0),
            page_url: page_url.into(),
            session_id: String::new(),
            matched_signals: Vec::new(),
            detected_at: epoch_now(),
            site_key: None,
            image_url: None,
            question: None,
            status: ChallengeStatus::Detected,
            solution: None,
            solve_time: None,
        }
    }
}

/// One strategy for solving a specific variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolvingStrategy {
    pub variant: ChallengeVariant,
    /// Lower value runs earlier.
    pub priority: u8,
    pub enabled: bool,
    /// Observed success rate in [0, 1].
    pub success_rate: f64,
    /// Mean solve time, seconds.
    pub average_solve_time: f64,
    /// Monetary cost per solve for external services, dollars.
    pub cost_per_solve: f64,
}

/// Default strategy table. External-service variants ship disabled; they are
/// enabled when the solver is configured with credentials.
pub fn default_strategies() -> Vec<SolvingStrategy> {
    vec![
        SolvingStrategy {
            variant: ChallengeVariant::Text,
            priority: 1,
            enabled: true,
            success_rate: 0.8,
            average_solve_time: 1.0,
            cost_per_solve: 0.0,
        },
        SolvingStrategy {
            variant: ChallengeVariant::Cloudflare,
            priority: 1,
            enabled: true,
            success_rate: 0.9,
            average_solve_time: 15.0,
            cost_per_solve: 0.0,
        },
        SolvingStrategy {
            variant: ChallengeVariant::RecaptchaV3,
            priority: 2,
            enabled: true,
            success_rate: 0.7,
            average_solve_time: 3.0,
            cost_per_solve: 0.0,
        },
        SolvingStrategy {
            variant: ChallengeVariant::Image,
            priority: 3,
            enabled: false,
            success_rate: 0.5,
            average_solve_time: 10.0,
            cost_per_solve: 0.0,
        },
        SolvingStrategy {
            variant: ChallengeVariant::FunCaptcha,
            priority: 4,
            enabled: false,
            success_rate: 0.8,
            average_solve_time: 25.0,
            cost_per_solve: 0.001,
        },
        SolvingStrategy {
            variant: ChallengeVariant::RecaptchaV2,
            priority: 4,
            enabled: false,
            success_rate: 0.9,
            average_solve_time: 30.0,
            cost_per_solve: 0.001,
        },
        SolvingStrategy {
            variant: ChallengeVariant::HCaptcha,
            priority: 4,
            enabled: false,
            success_rate: 0.85,
            average_solve_time: 25.0,
            cost_per_solve: 0.001,
        },
    ]
}
