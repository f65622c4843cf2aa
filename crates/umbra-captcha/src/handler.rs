//! CAPTCHA handling coordinator
//!
//! Glues the detector to the solver and records every challenge in an
//! in-memory history for statistics.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use crate::challenge::{CaptchaChallenge, ChallengeStatus};
use crate::detector::CaptchaDetector;
use crate::services::{build_service, ExternalServiceConfig};
use crate::solver::{CaptchaSolver, SolverConfig};
use crate::CaptchaResult;

/// Per-variant counters.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct VariantStats {
    pub total: u64,
    pub solved: u64,
}

/// Aggregate statistics over the challenge history.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ChallengeStats {
    pub total_challenges: u64,
    pub solved_challenges: u64,
    pub success_rate: f64,
    pub average_solve_time: f64,
    pub by_variant: HashMap<String, VariantStats>,
}

/// Main CAPTCHA handling coordinator.
pub struct CaptchaHandler {
    detector: CaptchaDetector,
    solver: CaptchaSolver,
    history: Arc<Mutex<Vec<CaptchaChallenge>>>,
}

impl CaptchaHandler {
    pub fn new(config: SolverConfig) -> Self {
        Self {
            detector: CaptchaDetector::new(),
            solver: CaptchaSolver::new(config),
            history: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Build a handler with external services from configuration. Unknown
    /// providers fail here, at initialization, not mid-request.
    pub fn with_services(
        config: SolverConfig,
        services: &[ExternalServiceConfig],
    ) -> CaptchaResult<Self> {
        let mut solver = CaptchaSolver::new(config);
        let mut sorted: Vec<&ExternalServiceConfig> = services.iter().collect();
        sorted.sort_by_key(|s| s.priority);
        for service_config in sorted {
            solver.register_service(build_service(service_config)?);
        }
        Ok(Self {
            detector: CaptchaDetector::new(),
            solver,
            history: Arc::new(Mutex::new(Vec::new())),
        })
    }

    /// Inspect a response body; if a challenge is present, run it through
    /// the solver. Returns whether the page is passable plus the challenge
    /// record (if one was detected).
    pub async fn handle_response(
        &self,
        html: &str,
        page_url: &str,
        session_id: &str,
    ) -> (bool, Option<CaptchaChallenge>) {
        let Some(mut challenge) = self.detector.detect(html, page_url) else {
            return (true, None);
        };
        challenge.session_id = session_id.to_string();

        let resolved = self.solver.solve(&mut challenge).await;
        self.history.lock().await.push(challenge.clone());
        debug!(
            variant = challenge.variant.as_str(),
            status = ?challenge.status,
            resolved,
            "challenge handled"
        );
        (resolved, Some(challenge))
    }

    /// Solve an already-constructed challenge (explicit challenge entry
    /// point); records it in the history.
    pub async fn solve_challenge(&self, challenge: &mut CaptchaChallenge) -> bool {
        let resolved = self.solver.solve(challenge).await;
        self.history.lock().await.push(challenge.clone());
        resolved
    }

    /// Aggregate statistics from the in-memory history.
    pub async fn stats(&self) -> ChallengeStats {
        let history = self.history.lock().await;
        if history.is_empty() {
            return ChallengeStats::default();
        }

        let total = history.len() as u64;
        let solved = history
            .iter()
            .filter(|c| c.status == ChallengeStatus::Solved)
            .count() as u64;

        let mut by_variant: HashMap<String, VariantStats> = HashMap::new();
        for challenge in history.iter() {
            let entry = by_variant
                .entry(challenge.variant.as_str().to_string())
                .or_default();
            entry.total += 1;
            if challenge.status == ChallengeStatus::Solved {
                entry.solved += 1;
            }
        }

        let solve_times: Vec<f64> = history.iter().filter_map(|c| c.solve_time).collect();
        let average_solve_time = if solve_times.is_empty() {
            0.0
        } else {
            solve_times.iter().sum::<f64>() / solve_times.len() as f64
        };

        ChallengeStats {
            total_challenges: total,
            solved_challenges: solved,
            success_rate: solved as f64 / total as f64,
            average_solve_time,
            by_variant,
        }
    }

    /// Expose the strategy table, e.g. for observability.
    pub fn strategies(&self) -> &[crate::SolvingStrategy] {
        self.solver.strategies()
    }
}
