//! Rate governor
//!
//! Token-bucket admission over a sliding one-minute window with an adaptive
//! multiplier driven by success/failure feedback. The effective rate is
//! `floor(requests_per_minute · multiplier)`; once the window is full a
//! request consumes a burst token, and once those are gone it waits until
//! the oldest window entry ages out. Admission is fully serialized behind
//! one async mutex.
//!
//! Hostile-signal errors (rate limiting, CAPTCHA, blocking) weigh three
//! times as much as ordinary errors when the multiplier adapts.

use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};

const WINDOW: Duration = Duration::from_secs(60);
const MULTIPLIER_CEILING: f64 = 1.5;
const MULTIPLIER_SOFT_FLOOR: f64 = 0.5;
const MULTIPLIER_HARD_FLOOR: f64 = 0.3;
/// Observations required before the multiplier starts adapting.
const MIN_OBSERVATIONS: u64 = 10;
/// Observation count past which the counters decay to stay responsive.
const DECAY_THRESHOLD: u64 = 100;

/// Governor configuration.
#[derive(Debug, Clone, Copy)]
pub struct GovernorConfig {
    pub requests_per_minute: u32,
    pub burst_allowance: u32,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 10,
            burst_allowance: 20,
        }
    }
}

/// Error categories fed back into the governor. The hostile kinds count
/// triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedbackKind {
    RateLimit,
    Captcha,
    Blocked,
    General,
}

impl FeedbackKind {
    fn weight(&self) -> u64 {
        match self {
            FeedbackKind::RateLimit | FeedbackKind::Captcha | FeedbackKind::Blocked => 3,
            FeedbackKind::General => 1,
        }
    }
}

/// Point-in-time governor statistics.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct GovernorStats {
    pub multiplier: f64,
    pub effective_rate: u32,
    pub window_count: usize,
    pub burst_used: u32,
    pub success_count: u64,
    pub error_count: u64,
}

struct GovernorState {
    request_times: Vec<Instant>,
    burst_used: u32,
    last_burst_reset: Instant,
    success_count: u64,
    error_count: u64,
    multiplier: f64,
}

/// Admission controller gating outgoing navigations.
pub struct RateGovernor {
    config: GovernorConfig,
    state: Mutex<GovernorState>,
}

impl RateGovernor {
    pub fn new(config: GovernorConfig) -> Self {
        Self {
            config,
            state: Mutex::new(GovernorState {
                request_times: Vec::new(),
                burst_used: 0,
                last_burst_reset: Instant::now(),
                success_count: 0,
                error_count: 0,
                multiplier: 1.0,
            }),
        }
    }

    /// Acquire permission to make a request, waiting if the window and the
    /// burst allowance are both exhausted.
    pub async fn acquire(&self) {
        let mut state = self.state.lock().await;
        let now = Instant::now();

        state.request_times.retain(|t| now.duration_since(*t) < WINDOW);
        if now.duration_since(state.last_burst_reset) > WINDOW {
            state.burst_used = 0;
            state.last_burst_reset = now;
        }

        let effective = self.effective_rate_locked(&state);
        if state.request_times.len() >= effective as usize {
            if state.burst_used < self.config.burst_allowance {
                state.burst_used += 1;
                debug!(burst_used = state.burst_used, "using burst allowance");
            } else if let Some(oldest) = state.request_times.iter().min().copied() {
                let wait = WINDOW.saturating_sub(now.duration_since(oldest));
                if !wait.is_zero() {
                    info!(wait_s = wait.as_secs_f64(), "rate limit reached, waiting");
                    // Holding the lock serializes all admission behind the
                    // wait, which is exactly the intended behavior.
                    tokio::time::sleep(wait).await;
                    let now = Instant::now();
                    state.request_times.retain(|t| now.duration_since(*t) < WINDOW);
                }
            }
        }

        state.request_times.push(Instant::now());
    }

    /// Record a successful request.
    pub async fn mark_success(&self) {
        let mut state = self.state.lock().await;
        state.success_count += 1;
        self.adjust_multiplier(&mut state);
    }

    /// Record a failed request with its category.
    pub async fn mark_error(&self, kind: FeedbackKind) {
        let mut state = self.state.lock().await;
        state.error_count += kind.weight();
        self.adjust_multiplier(&mut state);
    }

    pub async fn multiplier(&self) -> f64 {
        self.state.lock().await.multiplier
    }

    pub async fn stats(&self) -> GovernorStats {
        let state = self.state.lock().await;
        GovernorStats {
            multiplier: state.multiplier,
            effective_rate: self.effective_rate_locked(&state),
            window_count: state.request_times.len(),
            burst_used: state.burst_used,
            success_count: state.success_count,
            error_count: state.error_count,
        }
    }

    fn effective_rate_locked(&self, state: &GovernorState) -> u32 {
        (f64::from(self.config.requests_per_minute) * state.multiplier).floor() as u32
    }

    fn adjust_multiplier(&self, state: &mut GovernorState) {
        let total = state.success_count + state.error_count;
        if total < MIN_OBSERVATIONS {
            return;
        }

        let success_rate = state.success_count as f64 / total as f64;
        let before = state.multiplier;
        state.multiplier = if success_rate > 0.9 {
            (state.multiplier + 0.1).min(MULTIPLIER_CEILING)
        } else if success_rate > 0.7 {
            state.multiplier
        } else if success_rate > 0.5 {
            (state.multiplier - 0.1).max(MULTIPLIER_SOFT_FLOOR)
        } else {
            (state.multiplier - 0.2).max(MULTIPLIER_HARD_FLOOR)
        };

        if (state.multiplier - before).abs() > f64::EPSILON {
            debug!(
                success_rate,
                multiplier = state.multiplier,
                "rate multiplier adjusted"
            );
        }

        // Keep the estimator responsive on long runs.
        if total > DECAY_THRESHOLD {
            state.success_count = (state.success_count as f64 * 0.8) as u64;
            state.error_count = (state.error_count as f64 * 0.8) as u64;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn governor(rpm: u32, burst: u32) -> RateGovernor {
        RateGovernor::new(GovernorConfig {
            requests_per_minute: rpm,
            burst_allowance: burst,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn admits_up_to_effective_rate_immediately() {
        let governor = governor(3, 0);
        for _ in 0..3 {
            governor.acquire().await;
        }
        let stats = governor.stats().await;
        assert_eq!(stats.window_count, 3);
        assert_eq!(stats.burst_used, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn burst_tokens_cover_overflow() {
        let governor = governor(2, 2);
        for _ in 0..4 {
            governor.acquire().await;
        }
        let stats = governor.stats().await;
        assert_eq!(stats.window_count, 4);
        assert_eq!(stats.burst_used, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn waits_once_burst_is_exhausted() {
        let governor = governor(1, 1);
        let start = Instant::now();
        governor.acquire().await; // window
        governor.acquire().await; // burst
        governor.acquire().await; // must wait for the oldest entry to age out
        assert!(start.elapsed() >= Duration::from_secs(59));
    }

    #[tokio::test(start_paused = true)]
    async fn window_entries_age_out() {
        let governor = governor(2, 0);
        governor.acquire().await;
        governor.acquire().await;
        tokio::time::advance(Duration::from_secs(61)).await;
        governor.acquire().await;
        assert_eq!(governor.stats().await.window_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn multiplier_collapses_under_hostile_errors() {
        // 5 successes + 15 rate-limit errors (weighted ×3 → 45 error units):
        // success rate 0.1, multiplier steps down to the hard floor.
        let governor = governor(10, 20);
        for _ in 0..5 {
            governor.mark_success().await;
        }
        for _ in 0..15 {
            governor.mark_error(FeedbackKind::RateLimit).await;
        }

        let stats = governor.stats().await;
        assert!((stats.multiplier - MULTIPLIER_HARD_FLOOR).abs() < 1e-9);
        assert_eq!(stats.effective_rate, 3); // floor(10 × 0.3)
    }

    #[tokio::test(start_paused = true)]
    async fn multiplier_grows_on_sustained_success() {
        let governor = governor(10, 20);
        for _ in 0..40 {
            governor.mark_success().await;
        }
        let multiplier = governor.multiplier().await;
        assert!((multiplier - MULTIPLIER_CEILING).abs() < 1e-9);
        assert_eq!(governor.stats().await.effective_rate, 15);
    }

    #[tokio::test(start_paused = true)]
    async fn multiplier_holds_in_the_comfortable_band() {
        // 8 successes / 2 plain errors → 0.8 success rate → no change.
        let governor = governor(10, 20);
        for _ in 0..8 {
            governor.mark_success().await;
        }
        for _ in 0..2 {
            governor.mark_error(FeedbackKind::General).await;
        }
        assert!((governor.multiplier().await - 1.0).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn no_adaptation_below_minimum_observations() {
        let governor = governor(10, 20);
        for _ in 0..3 {
            governor.mark_error(FeedbackKind::Blocked).await;
        }
        // 9 weighted observations: still below the threshold.
        assert!((governor.multiplier().await - 1.0).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn counters_decay_past_the_threshold() {
        let governor = governor(10, 20);
        for _ in 0..120 {
            governor.mark_success().await;
        }
        let stats = governor.stats().await;
        assert!(stats.success_count < 120);
    }

    #[tokio::test(start_paused = true)]
    async fn hostile_kinds_weigh_triple() {
        let governor = governor(10, 20);
        governor.mark_error(FeedbackKind::RateLimit).await;
        governor.mark_error(FeedbackKind::Captcha).await;
        governor.mark_error(FeedbackKind::Blocked).await;
        governor.mark_error(FeedbackKind::General).await;
        assert_eq!(governor.stats().await.error_count, 10);
    }
}
