//! Human-timing primitives
//!
//! Delay distributions and behavioral decisions that make automated
//! interaction pacing resemble a person at a keyboard. All functions are
//! synchronous draws; callers compute the delay first, then sleep, so no RNG
//! handle is held across an await point.

use rand::Rng;
use std::time::Duration;

/// Script complexity tiers for `evaluate`, each with its own pre/post delay
/// ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Simple,
    Medium,
    Complex,
}

fn uniform(low_s: f64, high_s: f64) -> Duration {
    let secs = rand::thread_rng().gen_range(low_s..=high_s);
    Duration::from_secs_f64(secs)
}

/// Delay before starting a navigation.
pub fn pre_navigation_delay() -> Duration {
    uniform(0.5, 2.0)
}

/// Simulated reading time after a page load.
pub fn reading_pause() -> Duration {
    uniform(2.0, 8.0)
}

/// Whether to scroll while "reading" (30% of page views).
pub fn should_scroll() -> bool {
    rand::thread_rng().gen_bool(0.3)
}

/// Number of wheel scrolls in one reading pass.
pub fn scroll_count() -> u32 {
    rand::thread_rng().gen_range(1..=3)
}

/// One scroll distance in pixels.
pub fn scroll_distance() -> u32 {
    rand::thread_rng().gen_range(100..=500)
}

/// Pause between consecutive scrolls.
pub fn inter_scroll_pause() -> Duration {
    uniform(0.5, 1.5)
}

/// Delay between keystrokes.
pub fn keystroke_delay() -> Duration {
    let ms = rand::thread_rng().gen_range(50..=150);
    Duration::from_millis(ms)
}

/// Whether this keystroke becomes a typo that gets corrected (2%).
pub fn should_typo() -> bool {
    rand::thread_rng().gen_bool(0.02)
}

/// A plausible wrong character for a typo.
pub fn typo_char() -> char {
    let letters = b"abcdefghijklmnopqrstuvwxyz";
    letters[rand::thread_rng().gen_range(0..letters.len())] as char
}

/// Short pause around a typo correction.
pub fn correction_pause() -> Duration {
    uniform(0.1, 0.3)
}

/// Whether to pause mid-field while typing (10%).
pub fn should_pause_mid_field() -> bool {
    rand::thread_rng().gen_bool(0.10)
}

/// Thinking pause in the middle of a field.
pub fn mid_field_pause() -> Duration {
    uniform(0.2, 0.8)
}

/// Settle time after focusing a field.
pub fn focus_settle() -> Duration {
    uniform(0.1, 0.3)
}

/// Pause after completing a field.
pub fn post_field_delay() -> Duration {
    uniform(0.2, 0.5)
}

/// Decision time before clicking a visible element.
pub fn click_decision_delay() -> Duration {
    uniform(0.3, 1.0)
}

/// Pause after a click lands.
pub fn post_click_delay() -> Duration {
    uniform(0.5, 1.5)
}

/// Sub-element click offset in pixels, within ±5 on each axis.
pub fn click_offset() -> (i64, i64) {
    let mut rng = rand::thread_rng();
    (rng.gen_range(-5..=5), rng.gen_range(-5..=5))
}

/// Pre-execution delay for a script of the given complexity.
pub fn evaluate_pre_delay(complexity: Complexity) -> Duration {
    match complexity {
        Complexity::Simple => uniform(0.1, 0.5),
        Complexity::Medium => uniform(0.3, 1.0),
        Complexity::Complex => uniform(0.8, 2.0),
    }
}

/// Post-execution delay for a script of the given complexity.
pub fn evaluate_post_delay(complexity: Complexity) -> Duration {
    match complexity {
        Complexity::Simple => uniform(0.05, 0.2),
        Complexity::Medium => uniform(0.2, 0.8),
        Complexity::Complex => uniform(0.5, 2.0),
    }
}

/// Thinking time before a challenge attempt; grows with each retry.
pub fn challenge_pre_attempt(attempt: u32) -> Duration {
    uniform(1.0, 3.0).mul_f64(f64::from(attempt + 1))
}

/// Pause between failed challenge attempts; grows with each retry.
pub fn challenge_between_attempts(attempt: u32) -> Duration {
    uniform(2.0, 5.0).mul_f64(f64::from(attempt + 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_within(d: Duration, low_s: f64, high_s: f64) {
        let s = d.as_secs_f64();
        assert!(s >= low_s && s <= high_s, "{s} not in [{low_s}, {high_s}]");
    }

    #[test]
    fn delay_ranges() {
        for _ in 0..64 {
            assert_within(pre_navigation_delay(), 0.5, 2.0);
            assert_within(reading_pause(), 2.0, 8.0);
            assert_within(inter_scroll_pause(), 0.5, 1.5);
            assert_within(keystroke_delay(), 0.05, 0.15);
            assert_within(click_decision_delay(), 0.3, 1.0);
            assert_within(post_click_delay(), 0.5, 1.5);
            assert_within(mid_field_pause(), 0.2, 0.8);
        }
    }

    #[test]
    fn complexity_tiers_are_ordered() {
        for _ in 0..64 {
            assert_within(evaluate_pre_delay(Complexity::Simple), 0.1, 0.5);
            assert_within(evaluate_pre_delay(Complexity::Medium), 0.3, 1.0);
            assert_within(evaluate_pre_delay(Complexity::Complex), 0.8, 2.0);
            assert_within(evaluate_post_delay(Complexity::Simple), 0.05, 0.2);
            assert_within(evaluate_post_delay(Complexity::Medium), 0.2, 0.8);
            assert_within(evaluate_post_delay(Complexity::Complex), 0.5, 2.0);
        }
    }

    #[test]
    fn challenge_pacing_grows_with_attempts() {
        for attempt in 0..3 {
            let scale = f64::from(attempt + 1);
            assert_within(challenge_pre_attempt(attempt), 1.0 * scale, 3.0 * scale);
            assert_within(
                challenge_between_attempts(attempt),
                2.0 * scale,
                5.0 * scale,
            );
        }
    }

    #[test]
    fn scroll_parameters() {
        for _ in 0..64 {
            assert!((1..=3).contains(&scroll_count()));
            assert!((100..=500).contains(&scroll_distance()));
            let (dx, dy) = click_offset();
            assert!((-5..=5).contains(&dx));
            assert!((-5..=5).contains(&dy));
        }
    }
}
