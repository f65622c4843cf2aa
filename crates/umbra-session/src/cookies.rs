//! Cookie lifecycle management
//!
//! Cookies carry most of the server-visible session identity, so a restored
//! jar must look lived-in: stale entries dropped, unrealistic expiries
//! clamped, and a fraction of values rotated in place on each reuse. The
//! rotation cadence depends on the cookie category (session, persistent,
//! tracking).

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

/// SameSite attribute of a cookie.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SameSite {
    Strict,
    #[default]
    Lax,
    None,
}

/// A browser cookie in neutral form, independent of any CDP types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CookieRecord {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    /// Expiry as epoch seconds; `None` marks a session cookie.
    pub expires: Option<f64>,
    pub http_only: bool,
    pub secure: bool,
    pub same_site: SameSite,
    pub creation_time: f64,
    pub last_access: f64,
}

impl CookieRecord {
    /// A cookie whose expiry is exactly `now` counts as expired.
    pub fn is_expired_at(&self, now: f64) -> bool {
        match self.expires {
            Some(expires) => now >= expires,
            None => false,
        }
    }

    pub fn is_session_cookie(&self) -> bool {
        self.expires.is_none()
    }

    /// Seconds until expiry, `None` for session cookies.
    pub fn time_to_expiry_at(&self, now: f64) -> Option<f64> {
        self.expires.map(|expires| (expires - now).max(0.0))
    }

    pub fn age_at(&self, now: f64) -> f64 {
        (now - self.creation_time).max(0.0)
    }
}

/// Cookie category driving the rotation policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CookieCategory {
    Session,
    Persistent,
    Tracking,
}

/// Rotation cadence for one cookie category.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RotationPolicy {
    /// Minimum cookie age before rotation is considered, seconds.
    pub min_rotation_interval: f64,
    /// Upper bound of the natural rotation window, seconds.
    pub max_rotation_interval: f64,
    /// Per-preparation probability of rotating an eligible cookie.
    pub rotation_probability: f64,
}

/// Per-category rotation policy table.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RotationPolicyTable {
    pub session: RotationPolicy,
    pub persistent: RotationPolicy,
    pub tracking: RotationPolicy,
}

impl Default for RotationPolicyTable {
    fn default() -> Self {
        Self {
            session: RotationPolicy {
                min_rotation_interval: 300.0,
                max_rotation_interval: 1800.0,
                rotation_probability: 0.10,
            },
            persistent: RotationPolicy {
                min_rotation_interval: 3600.0,
                max_rotation_interval: 86_400.0,
                rotation_probability: 0.05,
            },
            tracking: RotationPolicy {
                min_rotation_interval: 1800.0,
                max_rotation_interval: 7200.0,
                rotation_probability: 0.20,
            },
        }
    }
}

impl RotationPolicyTable {
    pub fn for_category(&self, category: CookieCategory) -> RotationPolicy {
        match category {
            CookieCategory::Session => self.session,
            CookieCategory::Persistent => self.persistent,
            CookieCategory::Tracking => self.tracking,
        }
    }
}

const MAX_EXPIRY_AHEAD: f64 = 365.0 * 24.0 * 3600.0;

fn default_tracking_domains() -> HashSet<String> {
    [
        "google-analytics.com",
        "facebook.com",
        "doubleclick.net",
        "googlesyndication.com",
        "googletagmanager.com",
        "adservice.google.com",
        "adsystem.com",
    ]
    .iter()
    .map(|d| d.to_string())
    .collect()
}

/// Validates, classifies, rotates and ages cookies.
pub struct CookieManager {
    /// Domains whose cookies are classified as tracking cookies.
    pub tracking_domains: HashSet<String>,
    /// Rotation policy per category.
    pub policies: RotationPolicyTable,
    rng: SmallRng,
}

impl CookieManager {
    pub fn new() -> Self {
        Self::with_rng(SmallRng::from_entropy())
    }

    /// Construct with an explicit RNG so rotation draws are reproducible.
    pub fn with_rng(rng: SmallRng) -> Self {
        Self {
            tracking_domains: default_tracking_domains(),
            policies: RotationPolicyTable::default(),
            rng,
        }
    }

    /// Category of a cookie: tracking by domain match, otherwise session or
    /// persistent by expiry presence.
    pub fn category(&self, cookie: &CookieRecord) -> CookieCategory {
        if self
            .tracking_domains
            .iter()
            .any(|d| cookie.domain.contains(d.as_str()))
        {
            return CookieCategory::Tracking;
        }
        if cookie.is_session_cookie() {
            CookieCategory::Session
        } else {
            CookieCategory::Persistent
        }
    }

    /// Drop cookies with empty name or domain, drop expired ones, and touch
    /// last-access on the survivors.
    pub fn validate(&self, cookies: Vec<CookieRecord>, now: f64) -> Vec<CookieRecord> {
        let total = cookies.len();
        let valid: Vec<CookieRecord> = cookies
            .into_iter()
            .filter(|c| !c.name.is_empty() && !c.domain.is_empty())
            .filter(|c| !c.is_expired_at(now))
            .map(|mut c| {
                c.last_access = now;
                c
            })
            .collect();

        if valid.len() < total {
            debug!(valid = valid.len(), dropped = total - valid.len(), "validated cookies");
        }
        valid
    }

    /// Clamp expiries more than a year out to one year; convert past
    /// expiries to session cookies.
    pub fn cap_expiry(&self, cookies: Vec<CookieRecord>, now: f64) -> Vec<CookieRecord> {
        cookies
            .into_iter()
            .map(|mut c| {
                if let Some(expires) = c.expires {
                    if expires > now + MAX_EXPIRY_AHEAD {
                        c.expires = Some(now + MAX_EXPIRY_AHEAD);
                    } else if expires < now {
                        c.expires = None;
                    }
                }
                c
            })
            .collect()
    }

    /// Rotate eligible cookies: a cookie at least `min_rotation_interval`
    /// old is rotated with its category's probability, receiving a
    /// structure-preserving regenerated value and a reset creation time.
    pub fn rotate(&mut self, cookies: Vec<CookieRecord>, now: f64) -> Vec<CookieRecord> {
        let mut rotated_count = 0usize;
        let rotated = cookies
            .into_iter()
            .map(|mut c| {
                if self.should_rotate(&c, now) && !c.is_expired_at(now) {
                    c.value = self.regenerate_value(&c.value);
                    c.creation_time = now;
                    c.last_access = now;
                    rotated_count += 1;
                } else {
                    c.last_access = now;
                }
                c
            })
            .collect();

        if rotated_count > 0 {
            debug!(count = rotated_count, "rotated cookies");
        }
        rotated
    }

    /// Full preparation pipeline: validate → cap expiry → rotate, with
    /// last-access touched on every survivor.
    pub fn prepare_for_session(&mut self, cookies: Vec<CookieRecord>, now: f64) -> Vec<CookieRecord> {
        let cookies = self.validate(cookies, now);
        let cookies = self.cap_expiry(cookies, now);
        let mut cookies = self.rotate(cookies, now);
        for c in cookies.iter_mut() {
            c.last_access = now;
        }
        debug!(count = cookies.len(), "prepared cookies for session");
        cookies
    }

    fn should_rotate(&mut self, cookie: &CookieRecord, now: f64) -> bool {
        let policy = self.policies.for_category(self.category(cookie));
        if self.rng.gen::<f64>() >= policy.rotation_probability {
            return false;
        }
        cookie.age_at(now) >= policy.min_rotation_interval
    }

    /// Regenerate a cookie value preserving its structure: identifier-like
    /// values (long, containing digits) and very short values are replaced
    /// wholesale at identical length; everything else gets 1-3 in-place
    /// character mutations that preserve the digit/letter class.
    fn regenerate_value(&mut self, value: &str) -> String {
        let chars: Vec<char> = value.chars().collect();
        let has_digit = chars.iter().any(|c| c.is_ascii_digit());

        if (chars.len() >= 10 && has_digit) || chars.len() < 5 {
            return self.random_alphanumeric(chars.len());
        }

        let mut mutated = chars;
        let change_count = self.rng.gen_range(1..=3usize).min(mutated.len());
        for _ in 0..change_count {
            let pos = self.rng.gen_range(0..mutated.len());
            if mutated[pos].is_ascii_alphabetic() {
                mutated[pos] = self.random_char(ALPHA);
            } else if mutated[pos].is_ascii_digit() {
                mutated[pos] = self.random_char(DIGITS);
            }
        }
        mutated.into_iter().collect()
    }

    fn random_alphanumeric(&mut self, len: usize) -> String {
        (0..len).map(|_| self.random_char(ALPHANUMERIC)).collect()
    }

    fn random_char(&mut self, set: &[u8]) -> char {
        set[self.rng.gen_range(0..set.len())] as char
    }
}

impl Default for CookieManager {
    fn default() -> Self {
        Self::new()
    }
}

const ALPHA: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";
const DIGITS: &[u8] = b"0123456789";
const ALPHANUMERIC: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

#[cfg(test)]
mod tests {
    use super::*;

    fn cookie(name: &str, domain: &str, expires: Option<f64>, created: f64) -> CookieRecord {
        CookieRecord {
            name: name.to_string(),
            value: "abc123def456ghi7".to_string(),
            domain: domain.to_string(),
            path: "/".to_string(),
            expires,
            http_only: false,
            secure: true,
            same_site: SameSite::Lax,
            creation_time: created,
            last_access: created,
        }
    }

    fn manager(seed: u64) -> CookieManager {
        CookieManager::with_rng(SmallRng::seed_from_u64(seed))
    }

    #[test]
    fn expiry_exactly_now_is_expired() {
        let now = 1_700_000_000.0;
        let c = cookie("sid", "ex.com", Some(now), now - 100.0);
        assert!(c.is_expired_at(now));
        assert!(!c.is_expired_at(now - 0.001));
    }

    #[test]
    fn validate_drops_invalid_and_expired() {
        let now = 1_700_000_000.0;
        let manager = manager(1);
        let cookies = vec![
            cookie("good", "ex.com", None, now - 10.0),
            cookie("", "ex.com", None, now - 10.0),
            cookie("nodomain", "", None, now - 10.0),
            cookie("expired", "ex.com", Some(now - 1.0), now - 100.0),
        ];
        let valid = manager.validate(cookies, now);
        assert_eq!(valid.len(), 1);
        assert_eq!(valid[0].name, "good");
        assert_eq!(valid[0].last_access, now);
    }

    #[test]
    fn cap_expiry_clamps_and_converts() {
        let now = 1_700_000_000.0;
        let manager = manager(1);
        let far = now + 2.0 * 365.0 * 24.0 * 3600.0;
        let cookies = vec![
            cookie("far", "ex.com", Some(far), now),
            cookie("past", "ex.com", Some(now - 5.0), now - 100.0),
            cookie("session", "ex.com", None, now),
        ];
        let capped = manager.cap_expiry(cookies, now);
        assert_eq!(capped[0].expires, Some(now + MAX_EXPIRY_AHEAD));
        assert_eq!(capped[1].expires, None);
        assert_eq!(capped[2].expires, None);
    }

    #[test]
    fn categories() {
        let manager = manager(1);
        let now = 1_700_000_000.0;
        assert_eq!(
            manager.category(&cookie("a", "stats.google-analytics.com", None, now)),
            CookieCategory::Tracking
        );
        assert_eq!(
            manager.category(&cookie("b", "ex.com", None, now)),
            CookieCategory::Session
        );
        assert_eq!(
            manager.category(&cookie("c", "ex.com", Some(now + 100.0), now)),
            CookieCategory::Persistent
        );
    }

    #[test]
    fn rotation_with_certain_probability_rewrites_values() {
        // Two session cookies aged ten minutes with the rotation draw forced
        // to fire: both come back with fresh same-length values and reset
        // creation times.
        let now = 1_700_000_000.0;
        let mut manager = manager(42);
        manager.policies.session.rotation_probability = 1.0;

        let aged = now - 600.0;
        let cookies = vec![cookie("sid1", "ex.com", None, aged), cookie("sid2", "ex.com", None, aged)];
        let originals: Vec<String> = cookies.iter().map(|c| c.value.clone()).collect();

        let rotated = manager.rotate(cookies, now);
        for (c, original) in rotated.iter().zip(originals.iter()) {
            assert_ne!(&c.value, original);
            assert_eq!(c.value.len(), original.len());
            assert_eq!(c.creation_time, now);
            assert_eq!(c.last_access, now);
        }
    }

    #[test]
    fn young_cookies_are_never_rotated() {
        let now = 1_700_000_000.0;
        let mut manager = manager(42);
        manager.policies.session.rotation_probability = 1.0;

        // Below the 300 s session minimum.
        let cookies = vec![cookie("sid", "ex.com", None, now - 60.0)];
        let rotated = manager.rotate(cookies, now);
        assert_eq!(rotated[0].value, "abc123def456ghi7");
        assert_eq!(rotated[0].creation_time, now - 60.0);
    }

    #[test]
    fn regeneration_preserves_structure() {
        let mut manager = manager(7);

        // Long identifier with digits: wholesale replacement, same length.
        let long = manager.regenerate_value("session1234567890");
        assert_eq!(long.len(), 17);
        assert!(long.chars().all(|c| c.is_ascii_alphanumeric()));

        // Short value: wholesale replacement, same length.
        let short = manager.regenerate_value("abc");
        assert_eq!(short.len(), 3);

        // Mid-length letters-only value: in-place mutation preserves class.
        let mutated = manager.regenerate_value("abcdefg");
        assert_eq!(mutated.len(), 7);
        assert!(mutated.chars().all(|c| c.is_ascii_alphabetic()));

        // Digit positions stay digits.
        let digits = manager.regenerate_value("12x4567");
        assert_eq!(digits.len(), 7);
        for (original, new) in "12x4567".chars().zip(digits.chars()) {
            assert_eq!(original.is_ascii_digit(), new.is_ascii_digit());
        }
    }

    #[test]
    fn prepare_pipeline_is_idempotent_without_rotation() {
        let now = 1_700_000_000.0;
        let mut manager = manager(3);
        manager.policies.session.rotation_probability = 0.0;
        manager.policies.persistent.rotation_probability = 0.0;
        manager.policies.tracking.rotation_probability = 0.0;

        let cookies = vec![
            cookie("a", "ex.com", None, now - 600.0),
            cookie("b", "ex.com", Some(now + 1000.0), now - 600.0),
        ];
        let once = manager.prepare_for_session(cookies, now);
        let twice = manager.prepare_for_session(once.clone(), now);
        assert_eq!(once, twice);
    }

    #[test]
    fn seeded_rotation_is_deterministic() {
        let now = 1_700_000_000.0;
        let run = |seed: u64| {
            let mut manager = manager(seed);
            manager.policies.session.rotation_probability = 1.0;
            let cookies = vec![cookie("sid", "ex.com", None, now - 600.0)];
            manager.rotate(cookies, now)[0].value.clone()
        };
        assert_eq!(run(99), run(99));
    }
}
