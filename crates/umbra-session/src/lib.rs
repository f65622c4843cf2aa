//! # Umbra Session
//!
//! Cookie lifecycle management and on-disk session persistence.
//!
//! The [`CookieManager`] validates, classifies, rotates and ages neutral
//! cookie records according to a per-category policy, so restored sessions
//! present realistic cookie churn instead of frozen jars. The
//! [`SessionStore`] persists session state (persona name, cookies,
//! navigation counters, action log) as one JSON file per session with
//! mtime-based expiry.
//!
//! Neither type touches a browser: extraction from and installation into a
//! live cookie jar happen at the browser layer, which converts to and from
//! [`CookieRecord`].

pub mod cookies;
pub mod error;
pub mod store;

pub use cookies::{CookieCategory, CookieManager, CookieRecord, RotationPolicy, SameSite};
pub use error::{SessionError, SessionResult};
pub use store::{PersistentSession, SessionStore, SessionSummary, StorageTier};

/// Current wall-clock time as fractional seconds since the Unix epoch.
pub fn epoch_now() -> f64 {
    let now = chrono::Utc::now();
    now.timestamp() as f64 + f64::from(now.timestamp_subsec_millis()) / 1000.0
}
