//! Session persistence across process restarts.
//!
//! Mirrors the restore flow: a session with cookies and navigation counters
//! is saved, the in-memory state is discarded, and a fresh store restores
//! the same state with the cookies run through the preparation pipeline.

use rand::rngs::SmallRng;
use rand::SeedableRng;
use std::collections::HashMap;
use std::time::Duration;
use tempfile::tempdir;

use umbra_session::{
    epoch_now, CookieManager, CookieRecord, PersistentSession, SameSite, SessionStore,
};

fn cookie(name: &str, value: &str, expires: Option<f64>, created: f64) -> CookieRecord {
    CookieRecord {
        name: name.to_string(),
        value: value.to_string(),
        domain: "locator.example.gov".to_string(),
        path: "/".to_string(),
        expires,
        http_only: true,
        secure: true,
        same_site: SameSite::Lax,
        creation_time: created,
        last_access: created,
    }
}

fn seeded_session(now: f64) -> PersistentSession {
    PersistentSession {
        session_id: "s1".to_string(),
        profile_name: "Chrome on Windows".to_string(),
        user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64)".to_string(),
        start_time: now - 900.0,
        last_activity: now - 30.0,
        pages_visited: 7,
        actions_performed: vec![
            "navigate_to:https://locator.example.gov/search".to_string(),
            "fill_form:#last-name".to_string(),
            "fill_form:#first-name".to_string(),
            "click:#submit".to_string(),
            "navigate_to:https://locator.example.gov/results".to_string(),
        ],
        cookies: vec![
            cookie("session_token", "abc123def456ghij", None, now - 600.0),
            cookie("visited", "true", None, now - 600.0),
            cookie("pref", "en", Some(now + 86_400.0), now - 600.0),
        ],
        local_storage: HashMap::new(),
        session_storage: HashMap::new(),
        viewport_width: 1440,
        viewport_height: 900,
        language: "en-US".to_string(),
        timezone: "America/New_York".to_string(),
    }
}

#[tokio::test]
async fn restore_after_restart_preserves_state_and_prepares_cookies() {
    let dir = tempdir().unwrap();
    let now = epoch_now();

    // Save, then drop every in-memory handle.
    {
        let store = SessionStore::new(dir.path(), Duration::from_secs(1800)).unwrap();
        store.save(seeded_session(now)).await.unwrap();
    }

    // Fresh store: disk is the only source.
    let store = SessionStore::new(dir.path(), Duration::from_secs(1800)).unwrap();
    let restored = store.load("s1").await.unwrap().expect("persisted session");

    assert_eq!(restored.pages_visited, 7);
    assert_eq!(restored.actions_performed.len(), 5);
    assert_eq!(
        restored.actions_performed[0],
        "navigate_to:https://locator.example.gov/search"
    );
    assert_eq!(restored.cookies.len(), 3);

    // Cookies pass through the preparation pipeline on the way into a live
    // context. Force rotation so the "possibly rotated values" path runs.
    let mut manager = CookieManager::with_rng(SmallRng::seed_from_u64(7));
    manager.policies.session.rotation_probability = 1.0;
    manager.policies.persistent.rotation_probability = 1.0;

    let prepared = manager.prepare_for_session(restored.cookies.clone(), now);
    assert_eq!(prepared.len(), 3, "all three cookies survive preparation");
    for (prepared, original) in prepared.iter().zip(restored.cookies.iter()) {
        assert!(!prepared.is_expired_at(now));
        assert_eq!(prepared.name, original.name);
        assert_eq!(prepared.value.len(), original.value.len());
        assert_eq!(prepared.last_access, now);
    }

    // The long digit-bearing token must have been replaced wholesale.
    assert_ne!(prepared[0].value, restored.cookies[0].value);
}

#[tokio::test]
async fn expired_cookies_never_survive_restore() {
    let dir = tempdir().unwrap();
    let now = epoch_now();
    let store = SessionStore::new(dir.path(), Duration::from_secs(1800)).unwrap();

    let mut session = seeded_session(now);
    session.cookies.push(cookie("stale", "gone", Some(now - 10.0), now - 900.0));
    store.save(session).await.unwrap();

    let restored = store.load("s1").await.unwrap().expect("session");
    assert_eq!(restored.cookies.len(), 4, "persisted as-is");

    let mut manager = CookieManager::with_rng(SmallRng::seed_from_u64(1));
    let prepared = manager.prepare_for_session(restored.cookies, now);
    assert_eq!(prepared.len(), 3, "expired cookie dropped by preparation");
    assert!(prepared.iter().all(|c| c.name != "stale"));
}

#[tokio::test]
async fn cleanup_is_driven_by_file_mtime() {
    let dir = tempdir().unwrap();
    let now = epoch_now();

    let store = SessionStore::new(dir.path(), Duration::from_millis(40)).unwrap();
    store.save(seeded_session(now)).await.unwrap();
    assert!(store.info("s1").await.is_some());

    tokio::time::sleep(Duration::from_millis(100)).await;
    let deleted = store.cleanup_expired().await;
    assert!(deleted >= 1);
    assert!(store.load("s1").await.unwrap().is_none());
}
