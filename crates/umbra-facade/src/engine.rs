//! Engine orchestration
//!
//! Owns the cluster, the session store, the cookie manager, the CAPTCHA
//! handler and the rate governor, and exposes the upstream API:
//! `request`, `challenge`, `save_session`/`restore_session`, `stats`.

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use umbra_browser::{BrowserCluster, BrowserError, ChallengeOutcome, ClusterStats};
use umbra_captcha::{CaptchaHandler, ChallengeStats, ChallengeVariant};
use umbra_session::{epoch_now, CookieManager, SessionStore, SessionSummary};
use umbra_stealth::FingerprintRegistry;

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult, ErrorKind};
use crate::governor::{FeedbackKind, GovernorStats, RateGovernor};

/// Engine-wide statistics for observability.
#[derive(Debug, Clone, serde::Serialize)]
pub struct EngineStats {
    pub instances: ClusterStats,
    pub rate_multiplier: f64,
    pub governor: GovernorStats,
    pub challenges: ChallengeStats,
    pub persisted_sessions: usize,
}

/// The anti-detection engine.
pub struct Engine {
    config: EngineConfig,
    cluster: std::sync::Arc<BrowserCluster>,
    store: SessionStore,
    cookies: Mutex<CookieManager>,
    captcha: CaptchaHandler,
    governor: RateGovernor,
}

impl Engine {
    /// Build an engine from configuration. Configuration problems are fatal
    /// here; nothing else is.
    pub fn new(config: EngineConfig) -> EngineResult<Self> {
        config.validate()?;

        let store = SessionStore::new(config.sessions_dir(), config.session_timeout())
            .map_err(|e| EngineError::configuration(format!("session store: {e}")))?;

        let captcha = if config.captcha.external_services.is_empty() {
            CaptchaHandler::new(config.solver_config())
        } else {
            CaptchaHandler::with_services(config.solver_config(), &config.captcha.external_services)
                .map_err(|e| EngineError::configuration(format!("captcha services: {e}")))?
        };

        let registry = FingerprintRegistry::new(config.persona_families.clone());
        let cluster = BrowserCluster::new(config.cluster_config(), registry);
        let governor = RateGovernor::new(config.governor_config());

        Ok(Self {
            config,
            cluster,
            store,
            cookies: Mutex::new(CookieManager::new()),
            captcha,
            governor,
        })
    }

    /// Pre-warm the browser pool and start health monitoring.
    pub async fn initialize(&self) -> EngineResult<()> {
        self.cluster
            .initialize()
            .await
            .map_err(|e| EngineError::configuration(format!("cluster warm-up: {e}")))?;
        info!("engine initialized");
        Ok(())
    }

    /// Primary entry point: fetch a page under a session, gated by the
    /// governor and screened by the CAPTCHA pipeline.
    pub async fn request(&self, session_id: &str, url: &str) -> EngineResult<String> {
        self.governor.acquire().await;

        let html = match self.cluster.handle_request(session_id, url).await {
            Ok(html) => html,
            Err(e) => {
                let error = map_browser_error(e, session_id);
                if error.kind != ErrorKind::NoCapacity {
                    self.governor.mark_error(FeedbackKind::General).await;
                }
                return Err(error);
            }
        };

        if looks_rate_limited(&html) {
            self.governor.mark_error(FeedbackKind::RateLimit).await;
            return Err(EngineError::new(
                ErrorKind::RateLimited,
                "remote signalled throttling",
                session_id,
            ));
        }

        match self.captcha.handle_response(&html, url, session_id).await {
            (true, _) => {
                self.governor.mark_success().await;
                Ok(html)
            }
            (false, Some(challenge)) => {
                let (kind, feedback) = if challenge.variant == ChallengeVariant::Cloudflare {
                    (ErrorKind::Blocked, FeedbackKind::Blocked)
                } else {
                    (ErrorKind::CaptchaUnsolvable, FeedbackKind::Captcha)
                };
                self.governor.mark_error(feedback).await;
                Err(EngineError::new(
                    kind,
                    format!(
                        "{} ended {:?}",
                        challenge.variant.as_str(),
                        challenge.status
                    ),
                    session_id,
                ))
            }
            (false, None) => {
                // The pipeline only reports unpassable with a challenge
                // attached; treat the page as clean if it did not.
                self.governor.mark_success().await;
                Ok(html)
            }
        }
    }

    /// Explicit challenge handling for a session's current page.
    pub async fn challenge(
        &self,
        session_id: &str,
        variant: Option<ChallengeVariant>,
        max_attempts: u32,
    ) -> EngineResult<ChallengeOutcome> {
        let instance = self
            .cluster
            .instance_with_session(session_id)
            .await
            .map_err(|e| map_browser_error(e, session_id))?;

        instance
            .handle_challenge(session_id, &self.captcha, variant, max_attempts)
            .await
            .map_err(|e| map_browser_error(e, session_id).with_instance(instance.id()))
    }

    /// Persist a session's state. Persistence failures are logged, never
    /// fatal: the return value reports success.
    pub async fn save_session(&self, session_id: &str) -> bool {
        let Some(instance) = self.cluster.instance_for_session(session_id).await else {
            warn!(session_id, "save requested for unknown session");
            return false;
        };

        let snapshot = match instance.snapshot_session(session_id).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(session_id, error = %e, "failed to snapshot session");
                return false;
            }
        };

        match self.store.save(snapshot).await {
            Ok(()) => {
                debug!(session_id, "session saved");
                true
            }
            Err(e) => {
                warn!(session_id, error = %e, "failed to persist session");
                false
            }
        }
    }

    /// Restore a persisted session into a live browser context. Cookies go
    /// through the full preparation pipeline (validate, cap expiry, rotate)
    /// on the way in. Returns whether a persisted session existed.
    pub async fn restore_session(&self, session_id: &str) -> EngineResult<bool> {
        let persisted = self
            .store
            .load(session_id)
            .await
            .map_err(|e| EngineError::new(ErrorKind::Persistence, e.to_string(), session_id))?;
        let Some(persisted) = persisted else {
            return Ok(false);
        };

        let instance = self
            .cluster
            .instance_with_session(session_id)
            .await
            .map_err(|e| map_browser_error(e, session_id))?;

        let prepared = {
            let mut cookies = self.cookies.lock().await;
            cookies.prepare_for_session(persisted.cookies.clone(), epoch_now())
        };

        instance
            .restore_session(session_id, &persisted, &prepared)
            .await
            .map_err(|e| map_browser_error(e, session_id).with_instance(instance.id()))?;

        info!(
            session_id,
            cookies = prepared.len(),
            pages_visited = persisted.pages_visited,
            "session restored"
        );
        Ok(true)
    }

    /// Delete expired session files; returns how many were removed.
    pub async fn cleanup_expired_sessions(&self) -> usize {
        self.store.cleanup_expired().await
    }

    /// List persisted sessions, most recent first.
    pub async fn list_sessions(&self) -> Vec<SessionSummary> {
        self.store.list().await
    }

    /// Engine-wide statistics.
    pub async fn stats(&self) -> EngineStats {
        let governor = self.governor.stats().await;
        EngineStats {
            instances: self.cluster.stats().await,
            rate_multiplier: governor.multiplier,
            governor,
            challenges: self.captcha.stats().await,
            persisted_sessions: self.store.list().await.len(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Tear down the cluster and its monitor.
    pub async fn shutdown(&self) {
        self.cluster.shutdown().await;
        info!("engine shut down");
    }
}

fn map_browser_error(e: BrowserError, session_id: &str) -> EngineError {
    match e {
        BrowserError::NoCapacity => {
            EngineError::new(ErrorKind::NoCapacity, e.to_string(), session_id)
        }
        other => {
            // The cluster already spent its single failover before this
            // error surfaced.
            EngineError::new(ErrorKind::TransientBrowser, other.to_string(), session_id)
                .with_attempts(2)
        }
    }
}

/// Cheap throttling sniff on response bodies.
fn looks_rate_limited(html: &str) -> bool {
    let lower = html.to_lowercase();
    lower.contains("429 too many requests")
        || lower.contains("<title>too many requests</title>")
        || lower.contains("rate limit exceeded")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn engine_with_tempdir() -> (Engine, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let config = EngineConfig {
            cache_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        (Engine::new(config).unwrap(), dir)
    }

    #[test]
    fn rate_limit_sniffing() {
        assert!(looks_rate_limited(
            "<html><head><title>Too Many Requests</title></head></html>"
        ));
        assert!(looks_rate_limited("<h1>429 Too Many Requests</h1>"));
        assert!(!looks_rate_limited("<html><body>All good</body></html>"));
    }

    #[test]
    fn browser_errors_map_to_kinds() {
        let e = map_browser_error(BrowserError::NoCapacity, "s1");
        assert_eq!(e.kind, ErrorKind::NoCapacity);
        assert_eq!(e.attempt_count, 1);

        let e = map_browser_error(BrowserError::Cdp("boom".to_string()), "s1");
        assert_eq!(e.kind, ErrorKind::TransientBrowser);
        assert_eq!(e.attempt_count, 2);
    }

    #[tokio::test]
    async fn engine_builds_and_reports_stats_before_warmup() {
        let (engine, _dir) = engine_with_tempdir();
        let stats = engine.stats().await;
        assert_eq!(stats.instances.instance_count, 0);
        assert!((stats.rate_multiplier - 1.0).abs() < 1e-9);
        assert_eq!(stats.challenges.total_challenges, 0);
        assert_eq!(stats.persisted_sessions, 0);
    }

    #[tokio::test]
    async fn restore_of_unknown_session_is_false() {
        let (engine, _dir) = engine_with_tempdir();
        assert!(!engine.restore_session("missing").await.unwrap());
    }

    #[tokio::test]
    async fn save_of_unknown_session_is_false() {
        let (engine, _dir) = engine_with_tempdir();
        assert!(!engine.save_session("missing").await);
    }

    #[test]
    fn invalid_config_is_fatal() {
        let config = EngineConfig {
            max_instances: 0,
            ..Default::default()
        };
        let err = match Engine::new(config) {
            Ok(_) => panic!("expected Engine::new to fail"),
            Err(err) => err,
        };
        assert_eq!(err.kind, ErrorKind::Configuration);
    }

    #[test]
    fn bogus_captcha_provider_is_fatal() {
        let dir = tempdir().unwrap();
        let mut config = EngineConfig {
            cache_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        config.captcha.external_services.push(
            serde_json::from_str(r#"{"provider": "bogus", "api_key": "k"}"#).unwrap(),
        );
        let err = match Engine::new(config) {
            Ok(_) => panic!("expected Engine::new to fail"),
            Err(err) => err,
        };
        assert_eq!(err.kind, ErrorKind::Configuration);
    }
}
