//! Browser instance and its sessions
//!
//! One [`BrowserInstance`] owns one long-lived headless Chrome process with a
//! unique profile directory, plus a map of live sessions. Each session is a
//! dedicated page carrying its own persona: the stealth payload is injected
//! before any page script runs, and user agent, device metrics, timezone,
//! locale, geolocation and extra headers are overridden per page.
//!
//! Sessions are independent: the session map is locked only for O(1)
//! bookkeeping, and each session serializes its own operations behind its
//! own mutex, so a slow navigation on one session never blocks another.

use chromiumoxide::cdp::browser_protocol::emulation::{
    SetDeviceMetricsOverrideParams, SetGeolocationOverrideParams, SetLocaleOverrideParams,
    SetTimezoneOverrideParams, SetUserAgentOverrideParams,
};
use chromiumoxide::cdp::browser_protocol::input::{
    DispatchMouseEventParams, DispatchMouseEventType, MouseButton,
};
use chromiumoxide::cdp::browser_protocol::network::{Headers, SetExtraHttpHeadersParams};
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::sync::Mutex;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};
use uuid::Uuid;

use umbra_captcha::{CaptchaHandler, ChallengeVariant};
use umbra_session::{epoch_now, CookieRecord, PersistentSession};
use umbra_stealth::{render_stealth_payload, FingerprintRegistry, Persona};

use crate::config::ClusterConfig;
use crate::error::{BrowserError, BrowserResult};
use crate::humanize::{self, Complexity};
use crate::jar;
use crate::mouse;

/// A live session: one page under one persona.
pub struct BrowserSession {
    pub session_id: String,
    pub persona: Arc<Persona>,
    pub start_time: f64,
    pub last_activity: f64,
    pub pages_visited: u64,
    pub actions_performed: Vec<String>,
    page: Page,
}

impl BrowserSession {
    fn touch(&mut self, action: String) {
        self.last_activity = epoch_now();
        self.actions_performed.push(action);
    }
}

/// Read-only view of a session for observability and persistence.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub profile_name: String,
    pub pages_visited: u64,
    pub actions_count: usize,
    pub start_time: f64,
    pub last_activity: f64,
}

/// Result of explicit challenge handling on a session.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ChallengeOutcome {
    pub success: bool,
    pub attempts: u32,
    /// Wall-clock seconds spent handling the challenge.
    pub solve_time: f64,
    pub error: Option<String>,
}

/// Read-only view of instance state.
#[derive(Debug, Clone, serde::Serialize)]
pub struct InstanceSnapshot {
    pub instance_id: String,
    pub request_count: u64,
    pub error_count: u64,
    pub consecutive_failures: u32,
    pub health_score: f64,
    pub healthy: bool,
    pub session_count: usize,
    pub uptime_s: u64,
}

/// The browser process plus the handles that live and die with it.
struct Engine {
    browser: Browser,
    handler_task: tokio::task::JoinHandle<()>,
    _profile_dir: TempDir,
}

impl Engine {
    async fn launch(instance_id: &str, config: &ClusterConfig) -> BrowserResult<Self> {
        // Chrome enforces SingletonLock per profile; every process needs its
        // own directory.
        let profile_dir = match &config.profile_base_dir {
            Some(base) => TempDir::new_in(base)?,
            None => TempDir::new()?,
        };

        let mut browser_config = BrowserConfig::builder()
            .arg("--no-sandbox")
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-background-networking")
            .arg("--disable-background-timer-throttling")
            .arg("--disable-backgrounding-occluded-windows")
            .arg("--disable-renderer-backgrounding")
            .arg("--disable-ipc-flooding-protection")
            .arg("--disable-default-apps")
            .arg("--disable-sync")
            .arg("--metrics-recording-only")
            .arg("--no-first-run")
            .arg("--mute-audio")
            .build()
            .map_err(BrowserError::Launch)?;
        browser_config.user_data_dir = Some(profile_dir.path().to_path_buf());

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| BrowserError::Launch(format!("{instance_id}: {e}")))?;

        let handler_id = instance_id.to_string();
        let handler_task = tokio::spawn(async move {
            debug!(instance_id = %handler_id, "browser event handler started");
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    warn!(instance_id = %handler_id, error = %e, "browser event error");
                }
            }
            debug!(instance_id = %handler_id, "browser event handler ended");
        });

        Ok(Self {
            browser,
            handler_task,
            _profile_dir: profile_dir,
        })
    }

    async fn shutdown(mut self) {
        self.handler_task.abort();
        if let Err(e) = self.browser.close().await {
            warn!(error = %e, "error closing browser");
        }
    }
}

/// A single headless-browser process and its sessions.
pub struct BrowserInstance {
    id: String,
    engine: Mutex<Engine>,
    sessions: Mutex<HashMap<String, Arc<Mutex<BrowserSession>>>>,
    registry: Arc<Mutex<FingerprintRegistry>>,
    operation_timeout: Duration,

    request_count: AtomicU64,
    error_count: AtomicU64,
    consecutive_failures: AtomicU32,
    /// Last-used moment as millis since instance creation.
    last_used_ms: AtomicU64,
    created_at: Instant,
}

impl BrowserInstance {
    /// Launch a new browser process and wrap it as an instance.
    pub async fn launch(
        config: &ClusterConfig,
        registry: Arc<Mutex<FingerprintRegistry>>,
    ) -> BrowserResult<Arc<Self>> {
        let id = Uuid::new_v4().to_string();
        debug!(instance_id = %id, "launching browser instance");
        let engine = Engine::launch(&id, config).await?;

        info!(instance_id = %id, "browser instance launched");
        Ok(Arc::new(Self {
            id,
            engine: Mutex::new(engine),
            sessions: Mutex::new(HashMap::new()),
            registry,
            operation_timeout: config.operation_timeout,
            request_count: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
            consecutive_failures: AtomicU32::new(0),
            last_used_ms: AtomicU64::new(0),
            created_at: Instant::now(),
        }))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Create a session: fresh persona, stealth payload injected before any
    /// page script, emulation overrides applied. Idempotent per id.
    pub async fn create_session(&self, session_id: &str) -> BrowserResult<()> {
        {
            let sessions = self.sessions.lock().await;
            if sessions.contains_key(session_id) {
                return Ok(());
            }
        }

        let persona = Arc::new(self.registry.lock().await.sample_persona());
        let payload = render_stealth_payload(&persona);

        let page = {
            let engine = self.engine.lock().await;
            timeout(self.operation_timeout, engine.browser.new_page("about:blank"))
                .await
                .map_err(|_| BrowserError::Timeout {
                    operation: "create page",
                    timeout_s: self.operation_timeout.as_secs(),
                })??
        };

        // The payload must land before any page script runs.
        page.evaluate_on_new_document(payload.as_str()).await?;
        self.apply_persona_overrides(&page, &persona).await?;

        let now = epoch_now();
        let session = BrowserSession {
            session_id: session_id.to_string(),
            persona: persona.clone(),
            start_time: now,
            last_activity: now,
            pages_visited: 0,
            actions_performed: Vec::new(),
            page,
        };

        self.sessions
            .lock()
            .await
            .insert(session_id.to_string(), Arc::new(Mutex::new(session)));

        info!(
            instance_id = %self.id,
            session_id = %session_id,
            profile = persona.family.profile_name(),
            "created browser session"
        );
        Ok(())
    }

    /// Navigate with humanized pacing and simulated reading; returns the
    /// resulting HTML.
    pub async fn navigate(&self, session_id: &str, url: &str) -> BrowserResult<String> {
        let session = self.session(session_id).await?;
        let mut session = session.lock().await;

        sleep(humanize::pre_navigation_delay()).await;

        timeout(self.operation_timeout, session.page.goto(url))
            .await
            .map_err(|_| BrowserError::Timeout {
                operation: "navigate",
                timeout_s: self.operation_timeout.as_secs(),
            })??;
        // Settle after the load event; tolerated on slow pages.
        let _ = timeout(Duration::from_secs(2), session.page.wait_for_navigation()).await;

        session.pages_visited += 1;
        session.touch(format!("navigate_to:{url}"));

        self.simulate_reading(&session.page).await;

        let html = timeout(self.operation_timeout, session.page.content())
            .await
            .map_err(|_| BrowserError::Timeout {
                operation: "page content",
                timeout_s: self.operation_timeout.as_secs(),
            })??;

        debug!(
            instance_id = %self.id,
            session_id = %session_id,
            url = %url,
            content_len = html.len(),
            "navigation completed"
        );
        Ok(html)
    }

    /// Fill form fields with human typing: per-keystroke delays, occasional
    /// corrected typos, and thinking pauses mid-field.
    pub async fn fill_form(
        &self,
        session_id: &str,
        fields: &[(String, String)],
    ) -> BrowserResult<()> {
        let session = self.session(session_id).await?;
        let mut session = session.lock().await;

        for (selector, value) in fields {
            let element = timeout(self.operation_timeout, session.page.find_element(selector))
                .await
                .map_err(|_| BrowserError::Timeout {
                    operation: "find element",
                    timeout_s: self.operation_timeout.as_secs(),
                })??;

            element.focus().await?;
            sleep(humanize::focus_settle()).await;

            // Clear any existing content before typing.
            let clear = format!(
                "(function() {{ var el = document.querySelector({}); if (el) {{ el.value = ''; }} }})()",
                json!(selector)
            );
            session.page.evaluate(clear.as_str()).await?;

            for ch in value.chars() {
                if humanize::should_typo() {
                    element.type_str(&humanize::typo_char().to_string()).await?;
                    sleep(humanize::correction_pause()).await;
                    element.press_key("Backspace").await?;
                    sleep(humanize::correction_pause()).await;
                }
                element.type_str(&ch.to_string()).await?;
                sleep(humanize::keystroke_delay()).await;
                if humanize::should_pause_mid_field() {
                    sleep(humanize::mid_field_pause()).await;
                }
            }

            sleep(humanize::post_field_delay()).await;
            session.touch(format!("fill_form:{selector}"));
        }

        debug!(
            instance_id = %self.id,
            session_id = %session_id,
            fields = fields.len(),
            "form filled"
        );
        Ok(())
    }

    /// Click an element with human imprecision: scroll into view, pause,
    /// then press/release with a small random offset from the click point.
    pub async fn click(&self, session_id: &str, selector: &str) -> BrowserResult<()> {
        let session = self.session(session_id).await?;
        let mut session = session.lock().await;

        let element = timeout(self.operation_timeout, session.page.find_element(selector))
            .await
            .map_err(|_| BrowserError::Timeout {
                operation: "find element",
                timeout_s: self.operation_timeout.as_secs(),
            })??;

        element.scroll_into_view().await?;
        sleep(humanize::click_decision_delay()).await;

        let point = element.clickable_point().await?;
        let (dx, dy) = humanize::click_offset();
        let x = point.x + dx as f64;
        let y = point.y + dy as f64;

        for event_type in [
            DispatchMouseEventType::MousePressed,
            DispatchMouseEventType::MouseReleased,
        ] {
            let params = DispatchMouseEventParams::builder()
                .r#type(event_type)
                .x(x)
                .y(y)
                .button(MouseButton::Left)
                .click_count(1)
                .build()
                .map_err(BrowserError::Cdp)?;
            session.page.execute(params).await?;
        }

        sleep(humanize::post_click_delay()).await;
        session.touch(format!("click:{selector}"));

        debug!(instance_id = %self.id, session_id = %session_id, selector, "clicked element");
        Ok(())
    }

    /// Evaluate JavaScript with complexity-scaled pre/post delays.
    pub async fn evaluate(
        &self,
        session_id: &str,
        script: &str,
        complexity: Complexity,
    ) -> BrowserResult<serde_json::Value> {
        let session = self.session(session_id).await?;
        let mut session = session.lock().await;

        sleep(humanize::evaluate_pre_delay(complexity)).await;

        let result = timeout(self.operation_timeout, session.page.evaluate(script))
            .await
            .map_err(|_| BrowserError::Timeout {
                operation: "evaluate",
                timeout_s: self.operation_timeout.as_secs(),
            })??;
        let value: serde_json::Value = result
            .into_value()
            .map_err(|e| BrowserError::Cdp(e.to_string()))?;

        sleep(humanize::evaluate_post_delay(complexity)).await;
        session.touch(format!("js_execute:{complexity:?}"));
        Ok(value)
    }

    /// Wander the cursor along a Bézier path between two random viewport
    /// points, dispatching real mouse-move events.
    pub async fn simulate_mouse_movement(&self, session_id: &str) -> BrowserResult<()> {
        let session = self.session(session_id).await?;
        let session = session.lock().await;

        let path = mouse::random_wander(
            f64::from(session.persona.viewport.width),
            f64::from(session.persona.viewport.height),
        );

        for (point, delay_ms) in path.points.iter().zip(&path.delays_ms) {
            let params = DispatchMouseEventParams::builder()
                .r#type(DispatchMouseEventType::MouseMoved)
                .x(point.x)
                .y(point.y)
                .build()
                .map_err(BrowserError::Cdp)?;
            session.page.execute(params).await?;
            sleep(Duration::from_millis(*delay_ms)).await;
        }
        Ok(())
    }

    /// Orchestrate the CAPTCHA pipeline for a session with human pacing
    /// between attempts.
    pub async fn handle_challenge(
        &self,
        session_id: &str,
        captcha: &CaptchaHandler,
        variant: Option<ChallengeVariant>,
        max_attempts: u32,
    ) -> BrowserResult<ChallengeOutcome> {
        let session = self.session(session_id).await?;
        let started = epoch_now();
        let mut last_error = None;

        for attempt in 0..max_attempts {
            sleep(humanize::challenge_pre_attempt(attempt)).await;

            // Widget-style challenges watch for cursor activity.
            if let Err(e) = self.simulate_mouse_movement(session_id).await {
                debug!(session_id, error = %e, "mouse simulation skipped");
            }

            let (html, url) = {
                let session = session.lock().await;
                let html = timeout(self.operation_timeout, session.page.content())
                    .await
                    .map_err(|_| BrowserError::Timeout {
                        operation: "page content",
                        timeout_s: self.operation_timeout.as_secs(),
                    })??;
                let url = session
                    .page
                    .url()
                    .await?
                    .unwrap_or_else(|| "about:blank".to_string());
                (html, url)
            };

            let (passable, challenge) = captcha.handle_response(&html, &url, session_id).await;
            if passable {
                let label = variant
                    .or(challenge.as_ref().map(|c| c.variant))
                    .map(|v| v.as_str())
                    .unwrap_or("none");
                session.lock().await.touch(format!("challenge_handled:{label}"));
                return Ok(ChallengeOutcome {
                    success: true,
                    attempts: attempt + 1,
                    solve_time: epoch_now() - started,
                    error: None,
                });
            }

            last_error = challenge.map(|c| format!("{}: {:?}", c.variant.as_str(), c.status));
            if attempt + 1 < max_attempts {
                sleep(humanize::challenge_between_attempts(attempt)).await;
            }
        }

        Ok(ChallengeOutcome {
            success: false,
            attempts: max_attempts,
            solve_time: epoch_now() - started,
            error: last_error,
        })
    }

    /// Extract the session's full persisted form, cookies included.
    pub async fn snapshot_session(&self, session_id: &str) -> BrowserResult<PersistentSession> {
        let session = self.session(session_id).await?;
        let session = session.lock().await;

        let cookies = jar::extract(&session.page).await?;
        let (local_storage, session_storage) = self.read_web_storage(&session.page).await;

        Ok(PersistentSession {
            session_id: session.session_id.clone(),
            profile_name: session.persona.family.profile_name().to_string(),
            user_agent: session.persona.user_agent.clone(),
            start_time: session.start_time,
            last_activity: session.last_activity,
            pages_visited: session.pages_visited,
            actions_performed: session.actions_performed.clone(),
            cookies,
            local_storage,
            session_storage,
            viewport_width: session.persona.viewport.width,
            viewport_height: session.persona.viewport.height,
            language: session.persona.locale.clone(),
            timezone: session.persona.timezone.clone(),
        })
    }

    /// Replay persisted state into a live session: install the prepared
    /// cookies and restore counters and the action log.
    pub async fn restore_session(
        &self,
        session_id: &str,
        persisted: &PersistentSession,
        prepared_cookies: &[CookieRecord],
    ) -> BrowserResult<()> {
        let session = self.session(session_id).await?;
        let mut session = session.lock().await;

        jar::install(&session.page, prepared_cookies).await?;
        session.start_time = persisted.start_time;
        session.pages_visited = persisted.pages_visited;
        session.actions_performed = persisted.actions_performed.clone();
        session.last_activity = epoch_now();

        info!(
            instance_id = %self.id,
            session_id = %session_id,
            cookies = prepared_cookies.len(),
            pages_visited = session.pages_visited,
            "session state restored"
        );
        Ok(())
    }

    pub async fn has_session(&self, session_id: &str) -> bool {
        self.sessions.lock().await.contains_key(session_id)
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn session_snapshots(&self) -> Vec<SessionSnapshot> {
        let sessions: Vec<Arc<Mutex<BrowserSession>>> =
            self.sessions.lock().await.values().cloned().collect();
        let mut snapshots = Vec::with_capacity(sessions.len());
        for session in sessions {
            let s = session.lock().await;
            snapshots.push(SessionSnapshot {
                session_id: s.session_id.clone(),
                profile_name: s.persona.family.profile_name().to_string(),
                pages_visited: s.pages_visited,
                actions_count: s.actions_performed.len(),
                start_time: s.start_time,
                last_activity: s.last_activity,
            });
        }
        snapshots
    }

    /// Close one session, tearing down its page.
    pub async fn close_session(&self, session_id: &str) -> BrowserResult<()> {
        let removed = self.sessions.lock().await.remove(session_id);
        if let Some(session) = removed {
            let page = session.lock().await.page.clone();
            if let Err(e) = page.close().await {
                warn!(session_id = %session_id, error = %e, "error closing page");
            }
            debug!(instance_id = %self.id, session_id = %session_id, "session closed");
        }
        Ok(())
    }

    /// Close every session on this instance.
    pub async fn close_all_sessions(&self) {
        let drained: Vec<(String, Arc<Mutex<BrowserSession>>)> =
            self.sessions.lock().await.drain().collect();
        for (session_id, session) in drained {
            let page = session.lock().await.page.clone();
            if let Err(e) = page.close().await {
                warn!(session_id = %session_id, error = %e, "error closing page");
            }
        }
    }

    /// Drop sessions idle longer than `timeout`. Returns how many were
    /// purged.
    pub async fn purge_idle_sessions(&self, timeout: Duration) -> usize {
        let now = epoch_now();
        let mut expired = Vec::new();
        {
            let sessions = self.sessions.lock().await;
            for (id, session) in sessions.iter() {
                if let Ok(guard) = session.try_lock() {
                    if now - guard.last_activity > timeout.as_secs_f64() {
                        expired.push(id.clone());
                    }
                }
            }
        }
        for id in &expired {
            let _ = self.close_session(id).await;
        }
        if !expired.is_empty() {
            debug!(instance_id = %self.id, purged = expired.len(), "purged idle sessions");
        }
        expired.len()
    }

    /// Synthetic round-trip used by the health monitor: create and close a
    /// throwaway session.
    pub async fn probe(&self) -> BrowserResult<()> {
        let probe_id = format!("health-check-{}", Uuid::new_v4());
        self.create_session(&probe_id).await?;
        self.close_session(&probe_id).await
    }

    /// Restart the browser process: close all sessions, relaunch, zero the
    /// counters. The instance id is preserved.
    pub async fn restart(&self, config: &ClusterConfig) -> BrowserResult<()> {
        warn!(instance_id = %self.id, "restarting browser instance");
        self.close_all_sessions().await;

        let new_engine = Engine::launch(&self.id, config).await?;
        let old_engine = {
            let mut engine = self.engine.lock().await;
            std::mem::replace(&mut *engine, new_engine)
        };
        old_engine.shutdown().await;

        self.request_count.store(0, Ordering::Relaxed);
        self.error_count.store(0, Ordering::Relaxed);
        self.consecutive_failures.store(0, Ordering::Relaxed);

        info!(instance_id = %self.id, "browser instance restarted");
        Ok(())
    }

    /// Tear the instance down completely.
    pub async fn shutdown(&self) {
        self.close_all_sessions().await;
        {
            let mut engine = self.engine.lock().await;
            engine.handler_task.abort();
            if let Err(e) = engine.browser.close().await {
                warn!(instance_id = %self.id, error = %e, "error closing browser");
            }
        }
        info!(instance_id = %self.id, "browser instance shut down");
    }

    // ----- health accounting (driven by the cluster) -----

    pub fn mark_used(&self) {
        self.request_count.fetch_add(1, Ordering::Relaxed);
        self.touch_last_used();
    }

    pub fn mark_success(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
    }

    pub fn mark_failure(&self) {
        self.error_count.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn touch_last_used(&self) {
        let elapsed_ms = self.created_at.elapsed().as_millis() as u64;
        self.last_used_ms.store(elapsed_ms, Ordering::Relaxed);
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    /// An instance is healthy while it has fewer than three consecutive
    /// failures.
    pub fn is_healthy(&self) -> bool {
        self.consecutive_failures() < 3
    }

    /// Seconds since the instance last served a request.
    pub fn seconds_since_last_use(&self) -> f64 {
        let now_ms = self.created_at.elapsed().as_millis() as u64;
        let last_ms = self.last_used_ms.load(Ordering::Relaxed);
        (now_ms.saturating_sub(last_ms)) as f64 / 1000.0
    }

    /// Health score in [0, 1]:
    /// `0.7·success_rate + 0.2·(1 − 0.1·consecutive_failures) +
    /// 0.1·recency_bonus`, with the recency bonus decaying linearly to zero
    /// over 300 s since last use.
    pub fn health_score(&self) -> f64 {
        health_score(
            self.request_count.load(Ordering::Relaxed),
            self.error_count.load(Ordering::Relaxed),
            self.consecutive_failures(),
            self.seconds_since_last_use(),
        )
    }

    pub async fn snapshot(&self) -> InstanceSnapshot {
        InstanceSnapshot {
            instance_id: self.id.clone(),
            request_count: self.request_count.load(Ordering::Relaxed),
            error_count: self.error_count.load(Ordering::Relaxed),
            consecutive_failures: self.consecutive_failures(),
            health_score: self.health_score(),
            healthy: self.is_healthy(),
            session_count: self.session_count().await,
            uptime_s: self.created_at.elapsed().as_secs(),
        }
    }

    // ----- internals -----

    async fn session(&self, session_id: &str) -> BrowserResult<Arc<Mutex<BrowserSession>>> {
        self.sessions
            .lock()
            .await
            .get(session_id)
            .cloned()
            .ok_or_else(|| BrowserError::SessionNotFound(session_id.to_string()))
    }

    async fn apply_persona_overrides(&self, page: &Page, persona: &Persona) -> BrowserResult<()> {
        let user_agent = SetUserAgentOverrideParams::builder()
            .user_agent(persona.user_agent.clone())
            .platform(persona.platform.clone())
            .accept_language(persona.languages.join(","))
            .build()
            .map_err(BrowserError::Cdp)?;
        page.execute(user_agent).await?;

        let metrics = SetDeviceMetricsOverrideParams::builder()
            .width(i64::from(persona.viewport.width))
            .height(i64::from(persona.viewport.height))
            .device_scale_factor(persona.viewport.device_scale_factor)
            .mobile(false)
            .build()
            .map_err(BrowserError::Cdp)?;
        page.execute(metrics).await?;

        page.execute(SetTimezoneOverrideParams::new(persona.timezone.clone()))
            .await?;

        let locale = SetLocaleOverrideParams::builder()
            .locale(persona.locale.clone())
            .build();
        page.execute(locale).await?;

        let geolocation = SetGeolocationOverrideParams::builder()
            .latitude(persona.latitude)
            .longitude(persona.longitude)
            .accuracy(100.0)
            .build();
        page.execute(geolocation).await?;

        let headers: serde_json::Map<String, serde_json::Value> = persona
            .headers
            .iter()
            .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
            .collect();
        page.execute(SetExtraHttpHeadersParams::new(Headers::new(
            serde_json::Value::Object(headers),
        )))
        .await?;

        Ok(())
    }

    /// Simulated reading after a page load: a pause, sometimes a few wheel
    /// scrolls with their own pacing.
    async fn simulate_reading(&self, page: &Page) {
        if humanize::should_scroll() {
            for _ in 0..humanize::scroll_count() {
                let scroll = format!("window.scrollBy(0, {});", humanize::scroll_distance());
                if page.evaluate(scroll.as_str()).await.is_err() {
                    break;
                }
                sleep(humanize::inter_scroll_pause()).await;
            }
        }
        sleep(humanize::reading_pause()).await;
    }

    async fn read_web_storage(
        &self,
        page: &Page,
    ) -> (HashMap<String, String>, HashMap<String, String>) {
        let mut out = Vec::with_capacity(2);
        for storage in ["localStorage", "sessionStorage"] {
            let script = format!(
                "(function() {{ var o = {{}}; try {{ for (var i = 0; i < {storage}.length; i++) {{ var k = {storage}.key(i); o[k] = {storage}.getItem(k); }} }} catch (e) {{}} return o; }})()"
            );
            let map = match page.evaluate(script.as_str()).await {
                Ok(result) => result.into_value().unwrap_or_default(),
                Err(_) => HashMap::new(),
            };
            out.push(map);
        }
        let session_storage = out.pop().unwrap_or_default();
        let local_storage = out.pop().unwrap_or_default();
        (local_storage, session_storage)
    }
}

/// Health score formula shared with tests and the cluster.
pub(crate) fn health_score(
    requests: u64,
    errors: u64,
    consecutive_failures: u32,
    seconds_since_use: f64,
) -> f64 {
    let success_rate = if requests == 0 {
        1.0
    } else {
        (1.0 - errors as f64 / requests.max(1) as f64).max(0.0)
    };
    let failure_penalty = (1.0 - 0.1 * f64::from(consecutive_failures)).max(0.0);
    let recency_bonus = (1.0 - seconds_since_use / 300.0).max(0.0);

    (0.7 * success_rate + 0.2 * failure_penalty + 0.1 * recency_bonus).clamp(0.0, 1.0)
}
