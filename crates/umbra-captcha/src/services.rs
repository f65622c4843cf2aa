//! External CAPTCHA-solving services
//!
//! Vendor adapters behind one trait so the solver stays agnostic of
//! vendor-specific wire details. Each service polls the vendor until a
//! solution token appears or its configured timeout elapses.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tracing::debug;

use crate::challenge::{CaptchaChallenge, ChallengeVariant};
use crate::error::{CaptchaError, CaptchaResult};

/// Credentials and pacing for one configured external service.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ExternalServiceConfig {
    /// Service identifier: `2captcha`, `anticaptcha`, `capsolver`.
    pub provider: String,
    pub api_key: String,
    /// Lower value is tried first.
    #[serde(default)]
    pub priority: u8,
    /// Overall per-solve deadline, seconds. Should sit at or above the
    /// service's mean solve time plus two standard deviations.
    #[serde(default = "default_timeout_s")]
    pub timeout_s: u64,
    /// Poll interval while waiting for the vendor, seconds.
    #[serde(default = "default_poll_s")]
    pub poll_interval_s: u64,
}

fn default_timeout_s() -> u64 {
    120
}

fn default_poll_s() -> u64 {
    5
}

impl ExternalServiceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_s)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_s)
    }
}

/// Shared interface implemented by solving vendors.
#[async_trait]
pub trait ExternalSolver: Send + Sync {
    fn name(&self) -> &str;

    /// Whether this vendor can handle the variant.
    fn supports(&self, variant: ChallengeVariant) -> bool;

    /// Try to produce a solution token. `Ok(None)` means the vendor declined
    /// without error (e.g. missing site key).
    async fn solve(&self, challenge: &CaptchaChallenge) -> CaptchaResult<Option<String>>;
}

fn token_variants() -> &'static [ChallengeVariant] {
    &[
        ChallengeVariant::RecaptchaV2,
        ChallengeVariant::HCaptcha,
        ChallengeVariant::FunCaptcha,
    ]
}

/// 2Captcha: form-encoded submit to `in.php`, then poll `res.php` until the
/// answer is ready.
pub struct TwoCaptchaService {
    config: ExternalServiceConfig,
    client: reqwest::Client,
}

impl TwoCaptchaService {
    pub fn new(config: ExternalServiceConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn method_for(variant: ChallengeVariant) -> &'static str {
        match variant {
            ChallengeVariant::HCaptcha => "hcaptcha",
            ChallengeVariant::FunCaptcha => "funcaptcha",
            _ => "userrecaptcha",
        }
    }
}

#[async_trait]
impl ExternalSolver for TwoCaptchaService {
    fn name(&self) -> &str {
        "2captcha"
    }

    fn supports(&self, variant: ChallengeVariant) -> bool {
        token_variants().contains(&variant)
    }

    async fn solve(&self, challenge: &CaptchaChallenge) -> CaptchaResult<Option<String>> {
        let Some(site_key) = challenge.site_key.as_deref() else {
            return Ok(None);
        };

        let submit: Value = self
            .client
            .post("https://2captcha.com/in.php")
            .form(&[
                ("key", self.config.api_key.as_str()),
                ("method", Self::method_for(challenge.variant)),
                ("googlekey", site_key),
                ("sitekey", site_key),
                ("pageurl", challenge.page_url.as_str()),
                ("json", "1"),
            ])
            .send()
            .await?
            .json()
            .await?;

        if submit["status"].as_i64() != Some(1) {
            return Err(CaptchaError::Service {
                service: self.name().to_string(),
                detail: submit["request"].as_str().unwrap_or("submit rejected").to_string(),
            });
        }
        let task_id = submit["request"].as_str().unwrap_or_default().to_string();
        debug!(service = self.name(), task_id = %task_id, "captcha task submitted");

        let deadline = Instant::now() + self.config.timeout();
        loop {
            tokio::time::sleep(self.config.poll_interval()).await;
            if Instant::now() >= deadline {
                return Err(CaptchaError::ServiceTimeout(self.name().to_string()));
            }

            let poll: Value = self
                .client
                .get("https://2captcha.com/res.php")
                .query(&[
                    ("key", self.config.api_key.as_str()),
                    ("action", "get"),
                    ("id", task_id.as_str()),
                    ("json", "1"),
                ])
                .send()
                .await?
                .json()
                .await?;

            if poll["status"].as_i64() == Some(1) {
                return Ok(poll["request"].as_str().map(|s| s.to_string()));
            }
            if poll["request"].as_str() != Some("CAPCHA_NOT_READY") {
                return Err(CaptchaError::Service {
                    service: self.name().to_string(),
                    detail: poll["request"].as_str().unwrap_or("poll rejected").to_string(),
                });
            }
        }
    }
}

/// Anti-Captcha: JSON `createTask` / `getTaskResult` API.
pub struct AntiCaptchaService {
    config: ExternalServiceConfig,
    client: reqwest::Client,
}

impl AntiCaptchaService {
    pub fn new(config: ExternalServiceConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn task_type(variant: ChallengeVariant) -> &'static str {
        match variant {
            ChallengeVariant::HCaptcha => "HCaptchaTaskProxyless",
            ChallengeVariant::FunCaptcha => "FunCaptchaTaskProxyless",
            _ => "RecaptchaV2TaskProxyless",
        }
    }
}

#[async_trait]
impl ExternalSolver for AntiCaptchaService {
    fn name(&self) -> &str {
        "anticaptcha"
    }

    fn supports(&self, variant: ChallengeVariant) -> bool {
        token_variants().contains(&variant)
    }

    async fn solve(&self, challenge: &CaptchaChallenge) -> CaptchaResult<Option<String>> {
        let Some(site_key) = challenge.site_key.as_deref() else {
            return Ok(None);
        };

        let created: Value = self
            .client
            .post("https://api.anti-captcha.com/createTask")
            .json(&json!({
                "clientKey": self.config.api_key,
                "task": {
                    "type": Self::task_type(challenge.variant),
                    "websiteURL": challenge.page_url,
                    "websiteKey": site_key,
                }
            }))
            .send()
            .await?
            .json()
            .await?;

        if created["errorId"].as_i64().unwrap_or(1) != 0 {
            return Err(CaptchaError::Service {
                service: self.name().to_string(),
                detail: created["errorDescription"]
                    .as_str()
                    .unwrap_or("createTask rejected")
                    .to_string(),
            });
        }
        let task_id = created["taskId"].clone();

        let deadline = Instant::now() + self.config.timeout();
        loop {
            tokio::time::sleep(self.config.poll_interval()).await;
            if Instant::now() >= deadline {
                return Err(CaptchaError::ServiceTimeout(self.name().to_string()));
            }

            let result: Value = self
                .client
                .post("https://api.anti-captcha.com/getTaskResult")
                .json(&json!({ "clientKey": self.config.api_key, "taskId": task_id }))
                .send()
                .await?
                .json()
                .await?;

            if result["errorId"].as_i64().unwrap_or(1) != 0 {
                return Err(CaptchaError::Service {
                    service: self.name().to_string(),
                    detail: result["errorDescription"]
                        .as_str()
                        .unwrap_or("getTaskResult rejected")
                        .to_string(),
                });
            }
            if result["status"].as_str() == Some("ready") {
                return Ok(result["solution"]["gRecaptchaResponse"]
                    .as_str()
                    .or_else(|| result["solution"]["token"].as_str())
                    .map(|s| s.to_string()));
            }
        }
    }
}

/// CapSolver: JSON `createTask` / `getTaskResult` API.
pub struct CapSolverService {
    config: ExternalServiceConfig,
    client: reqwest::Client,
}

impl CapSolverService {
    pub fn new(config: ExternalServiceConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn task_type(variant: ChallengeVariant) -> &'static str {
        match variant {
            ChallengeVariant::HCaptcha => "HCaptchaTaskProxyLess",
            ChallengeVariant::FunCaptcha => "FunCaptchaTaskProxyLess",
            _ => "ReCaptchaV2TaskProxyLess",
        }
    }
}

#[async_trait]
impl ExternalSolver for CapSolverService {
    fn name(&self) -> &str {
        "capsolver"
    }

    fn supports(&self, variant: ChallengeVariant) -> bool {
        token_variants().contains(&variant)
    }

    async fn solve(&self, challenge: &CaptchaChallenge) -> CaptchaResult<Option<String>> {
        let Some(site_key) = challenge.site_key.as_deref() else {
            return Ok(None);
        };

        let created: Value = self
            .client
            .post("https://api.capsolver.com/createTask")
            .json(&json!({
                "clientKey": self.config.api_key,
                "task": {
                    "type": Self::task_type(challenge.variant),
                    "websiteURL": challenge.page_url,
                    "websiteKey": site_key,
                }
            }))
            .send()
            .await?
            .json()
            .await?;

        if created["errorId"].as_i64().unwrap_or(1) != 0 {
            return Err(CaptchaError::Service {
                service: self.name().to_string(),
                detail: created["errorDescription"]
                    .as_str()
                    .unwrap_or("createTask rejected")
                    .to_string(),
            });
        }
        let task_id = created["taskId"].clone();

        let deadline = Instant::now() + self.config.timeout();
        loop {
            tokio::time::sleep(self.config.poll_interval()).await;
            if Instant::now() >= deadline {
                return Err(CaptchaError::ServiceTimeout(self.name().to_string()));
            }

            let result: Value = self
                .client
                .post("https://api.capsolver.com/getTaskResult")
                .json(&json!({ "clientKey": self.config.api_key, "taskId": task_id }))
                .send()
                .await?
                .json()
                .await?;

            if result["errorId"].as_i64().unwrap_or(1) != 0 {
                return Err(CaptchaError::Service {
                    service: self.name().to_string(),
                    detail: result["errorDescription"]
                        .as_str()
                        .unwrap_or("getTaskResult rejected")
                        .to_string(),
                });
            }
            if result["status"].as_str() == Some("ready") {
                return Ok(result["solution"]["gRecaptchaResponse"]
                    .as_str()
                    .or_else(|| result["solution"]["token"].as_str())
                    .map(|s| s.to_string()));
            }
        }
    }
}

/// Build a service from its configuration entry. Unknown providers are a
/// configuration error, caught at initialization.
pub fn build_service(
    config: &ExternalServiceConfig,
) -> CaptchaResult<std::sync::Arc<dyn ExternalSolver>> {
    match config.provider.as_str() {
        "2captcha" => Ok(std::sync::Arc::new(TwoCaptchaService::new(config.clone()))),
        "anticaptcha" => Ok(std::sync::Arc::new(AntiCaptchaService::new(config.clone()))),
        "capsolver" => Ok(std::sync::Arc::new(CapSolverService::new(config.clone()))),
        other => Err(CaptchaError::Configuration(format!(
            "unknown solver provider: {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(provider: &str) -> ExternalServiceConfig {
        ExternalServiceConfig {
            provider: provider.to_string(),
            api_key: "k".to_string(),
            priority: 0,
            timeout_s: 120,
            poll_interval_s: 5,
        }
    }

    #[test]
    fn build_known_providers() {
        for provider in ["2captcha", "anticaptcha", "capsolver"] {
            let service = build_service(&config(provider)).expect(provider);
            assert_eq!(service.name(), provider);
            assert!(service.supports(ChallengeVariant::RecaptchaV2));
            assert!(service.supports(ChallengeVariant::HCaptcha));
            assert!(!service.supports(ChallengeVariant::Text));
            assert!(!service.supports(ChallengeVariant::Cloudflare));
        }
    }

    #[test]
    fn unknown_provider_is_configuration_error() {
        assert!(matches!(
            build_service(&config("deathbycaptcha")),
            Err(CaptchaError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn missing_site_key_declines_without_error() {
        let service = TwoCaptchaService::new(config("2captcha"));
        let challenge = CaptchaChallenge::new(ChallengeVariant::RecaptchaV2, 0.9, "https://ex.com");
        let result = service.solve(&challenge).await.unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn config_defaults_deserialize() {
        let parsed: ExternalServiceConfig =
            serde_json::from_str(r#"{"provider": "2captcha", "api_key": "abc"}"#).unwrap();
        assert_eq!(parsed.timeout_s, 120);
        assert_eq!(parsed.poll_interval_s, 5);
        assert_eq!(parsed.priority, 0);
    }
}
