//! Engine configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use umbra_browser::ClusterConfig;
use umbra_captcha::{ExternalServiceConfig, SolverConfig};
use umbra_stealth::PersonaFamily;

use crate::error::{EngineError, EngineResult};
use crate::governor::GovernorConfig;

/// CAPTCHA-solving settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CaptchaSettings {
    /// Master switch for solving (detection always runs).
    #[serde(default)]
    pub enabled: bool,
    /// External solver credentials, tried in priority order.
    #[serde(default)]
    pub external_services: Vec<ExternalServiceConfig>,
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Upper bound on concurrent browser processes.
    pub max_instances: usize,
    /// Base token rate for the governor.
    pub requests_per_minute: u32,
    /// Burst tokens per minute.
    pub burst_allowance: u32,
    /// Per-operation browser timeout, seconds.
    pub timeout_s: u64,
    /// Idle-session purge threshold, seconds.
    pub session_timeout_s: u64,
    /// Root for on-disk session files; sessions live in a `sessions/`
    /// subdirectory.
    pub cache_dir: PathBuf,
    pub captcha: CaptchaSettings,
    /// Persona pools the registry draws from.
    pub persona_families: Vec<PersonaFamily>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_instances: 5,
            requests_per_minute: 10,
            burst_allowance: 20,
            timeout_s: 30,
            session_timeout_s: 1800,
            cache_dir: std::env::temp_dir().join("umbra"),
            captcha: CaptchaSettings::default(),
            persona_families: PersonaFamily::all(),
        }
    }
}

impl EngineConfig {
    /// Validate at initialization; configuration errors are fatal.
    pub fn validate(&self) -> EngineResult<()> {
        if self.max_instances == 0 {
            return Err(EngineError::configuration("max_instances must be at least 1"));
        }
        if self.requests_per_minute == 0 {
            return Err(EngineError::configuration(
                "requests_per_minute must be at least 1",
            ));
        }
        if self.persona_families.is_empty() {
            return Err(EngineError::configuration(
                "at least one persona family is required",
            ));
        }
        Ok(())
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.cache_dir.join("sessions")
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_s)
    }

    pub fn cluster_config(&self) -> ClusterConfig {
        ClusterConfig {
            max_instances: self.max_instances,
            operation_timeout: Duration::from_secs(self.timeout_s),
            session_timeout: self.session_timeout(),
            ..ClusterConfig::default()
        }
    }

    pub fn governor_config(&self) -> GovernorConfig {
        GovernorConfig {
            requests_per_minute: self.requests_per_minute,
            burst_allowance: self.burst_allowance,
        }
    }

    pub fn solver_config(&self) -> SolverConfig {
        SolverConfig {
            external_enabled: self.captcha.enabled,
            ..SolverConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = EngineConfig::default();
        assert_eq!(config.max_instances, 5);
        assert_eq!(config.requests_per_minute, 10);
        assert_eq!(config.burst_allowance, 20);
        assert_eq!(config.timeout_s, 30);
        assert_eq!(config.session_timeout_s, 1800);
        assert!(!config.captcha.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_instances_is_a_configuration_error() {
        let config = EngineConfig {
            max_instances: 0,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert_eq!(err.kind, crate::ErrorKind::Configuration);
    }

    #[test]
    fn config_round_trips_through_json() {
        let config = EngineConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: EngineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.max_instances, config.max_instances);
        assert_eq!(parsed.persona_families.len(), config.persona_families.len());
    }

    #[test]
    fn derived_configs_inherit_values() {
        let config = EngineConfig {
            max_instances: 7,
            timeout_s: 12,
            ..Default::default()
        };
        let cluster = config.cluster_config();
        assert_eq!(cluster.max_instances, 7);
        assert_eq!(cluster.operation_timeout, Duration::from_secs(12));
        assert!(config.sessions_dir().ends_with("sessions"));
    }
}
