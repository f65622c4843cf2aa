//! Cluster and instance configuration

use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the browser cluster and its instances.
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    /// Upper bound on concurrent browser processes.
    pub max_instances: usize,
    /// Per-operation browser timeout.
    pub operation_timeout: Duration,
    /// Interval between background health-monitor sweeps.
    pub health_check_interval: Duration,
    /// Instances used more recently than this are skipped by the monitor.
    pub recent_use_threshold: Duration,
    /// Consecutive probe failures that trigger an instance restart.
    pub restart_failure_threshold: u32,
    /// Idle threshold after which a live session is purged.
    pub session_timeout: Duration,
    /// Optional custom base directory for browser profile temp dirs.
    ///
    /// When `None`, the system temp directory is used. Each browser process
    /// gets its own unique directory either way; Chrome's SingletonLock
    /// forbids sharing a profile between processes.
    pub profile_base_dir: Option<PathBuf>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            max_instances: 5,
            operation_timeout: Duration::from_secs(30),
            health_check_interval: Duration::from_secs(60),
            recent_use_threshold: Duration::from_secs(30),
            restart_failure_threshold: 2,
            session_timeout: Duration::from_secs(1800),
            profile_base_dir: None,
        }
    }
}

impl ClusterConfig {
    /// Number of instances created during warm-up.
    pub fn warmup_instances(&self) -> usize {
        self.max_instances.min(3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = ClusterConfig::default();
        assert_eq!(config.max_instances, 5);
        assert_eq!(config.operation_timeout, Duration::from_secs(30));
        assert_eq!(config.health_check_interval, Duration::from_secs(60));
        assert_eq!(config.restart_failure_threshold, 2);
    }

    #[test]
    fn warmup_is_capped_at_three() {
        let mut config = ClusterConfig::default();
        assert_eq!(config.warmup_instances(), 3);
        config.max_instances = 2;
        assert_eq!(config.warmup_instances(), 2);
        config.max_instances = 10;
        assert_eq!(config.warmup_instances(), 3);
    }
}
