//! Runtime configuration for the cluster controller.

use std::env;
use std::time::Duration;

/// Tunables for the controller shell and its collaborators.
///
/// Values are read once at startup; `from_env` overlays `ARMADA_*` environment
/// variables on the defaults so deployments can tune the controller without a
/// config file.
#[derive(Clone, Debug)]
pub struct ControllerConfig {
    /// Number of concurrent reconcile workers.
    pub workers: usize,
    /// Interval at which cached clusters are re-delivered to the update
    /// handler. Unchanged objects are filtered out before enqueueing.
    pub resync_period: Duration,
    /// Finalizer token owned by this controller.
    pub finalizer_token: String,
    /// Interval between health probes for a provisioned cluster.
    pub health_check_interval: Duration,
    /// Token-bucket refill rate for control-plane requests.
    pub client_qps: f32,
    /// Token-bucket burst size for control-plane requests.
    pub client_burst: u32,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            resync_period: Duration::from_secs(30 * 60),
            finalizer_token: "platform.armada.dev/cluster".to_string(),
            health_check_interval: Duration::from_secs(5 * 60),
            client_qps: 20.0,
            client_burst: 30,
        }
    }
}

impl ControllerConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(workers) = parse_env("ARMADA_WORKERS") {
            config.workers = workers;
        }
        if let Some(secs) = parse_env("ARMADA_RESYNC_SECONDS") {
            config.resync_period = Duration::from_secs(secs);
        }
        if let Ok(token) = env::var("ARMADA_FINALIZER") {
            if !token.is_empty() {
                config.finalizer_token = token;
            }
        }
        if let Some(secs) = parse_env("ARMADA_HEALTH_CHECK_SECONDS") {
            config.health_check_interval = Duration::from_secs(secs);
        }
        if let Some(qps) = parse_env("ARMADA_CLIENT_QPS") {
            config.client_qps = qps;
        }
        if let Some(burst) = parse_env("ARMADA_CLIENT_BURST") {
            config.client_burst = burst;
        }
        config
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|raw| raw.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = ControllerConfig::default();
        assert!(config.workers > 0);
        assert_eq!(config.health_check_interval, Duration::from_secs(300));
        assert!(config.finalizer_token.contains('/'));
    }
}
