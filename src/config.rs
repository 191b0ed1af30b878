//! Runtime configuration of the sync engine.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use serde_with::{DurationMilliSeconds, serde_as};
use tracing::{info, warn};

use crate::services::{backoff::Backoff, sync_service::SyncPolicy};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/sync.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "COURTSIDE_SYNC_CONFIG_PATH";
/// Smallest period accepted for the sweep and probe timers.
pub const MIN_INTERVAL: Duration = Duration::from_millis(10);

/// Immutable runtime configuration shared across the application.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Maximum number of games kept on the device.
    pub library_capacity: usize,
    /// Period of the sweep over games with pending actions.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "sweep_interval_ms")]
    pub sweep_interval: Duration,
    /// Bound on every network call.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "network_timeout_ms")]
    pub network_timeout: Duration,
    /// First retry delay.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "backoff_base_ms")]
    pub backoff_base: Duration,
    /// Retry delay ceiling.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "backoff_max_ms")]
    pub backoff_max: Duration,
    /// Maximum random reduction applied to each delay.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "backoff_jitter_ms")]
    pub backoff_jitter: Duration,
    /// Failed attempts after which a retryable error becomes fatal.
    pub max_push_attempts: u32,
    /// Endpoint of the reachability probe; the cloud health check is used when unset.
    pub probe_url: Option<String>,
    /// Period of the reachability probe.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "probe_interval_ms")]
    pub probe_interval: Duration,
    /// Consecutive probe failures that force offline mode.
    pub probe_failure_threshold: u32,
    /// Directory of the on-device key-value storage.
    pub data_dir: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            library_capacity: 20,
            sweep_interval: Duration::from_millis(5_000),
            network_timeout: Duration::from_millis(8_000),
            backoff_base: Duration::from_millis(1_000),
            backoff_max: Duration::from_millis(30_000),
            backoff_jitter: Duration::from_millis(500),
            max_push_attempts: 8,
            probe_url: None,
            probe_interval: Duration::from_millis(10_000),
            probe_failure_threshold: 3,
            data_dir: PathBuf::from("data"),
        }
    }
}

impl AppConfig {
    /// Load the configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match Self::parse(&contents) {
                Ok(config) => {
                    info!(
                        path = %path.display(),
                        capacity = config.library_capacity,
                        "loaded sync configuration"
                    );
                    config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }

    /// Parse a JSON document, lifting timer periods to [`MIN_INTERVAL`].
    fn parse(contents: &str) -> serde_json::Result<Self> {
        let mut config: Self = serde_json::from_str(contents)?;
        for (name, value) in [
            ("sweep_interval_ms", &mut config.sweep_interval),
            ("probe_interval_ms", &mut config.probe_interval),
            ("network_timeout_ms", &mut config.network_timeout),
        ] {
            if *value < MIN_INTERVAL {
                warn!(
                    field = name,
                    min_ms = MIN_INTERVAL.as_millis() as u64,
                    "interval too small; clamping"
                );
                *value = MIN_INTERVAL;
            }
        }
        Ok(config)
    }

    /// Orchestrator timing derived from this configuration.
    pub fn sync_policy(&self) -> SyncPolicy {
        SyncPolicy {
            sweep_interval: self.sweep_interval.max(MIN_INTERVAL),
            network_timeout: self.network_timeout.max(MIN_INTERVAL),
            backoff: Backoff::new(self.backoff_base, self.backoff_max, self.backoff_jitter),
            max_push_attempts: self.max_push_attempts.max(1),
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_keep_their_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{"library_capacity": 5, "backoff_max_ms": 2000}"#).unwrap();
        assert_eq!(config.library_capacity, 5);
        assert_eq!(config.backoff_max, Duration::from_secs(2));
        assert_eq!(config.sweep_interval, Duration::from_secs(5));
        assert_eq!(config.probe_url, None);
    }

    #[test]
    fn policy_mirrors_the_configuration() {
        let config = AppConfig {
            max_push_attempts: 0,
            ..AppConfig::default()
        };
        let policy = config.sync_policy();
        assert_eq!(policy.max_push_attempts, 1);
        assert_eq!(policy.network_timeout, Duration::from_secs(8));
        assert_eq!(policy.backoff.ceiling(10), Duration::from_secs(30));
    }

    #[test]
    fn zero_intervals_are_clamped() {
        let config = AppConfig::parse(
            r#"{"sweep_interval_ms": 0, "probe_interval_ms": 0, "network_timeout_ms": 0}"#,
        )
        .unwrap();
        assert_eq!(config.sweep_interval, MIN_INTERVAL);
        assert_eq!(config.probe_interval, MIN_INTERVAL);
        assert_eq!(config.network_timeout, MIN_INTERVAL);

        let built = AppConfig {
            sweep_interval: Duration::ZERO,
            ..AppConfig::default()
        };
        assert_eq!(built.sync_policy().sweep_interval, MIN_INTERVAL);
    }
}
