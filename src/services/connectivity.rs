//! Connectivity tracking: the platform online/offline signal combined with a
//! periodic reachability probe.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use futures::future::BoxFuture;
use reqwest::Client;
use serde::Serialize;
use thiserror::Error;
use tokio::{
    sync::watch,
    time::{self, MissedTickBehavior},
};
use tracing::{debug, info, warn};

use crate::{config::MIN_INTERVAL, dao::cloud_store::CloudStore};

/// Failure of a single reachability probe.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// No answer within the probe timeout.
    #[error("probe timed out")]
    Timeout,
    /// The endpoint answered with an error or could not be reached.
    #[error("probe failed: {0}")]
    Failed(String),
}

/// Lightweight request proving that the network actually works.
pub trait ReachabilityProbe: Send + Sync {
    /// Run one probe and report its round-trip time.
    fn probe(&self) -> BoxFuture<'static, Result<Duration, ProbeError>>;
}

/// Small GET against a fixed endpoint.
#[derive(Clone)]
pub struct HttpProbe {
    client: Client,
    url: Arc<str>,
}

impl HttpProbe {
    /// Probe `url`, giving up after `timeout`.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: Arc::from(url.into()),
        })
    }
}

impl ReachabilityProbe for HttpProbe {
    fn probe(&self) -> BoxFuture<'static, Result<Duration, ProbeError>> {
        let client = self.client.clone();
        let url = self.url.clone();
        Box::pin(async move {
            let started = Instant::now();
            let response = client.head(url.as_ref()).send().await.map_err(|err| {
                if err.is_timeout() {
                    ProbeError::Timeout
                } else {
                    ProbeError::Failed(err.to_string())
                }
            })?;
            if response.status().is_server_error() {
                return Err(ProbeError::Failed(format!("status {}", response.status())));
            }
            Ok(started.elapsed())
        })
    }
}

/// Probe that asks the cloud store for its health.
#[derive(Clone)]
pub struct CloudHealthProbe {
    cloud: Arc<dyn CloudStore>,
}

impl CloudHealthProbe {
    /// Probe through `cloud`.
    pub fn new(cloud: Arc<dyn CloudStore>) -> Self {
        Self { cloud }
    }
}

impl ReachabilityProbe for CloudHealthProbe {
    fn probe(&self) -> BoxFuture<'static, Result<Duration, ProbeError>> {
        let check = self.cloud.health_check();
        Box::pin(async move {
            let started = Instant::now();
            check
                .await
                .map_err(|err| ProbeError::Failed(err.to_string()))?;
            Ok(started.elapsed())
        })
    }
}

/// Current view of the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectivitySnapshot {
    /// What the platform reports.
    pub platform_online: bool,
    /// False once the probe failed `threshold` times in a row.
    pub reachable: bool,
    /// Probe failures since the last success.
    pub consecutive_failures: u32,
    /// Round-trip time of the last successful probe.
    pub last_latency_ms: Option<u64>,
}

impl ConnectivitySnapshot {
    /// Whether pushes may be attempted.
    pub fn online(&self) -> bool {
        self.platform_online && self.reachable
    }
}

/// Shared connectivity state; changes are observable through [`Connectivity::subscribe`].
pub struct Connectivity {
    threshold: u32,
    state: watch::Sender<ConnectivitySnapshot>,
}

impl Connectivity {
    /// Start online, reverting to offline after `threshold` consecutive probe failures.
    pub fn new(threshold: u32) -> Self {
        let (state, _rx) = watch::channel(ConnectivitySnapshot {
            platform_online: true,
            reachable: true,
            consecutive_failures: 0,
            last_latency_ms: None,
        });
        Self {
            threshold: threshold.max(1),
            state,
        }
    }

    /// Feed the platform online/offline signal.
    pub fn set_platform_online(&self, online: bool) {
        self.state.send_if_modified(|snapshot| {
            if snapshot.platform_online == online {
                return false;
            }
            snapshot.platform_online = online;
            info!(online, "platform connectivity changed");
            true
        });
    }

    /// Record a successful probe.
    pub fn record_probe_success(&self, latency: Duration) {
        self.state.send_if_modified(|snapshot| {
            let regained = !snapshot.reachable;
            snapshot.reachable = true;
            snapshot.consecutive_failures = 0;
            snapshot.last_latency_ms = Some(latency.as_millis() as u64);
            if regained {
                info!(latency_ms = latency.as_millis() as u64, "network reachable again");
            }
            regained
        });
    }

    /// Record a failed probe; reaching the threshold marks the network unreachable.
    pub fn record_probe_failure(&self) {
        let threshold = self.threshold;
        self.state.send_if_modified(|snapshot| {
            snapshot.consecutive_failures = snapshot.consecutive_failures.saturating_add(1);
            if snapshot.reachable && snapshot.consecutive_failures >= threshold {
                snapshot.reachable = false;
                warn!(
                    failures = snapshot.consecutive_failures,
                    "reachability probe keeps failing; treating the network as offline"
                );
                return true;
            }
            false
        });
    }

    /// Whether pushes may be attempted right now.
    pub fn is_online(&self) -> bool {
        self.state.borrow().online()
    }

    /// Copy of the current state.
    pub fn snapshot(&self) -> ConnectivitySnapshot {
        *self.state.borrow()
    }

    /// Observe online/offline transitions.
    pub fn subscribe(&self) -> watch::Receiver<ConnectivitySnapshot> {
        self.state.subscribe()
    }
}

/// Probe forever at `interval`, bounding each probe by `timeout`.
pub async fn run_probe_loop(
    connectivity: Arc<Connectivity>,
    probe: Arc<dyn ReachabilityProbe>,
    interval: Duration,
    timeout: Duration,
) {
    let mut ticker = time::interval(interval.max(MIN_INTERVAL));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        if !connectivity.snapshot().platform_online {
            continue;
        }

        match time::timeout(timeout, probe.probe()).await {
            Ok(Ok(latency)) => connectivity.record_probe_success(latency),
            Ok(Err(err)) => {
                debug!(error = %err, "reachability probe failed");
                connectivity.record_probe_failure();
            }
            Err(_) => {
                debug!("reachability probe timed out");
                connectivity.record_probe_failure();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;

    struct SwitchProbe {
        up: Arc<AtomicBool>,
    }

    impl ReachabilityProbe for SwitchProbe {
        fn probe(&self) -> BoxFuture<'static, Result<Duration, ProbeError>> {
            let up = self.up.load(Ordering::SeqCst);
            Box::pin(async move {
                if up {
                    Ok(Duration::from_millis(12))
                } else {
                    Err(ProbeError::Failed("unreachable".into()))
                }
            })
        }
    }

    #[test]
    fn failures_below_threshold_keep_the_network_online() {
        let connectivity = Connectivity::new(3);
        connectivity.record_probe_failure();
        connectivity.record_probe_failure();
        assert!(connectivity.is_online());

        connectivity.record_probe_failure();
        assert!(!connectivity.is_online());
        assert!(connectivity.snapshot().platform_online);

        connectivity.record_probe_success(Duration::from_millis(40));
        let snapshot = connectivity.snapshot();
        assert!(snapshot.online());
        assert_eq!(snapshot.consecutive_failures, 0);
        assert_eq!(snapshot.last_latency_ms, Some(40));
    }

    #[test]
    fn platform_offline_wins_over_a_healthy_probe() {
        let connectivity = Connectivity::new(1);
        let mut changes = connectivity.subscribe();
        connectivity.set_platform_online(false);
        assert!(changes.has_changed().unwrap());
        assert!(!connectivity.is_online());

        changes.mark_unchanged();
        connectivity.set_platform_online(false);
        assert!(!changes.has_changed().unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn probe_loop_drives_reachability() {
        let connectivity = Arc::new(Connectivity::new(2));
        let up = Arc::new(AtomicBool::new(false));
        let probe: Arc<dyn ReachabilityProbe> = Arc::new(SwitchProbe { up: up.clone() });
        let mut changes = connectivity.subscribe();

        let task = tokio::spawn(run_probe_loop(
            connectivity.clone(),
            probe,
            Duration::from_secs(1),
            Duration::from_millis(500),
        ));

        changes.changed().await.unwrap();
        assert!(!changes.borrow_and_update().online());

        up.store(true, Ordering::SeqCst);
        changes.changed().await.unwrap();
        assert!(changes.borrow_and_update().online());
        task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn zero_probe_interval_still_ticks() {
        let connectivity = Arc::new(Connectivity::new(1));
        let probe: Arc<dyn ReachabilityProbe> = Arc::new(SwitchProbe {
            up: Arc::new(AtomicBool::new(false)),
        });
        let mut changes = connectivity.subscribe();

        let task = tokio::spawn(run_probe_loop(
            connectivity.clone(),
            probe,
            Duration::ZERO,
            Duration::from_millis(5),
        ));

        changes.changed().await.unwrap();
        assert!(!changes.borrow_and_update().online());
        assert!(!task.is_finished());
        task.abort();
    }
}
