//! Network reachability tracking
//!
//! The monitor owns the process-wide online flag. It seeds the flag with
//! one probe at startup, re-probes on an interval, and broadcasts
//! transitions over a watch channel so the engine can run a
//! reconciliation sweep exactly once per offline-to-online edge. The
//! engine itself only ever reads the flag; it never probes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::error::Result;

const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(30);
const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration for the connectivity monitor
#[derive(Debug, Clone)]
pub struct ConnectivityConfig {
    /// Endpoint probed for reachability (any HTTP response counts)
    pub probe_url: String,
    /// How often to re-probe while running
    pub probe_interval: Duration,
    /// Timeout for a single probe
    pub probe_timeout: Duration,
}

impl ConnectivityConfig {
    pub fn new(probe_url: impl Into<String>) -> Self {
        Self {
            probe_url: probe_url.into(),
            probe_interval: DEFAULT_PROBE_INTERVAL,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }

    /// Set the re-probe interval
    #[must_use]
    pub const fn with_probe_interval(mut self, interval: Duration) -> Self {
        self.probe_interval = interval;
        self
    }

    /// Set the single-probe timeout
    #[must_use]
    pub const fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }
}

/// Tracks network reachability and notifies on transitions.
///
/// Clones share state: the flag, the transition channel, and the probe
/// client are all process-wide.
#[derive(Clone)]
pub struct ConnectivityMonitor {
    online: Arc<AtomicBool>,
    transitions: watch::Sender<bool>,
    client: reqwest::Client,
    probe_url: String,
    probe_interval: Duration,
}

impl std::fmt::Debug for ConnectivityMonitor {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("ConnectivityMonitor")
            .field("online", &self.status())
            .field("probe_url", &self.probe_url)
            .finish_non_exhaustive()
    }
}

impl ConnectivityMonitor {
    /// Create a monitor. The flag starts offline until the first probe
    /// or a manual `set_status`.
    pub fn new(config: ConnectivityConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.probe_timeout)
            .build()?;
        let (transitions, _) = watch::channel(false);
        Ok(Self {
            online: Arc::new(AtomicBool::new(false)),
            transitions,
            client,
            probe_url: config.probe_url,
            probe_interval: config.probe_interval,
        })
    }

    /// Seed the flag with one probe, then keep re-probing in the
    /// background. Returns the background task's handle.
    pub async fn initialize(&self) -> JoinHandle<()> {
        self.refresh().await;

        let monitor = self.clone();
        tokio::spawn(async move {
            let mut ticker = interval(monitor.probe_interval);
            ticker.tick().await; // first tick completes immediately
            loop {
                ticker.tick().await;
                monitor.refresh().await;
            }
        })
    }

    /// Last known reachability. Never probes.
    pub fn status(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Probe once and record the result.
    pub async fn refresh(&self) -> bool {
        let online = self.probe().await;
        self.set_status(online);
        online
    }

    /// Record a reachability change.
    ///
    /// Also the entry point for platform reachability callbacks delivered
    /// by an embedding shell, and for tests. Subscribers are only
    /// notified on actual transitions.
    pub fn set_status(&self, online: bool) {
        let was_online = self.online.swap(online, Ordering::SeqCst);
        if was_online == online {
            return;
        }
        if online {
            info!("Network reachable again");
        } else {
            warn!("Network became unreachable");
        }
        self.transitions.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
    }

    /// Subscribe to reachability transitions.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.transitions.subscribe()
    }

    /// Any HTTP response counts as reachable; only transport failures
    /// (DNS, connect, timeout) mean offline.
    async fn probe(&self) -> bool {
        match self.client.head(&self.probe_url).send().await {
            Ok(_) => true,
            Err(e) => {
                debug!("Connectivity probe failed: {e}");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor() -> ConnectivityMonitor {
        // Unroutable loopback port; probes fail fast without a network.
        ConnectivityMonitor::new(
            ConnectivityConfig::new("http://127.0.0.1:9")
                .with_probe_timeout(Duration::from_millis(250)),
        )
        .unwrap()
    }

    #[test]
    fn starts_offline() {
        assert!(!monitor().status());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn set_status_flips_the_flag() {
        let monitor = monitor();
        monitor.set_status(true);
        assert!(monitor.status());
        monitor.set_status(false);
        assert!(!monitor.status());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn subscribers_see_transitions_only() {
        let monitor = monitor();
        let mut rx = monitor.subscribe();
        assert!(!*rx.borrow());

        monitor.set_status(true);
        rx.changed().await.unwrap();
        assert!(*rx.borrow_and_update());

        // Repeating the same status is not a transition
        monitor.set_status(true);
        assert!(!rx.has_changed().unwrap());

        monitor.set_status(false);
        rx.changed().await.unwrap();
        assert!(!*rx.borrow_and_update());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn refresh_reports_unreachable_endpoint_as_offline() {
        let monitor = monitor();
        monitor.set_status(true);
        assert!(!monitor.refresh().await);
        assert!(!monitor.status());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn clones_share_state() {
        let monitor = monitor();
        let clone = monitor.clone();
        monitor.set_status(true);
        assert!(clone.status());
    }
}
