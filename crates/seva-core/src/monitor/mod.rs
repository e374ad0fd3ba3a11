//! Background reachability monitor for the remote store.
//!
//! Probes the remote on a fixed interval and publishes connectivity through a
//! watch channel. An offline-to-online transition emits exactly one reconnect
//! trigger; a new state must hold for one full subsequent probe before it is
//! committed, so flapping connectivity does not produce a burst of sync runs.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::models::SyncTrigger;
use crate::remote::RemoteStore;

pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(30);

/// Reachability of the remote store as last observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Connectivity {
    /// No probe has completed yet
    #[default]
    Unknown,
    Offline,
    Online,
}

/// Periodic reachability prober.
pub struct NetworkMonitor {
    remote: Arc<dyn RemoteStore>,
    probe_interval: Duration,
}

impl NetworkMonitor {
    #[must_use]
    pub fn new(remote: Arc<dyn RemoteStore>, probe_interval: Duration) -> Self {
        Self {
            remote,
            probe_interval,
        }
    }

    /// Start the probe loop.
    ///
    /// Reconnect triggers are sent on `triggers`; the loop exits when
    /// `shutdown` flips to true. The returned watch receiver carries the
    /// committed connectivity state.
    pub fn spawn(
        self,
        triggers: mpsc::Sender<SyncTrigger>,
        mut shutdown: watch::Receiver<bool>,
    ) -> (JoinHandle<()>, watch::Receiver<Connectivity>) {
        let (status_tx, status_rx) = watch::channel(Connectivity::Unknown);

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.probe_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            let mut current = Connectivity::Unknown;
            let mut candidate: Option<Connectivity> = None;

            loop {
                tokio::select! {
                    _ = interval.tick() => {}
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            debug!("network monitor stopping");
                            return;
                        }
                        continue;
                    }
                }

                let observed = if self.remote.ping().await.is_ok() {
                    Connectivity::Online
                } else {
                    Connectivity::Offline
                };

                if observed == current {
                    candidate = None;
                    continue;
                }

                // First observation commits immediately; later flips must
                // hold for one extra probe
                let commit = current == Connectivity::Unknown || candidate == Some(observed);
                if !commit {
                    candidate = Some(observed);
                    continue;
                }

                let previous = current;
                current = observed;
                candidate = None;
                let _ = status_tx.send(current);

                if previous == Connectivity::Offline && current == Connectivity::Online {
                    info!("remote store reachable again, requesting sync");
                    if triggers.try_send(SyncTrigger::Reconnect).is_err() {
                        warn!("sync trigger channel full or closed, dropping reconnect trigger");
                    }
                } else {
                    info!(?previous, ?current, "connectivity changed");
                }
            }
        });

        (handle, status_rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::MemoryRemoteStore;

    fn setup(
        store: &Arc<MemoryRemoteStore>,
    ) -> (
        JoinHandle<()>,
        watch::Receiver<Connectivity>,
        mpsc::Receiver<SyncTrigger>,
        watch::Sender<bool>,
    ) {
        let (trigger_tx, trigger_rx) = mpsc::channel(4);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let monitor = NetworkMonitor::new(
            Arc::clone(store) as Arc<dyn RemoteStore>,
            Duration::from_millis(10),
        );
        let (handle, status_rx) = monitor.spawn(trigger_tx, shutdown_rx);
        (handle, status_rx, trigger_rx, shutdown_tx)
    }

    async fn wait_for(status: &mut watch::Receiver<Connectivity>, target: Connectivity) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while *status.borrow() != target {
                status.changed().await.unwrap();
            }
        })
        .await
        .expect("connectivity never reached the expected state");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn initial_probe_commits_without_reconnect_trigger() {
        let store = Arc::new(MemoryRemoteStore::new());
        let (handle, mut status, mut triggers, shutdown) = setup(&store);

        wait_for(&mut status, Connectivity::Online).await;
        assert!(triggers.try_recv().is_err());

        shutdown.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn offline_to_online_emits_exactly_one_trigger() {
        let store = Arc::new(MemoryRemoteStore::new());
        store.set_offline(true);
        let (handle, mut status, mut triggers, shutdown) = setup(&store);

        wait_for(&mut status, Connectivity::Offline).await;
        store.set_offline(false);
        wait_for(&mut status, Connectivity::Online).await;

        // Give the loop a few more probes to prove no duplicates arrive
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(triggers.try_recv().unwrap(), SyncTrigger::Reconnect);
        assert!(triggers.try_recv().is_err());

        shutdown.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn single_probe_blip_is_debounced() {
        let store = Arc::new(MemoryRemoteStore::new());
        let (handle, mut status, mut triggers, shutdown) = setup(&store);
        wait_for(&mut status, Connectivity::Online).await;

        // Fail exactly one probe; the flap must not commit or trigger
        store.fail_next(1);
        tokio::time::sleep(Duration::from_millis(80)).await;

        assert_eq!(*status.borrow(), Connectivity::Online);
        assert!(triggers.try_recv().is_err());

        shutdown.send(true).unwrap();
        handle.await.unwrap();
    }
}
