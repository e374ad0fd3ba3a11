//! Periodic sync scheduling.
//!
//! Re-reads the persisted configuration on every poll, so interval changes
//! take effect without restarting the engine. Fires a `Scheduled` trigger
//! when `sync_interval_minutes` has elapsed since the last fire; a `None`
//! interval or disabled auto-sync keeps the loop idle.

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::models::SyncTrigger;
use crate::store::LocalStore;

pub const DEFAULT_CONFIG_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Drives scheduled sync triggers off the persisted configuration.
pub struct SyncScheduler {
    store: LocalStore,
    poll_interval: Duration,
}

impl SyncScheduler {
    #[must_use]
    pub const fn new(store: LocalStore, poll_interval: Duration) -> Self {
        Self {
            store,
            poll_interval,
        }
    }

    /// Start the scheduling loop; exits when `shutdown` flips to true.
    pub fn spawn(
        self,
        triggers: mpsc::Sender<SyncTrigger>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.poll_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            let mut last_fire = tokio::time::Instant::now();

            loop {
                tokio::select! {
                    _ = interval.tick() => {}
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            debug!("sync scheduler stopping");
                            return;
                        }
                        continue;
                    }
                }

                let config = match self.store.load_sync_config().await {
                    Ok(config) => config,
                    Err(error) => {
                        warn!(%error, "scheduler could not load sync configuration");
                        continue;
                    }
                };
                let Some(minutes) = config.sync_interval_minutes else {
                    continue;
                };
                if !config.auto_sync_enabled {
                    continue;
                }

                let due = Duration::from_secs(minutes * 60);
                if last_fire.elapsed() >= due {
                    last_fire = tokio::time::Instant::now();
                    if triggers.try_send(SyncTrigger::Scheduled).is_err() {
                        warn!("sync trigger channel full or closed, dropping scheduled trigger");
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread")]
    async fn fires_when_interval_elapsed() {
        let store = LocalStore::open_in_memory().await.unwrap();
        let mut config = store.load_sync_config().await.unwrap();
        // Zero-minute interval: due on every poll
        config.sync_interval_minutes = Some(0);
        store.save_sync_config(&config).await.unwrap();

        let (trigger_tx, mut trigger_rx) = mpsc::channel(4);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let scheduler = SyncScheduler::new(store, Duration::from_millis(10));
        let handle = scheduler.spawn(trigger_tx, shutdown_rx);

        let trigger = tokio::time::timeout(Duration::from_secs(2), trigger_rx.recv())
            .await
            .expect("scheduler never fired")
            .unwrap();
        assert_eq!(trigger, SyncTrigger::Scheduled);

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn stays_idle_without_an_interval() {
        let store = LocalStore::open_in_memory().await.unwrap();

        let (trigger_tx, mut trigger_rx) = mpsc::channel(4);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let scheduler = SyncScheduler::new(store, Duration::from_millis(10));
        let handle = scheduler.spawn(trigger_tx, shutdown_rx);

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(trigger_rx.try_recv().is_err());

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
