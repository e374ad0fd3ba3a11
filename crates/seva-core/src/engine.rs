//! Engine facade tying the recorder, monitor, scheduler, and sync manager
//! together behind the operations an API or CLI layer consumes.
//!
//! Without a remote URL the engine runs local-only: attendance capture works
//! unchanged, no background tasks start, and sync operations report the
//! remote as unavailable instead of failing hard.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::attendance::{AttendanceRecorder, RecorderConfig};
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::models::{
    ConflictFilter, ConflictLogEntry, ResolutionStrategy, SyncConfiguration,
    SyncConfigurationPatch, SyncLogEntry, SyncTrigger,
};
use crate::monitor::{Connectivity, NetworkMonitor};
use crate::remote::{HttpRemoteStore, RemoteStore};
use crate::store::LocalStore;
use crate::sync::{ConflictResolver, SyncManager, SyncScheduler, DEFAULT_CONFIG_POLL_INTERVAL};

const TRIGGER_CHANNEL_CAPACITY: usize = 8;

/// Snapshot answering "is sync healthy right now".
#[derive(Debug, Clone, Serialize)]
pub struct SyncStatusReport {
    /// Last committed connectivity observation; false in local-only mode
    pub online: bool,
    /// Most recent sync run, if any
    pub last_sync: Option<SyncLogEntry>,
    /// Documents awaiting sync, per collection
    pub pending: BTreeMap<String, u64>,
}

impl SyncStatusReport {
    /// Total documents awaiting sync across collections.
    #[must_use]
    pub fn pending_total(&self) -> u64 {
        self.pending.values().sum()
    }
}

/// Top-level handle over the attendance and sync subsystems.
pub struct SyncEngine {
    store: LocalStore,
    recorder: AttendanceRecorder,
    manager: Option<Arc<SyncManager>>,
    connectivity: Option<watch::Receiver<Connectivity>>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl SyncEngine {
    /// Open the local store and start the engine from environment-style
    /// configuration.
    pub async fn start(config: EngineConfig) -> Result<Self> {
        let store = LocalStore::open_path(&config.db_path).await?;
        let remote: Option<Arc<dyn RemoteStore>> = match &config.remote_url {
            Some(url) => Some(Arc::new(HttpRemoteStore::new(
                url.clone(),
                config.remote_store.clone(),
            )?)),
            None => None,
        };
        Ok(Self::assemble(store, remote, config.recorder, config.probe_interval).await)
    }

    /// Start the engine over an existing store and remote implementation.
    /// This is the embedding/test entry point.
    pub async fn with_remote(
        store: LocalStore,
        remote: Option<Arc<dyn RemoteStore>>,
        recorder: RecorderConfig,
        probe_interval: Duration,
    ) -> Self {
        Self::assemble(store, remote, recorder, probe_interval).await
    }

    async fn assemble(
        store: LocalStore,
        remote: Option<Arc<dyn RemoteStore>>,
        recorder_config: RecorderConfig,
        probe_interval: Duration,
    ) -> Self {
        let recorder = AttendanceRecorder::new(store.clone(), recorder_config);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let Some(remote) = remote else {
            info!("no remote store configured, engine running local-only");
            return Self {
                store,
                recorder,
                manager: None,
                connectivity: None,
                shutdown_tx,
                tasks: Vec::new(),
            };
        };

        let manager = Arc::new(SyncManager::new(store.clone(), Arc::clone(&remote)));
        let (trigger_tx, trigger_rx) = mpsc::channel(TRIGGER_CHANNEL_CAPACITY);

        let monitor = NetworkMonitor::new(Arc::clone(&remote), probe_interval);
        let (monitor_task, connectivity) = monitor.spawn(trigger_tx.clone(), shutdown_rx.clone());

        let scheduler = SyncScheduler::new(store.clone(), DEFAULT_CONFIG_POLL_INTERVAL);
        let scheduler_task = scheduler.spawn(trigger_tx, shutdown_rx.clone());

        let dispatcher_task = tokio::spawn(Self::dispatch_triggers(
            store.clone(),
            Arc::clone(&manager),
            trigger_rx,
            shutdown_rx,
        ));

        Self {
            store,
            recorder,
            manager: Some(manager),
            connectivity: Some(connectivity),
            shutdown_tx,
            tasks: vec![monitor_task, scheduler_task, dispatcher_task],
        }
    }

    /// Runs queued reconnect/scheduled triggers, honoring the auto-sync flag.
    async fn dispatch_triggers(
        store: LocalStore,
        manager: Arc<SyncManager>,
        mut triggers: mpsc::Receiver<SyncTrigger>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            let trigger = tokio::select! {
                trigger = triggers.recv() => match trigger {
                    Some(trigger) => trigger,
                    None => return,
                },
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                    continue;
                }
            };

            match store.load_sync_config().await {
                Ok(config) if !config.auto_sync_enabled => {
                    info!(%trigger, "auto-sync disabled, ignoring trigger");
                    continue;
                }
                Ok(_) => {}
                Err(err) => {
                    error!(%err, "could not load sync configuration, skipping trigger");
                    continue;
                }
            }

            if let Err(err) = manager.run_sync(trigger, None).await {
                error!(%trigger, %err, "background sync run failed");
            }
        }
    }

    /// Local persistence handle.
    #[must_use]
    pub const fn store(&self) -> &LocalStore {
        &self.store
    }

    /// Attendance state machine.
    #[must_use]
    pub const fn recorder(&self) -> &AttendanceRecorder {
        &self.recorder
    }

    fn manager(&self) -> Result<&Arc<SyncManager>> {
        self.manager.as_ref().ok_or(Error::RemoteUnavailable)
    }

    fn resolver(&self) -> Result<&ConflictResolver> {
        Ok(self.manager()?.resolver())
    }

    /// Run a sync now, optionally restricted to a subset of collections.
    ///
    /// Returns `None` when a run was already in flight and this trigger was
    /// coalesced into a follow-up run.
    pub async fn trigger_sync(
        &self,
        collections: Option<&BTreeSet<String>>,
    ) -> Result<Option<SyncLogEntry>> {
        self.manager()?.run_sync(SyncTrigger::Manual, collections).await
    }

    /// Connectivity, last run, and pending counts.
    pub async fn sync_status(&self) -> Result<SyncStatusReport> {
        let online = self
            .connectivity
            .as_ref()
            .is_some_and(|rx| *rx.borrow() == Connectivity::Online);
        let last_sync = self.store.latest_sync_log().await?;

        let config = self.store.load_sync_config().await?;
        let mut pending = BTreeMap::new();
        for collection in &config.collections_to_sync {
            pending.insert(
                collection.clone(),
                self.store.count_dirty(collection).await?,
            );
        }

        Ok(SyncStatusReport {
            online,
            last_sync,
            pending,
        })
    }

    /// List conflict log entries.
    pub async fn list_conflicts(&self, filter: &ConflictFilter) -> Result<Vec<ConflictLogEntry>> {
        self.store.list_conflicts(filter).await
    }

    /// Resolve a conflict with an explicit strategy.
    pub async fn resolve_conflict(
        &self,
        conflict_id: i64,
        strategy: ResolutionStrategy,
        value: Option<&Value>,
        resolved_by: &str,
        notes: Option<&str>,
    ) -> Result<ConflictLogEntry> {
        self.resolver()?
            .resolve(conflict_id, strategy, value, resolved_by, notes)
            .await
    }

    /// Apply the configured default strategy to open conflicts in opted-in
    /// collections. Returns how many were resolved.
    pub async fn auto_resolve_conflicts(&self, limit: usize) -> Result<u64> {
        let config = self.store.load_sync_config().await?;
        self.resolver()?.auto_resolve(&config, limit).await
    }

    /// Current sync configuration.
    pub async fn get_config(&self) -> Result<SyncConfiguration> {
        self.store.load_sync_config().await
    }

    /// Apply a partial configuration update and persist it.
    pub async fn set_config(&self, patch: SyncConfigurationPatch) -> Result<SyncConfiguration> {
        let mut config = self.store.load_sync_config().await?;
        config.apply_partial(patch);
        self.store.save_sync_config(&config).await?;
        Ok(config)
    }

    /// Stop background tasks; a running sync finishes its current batch,
    /// persists its checkpoint, and exits.
    pub async fn shutdown(mut self) {
        if let Some(manager) = &self.manager {
            manager.request_cancel();
        }
        let _ = self.shutdown_tx.send(true);
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
    }
}
