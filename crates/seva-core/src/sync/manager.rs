//! Sync run orchestration.
//!
//! One entry point, [`SyncManager::run_sync`]. Runs are serialized: a trigger
//! arriving while a run is in flight is coalesced into one follow-up run
//! instead of executing in parallel. Each run pushes dirty documents through
//! the conflict resolver, pulls remote changes past the per-collection
//! checkpoint, and appends one audit log entry.

use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::models::{SyncConfiguration, SyncLogEntry, SyncRunStatus, SyncStatus, SyncTrigger};
use crate::remote::RemoteStore;
use crate::store::LocalStore;
use crate::sync::conflict::{ConflictResolver, PushCheck};
use crate::util::unix_millis_now;

const BASE_BACKOFF_MS: u64 = 250;
const MAX_BACKOFF_MS: u64 = 30_000;

/// Capped exponential backoff for transient transport failures.
fn backoff_delay(attempt: u32) -> Duration {
    let exp = 1_u64 << attempt.min(16);
    Duration::from_millis((BASE_BACKOFF_MS * exp).min(MAX_BACKOFF_MS))
}

#[derive(Default)]
struct RunState {
    running: bool,
    rerun_requested: bool,
}

/// Serialized push/pull orchestrator over one local store and one remote.
pub struct SyncManager {
    store: LocalStore,
    remote: Arc<dyn RemoteStore>,
    resolver: ConflictResolver,
    state: Mutex<RunState>,
    cancel: AtomicBool,
}

impl SyncManager {
    #[must_use]
    pub fn new(store: LocalStore, remote: Arc<dyn RemoteStore>) -> Self {
        let resolver = ConflictResolver::new(store.clone(), Arc::clone(&remote));
        Self {
            store,
            remote,
            resolver,
            state: Mutex::new(RunState::default()),
            cancel: AtomicBool::new(false),
        }
    }

    /// The resolver sharing this manager's store and remote.
    #[must_use]
    pub const fn resolver(&self) -> &ConflictResolver {
        &self.resolver
    }

    /// Ask a running sync to stop after its current batch. Stays in effect
    /// until [`Self::clear_cancel`].
    pub fn request_cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    /// Re-arm the manager after a cancellation.
    pub fn clear_cancel(&self) {
        self.cancel.store(false, Ordering::SeqCst);
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    fn try_begin(&self) -> bool {
        let mut state = self.state.lock().expect("sync state poisoned");
        if state.running {
            state.rerun_requested = true;
            false
        } else {
            state.running = true;
            true
        }
    }

    /// True when a coalesced trigger arrived and the loop should go again.
    fn finish_or_continue(&self) -> bool {
        let mut state = self.state.lock().expect("sync state poisoned");
        if state.rerun_requested {
            state.rerun_requested = false;
            true
        } else {
            state.running = false;
            false
        }
    }

    fn abort_run(&self) {
        let mut state = self.state.lock().expect("sync state poisoned");
        state.running = false;
        state.rerun_requested = false;
    }

    /// Run a sync, or coalesce into the in-flight run.
    ///
    /// Returns `None` when a run was already in progress; the current run
    /// will execute once more after it completes. `collections` restricts the
    /// run to a subset of the configured collections.
    pub async fn run_sync(
        &self,
        trigger: SyncTrigger,
        collections: Option<&BTreeSet<String>>,
    ) -> Result<Option<SyncLogEntry>> {
        if !self.try_begin() {
            debug!(%trigger, "sync already running, coalescing trigger");
            return Ok(None);
        }

        let mut last;
        loop {
            last = match self.execute(trigger, collections).await {
                Ok(entry) => entry,
                Err(error) => {
                    self.abort_run();
                    return Err(error);
                }
            };
            if !self.finish_or_continue() {
                break;
            }
            debug!("running coalesced follow-up sync");
        }
        Ok(Some(last))
    }

    async fn execute(
        &self,
        trigger: SyncTrigger,
        collections: Option<&BTreeSet<String>>,
    ) -> Result<SyncLogEntry> {
        let start = unix_millis_now();
        let mut entry = SyncLogEntry::begin(trigger, start);
        info!(%trigger, "sync run starting");

        if let Err(error) = self.remote.ping().await {
            warn!(%error, "remote unreachable, aborting run");
            entry.errors.push(format!("remote unreachable: {error}"));
            entry.status = SyncRunStatus::Failed;
            entry.end_time = unix_millis_now();
            return self.store.append_sync_log(&entry).await;
        }

        let cancelled = match self.sync_collections(collections, &mut entry).await {
            Ok(cancelled) => cancelled,
            Err(error) => {
                // Even an aborted run leaves an audit trail
                warn!(%error, "sync run aborted");
                entry.errors.push(error.to_string());
                entry.status = SyncRunStatus::Failed;
                entry.end_time = unix_millis_now();
                if let Err(log_error) = self.store.append_sync_log(&entry).await {
                    warn!(%log_error, "failed to record aborted sync run");
                }
                return Err(error);
            }
        };

        if cancelled {
            entry.errors.push("sync run cancelled".to_string());
        }
        entry.status = if entry.errors.is_empty() {
            SyncRunStatus::Completed
        } else {
            SyncRunStatus::Partial
        };
        entry.end_time = unix_millis_now();

        let entry = self.store.append_sync_log(&entry).await?;
        info!(
            status = entry.status.as_str(),
            pushed = entry.total_pushed(),
            pulled = entry.total_pulled(),
            conflicts = entry.total_conflicts(),
            "sync run finished"
        );
        Ok(entry)
    }

    /// Push then pull each configured collection. Returns whether the run
    /// was cancelled partway.
    async fn sync_collections(
        &self,
        collections: Option<&BTreeSet<String>>,
        entry: &mut SyncLogEntry,
    ) -> Result<bool> {
        let config = self.store.load_sync_config().await?;

        for collection in &config.collections_to_sync {
            if collections.is_some_and(|subset| !subset.contains(collection)) {
                continue;
            }
            if self.cancelled() {
                return Ok(true);
            }

            let pushed = self.push_collection(collection, &config, entry).await?;
            entry.pushed.insert(collection.clone(), pushed);

            if self.cancelled() {
                return Ok(true);
            }

            let pulled = self.pull_collection(collection, &config, entry).await?;
            entry.pulled.insert(collection.clone(), pulled);
        }
        Ok(false)
    }

    /// Push dirty documents of one collection in batches.
    ///
    /// A conflict or a failed document never aborts the batch; exhausted
    /// retries are recorded in the run's errors and the document is flagged
    /// `failed` so the next run picks it up again.
    async fn push_collection(
        &self,
        collection: &str,
        config: &SyncConfiguration,
        entry: &mut SyncLogEntry,
    ) -> Result<u64> {
        let mut pushed = 0_u64;
        let mut conflicts = 0_u64;
        let mut attempted: HashSet<String> = HashSet::new();

        'batches: loop {
            if self.cancelled() {
                break;
            }

            let batch: Vec<_> = self
                .store
                .dirty_documents(collection, config.batch_size)
                .await?
                .into_iter()
                .filter(|doc| !attempted.contains(&doc.id))
                .collect();
            if batch.is_empty() {
                break;
            }

            for doc in batch {
                if self.cancelled() {
                    break 'batches;
                }
                attempted.insert(doc.id.clone());

                match self.resolver.check_push(config, collection, &doc).await? {
                    PushCheck::Conflict(_) => {
                        conflicts += 1;
                        continue;
                    }
                    PushCheck::Ok => {}
                }

                let push = self
                    .with_retry(config.max_retries, || self.remote.upsert(collection, &doc))
                    .await;
                match push {
                    Ok(()) => {
                        // Confirmation is guarded by the snapshot's version: a
                        // mutation racing this push stays dirty for next run
                        let marked = self
                            .store
                            .mark_synced(collection, &doc.id, doc.updated_at, doc.version)
                            .await?;
                        if !marked {
                            debug!(collection, id = %doc.id, "document mutated mid-push, left dirty");
                        }
                        pushed += 1;
                    }
                    Err(error) if error.is_transient() => {
                        warn!(collection, id = %doc.id, %error, "push failed after retries");
                        entry
                            .errors
                            .push(format!("push {collection}/{}: {error}", doc.id));
                        self.store
                            .set_sync_status(collection, &doc.id, SyncStatus::Failed)
                            .await?;
                    }
                    Err(error) => return Err(error),
                }
            }
        }

        if conflicts > 0 {
            entry.conflicts.insert(collection.to_string(), conflicts);
        }
        Ok(pushed)
    }

    /// Pull remote documents past the collection's checkpoint in batches,
    /// committing the checkpoint after each fully-covered timestamp.
    ///
    /// Listing is strictly-greater-than, so a full page ending inside a group
    /// of equal timestamps may only advance the checkpoint past the
    /// timestamps the page fully covered; the tied tail is re-fetched. A page
    /// that is one timestamp end to end is re-fetched wider until the whole
    /// group fits.
    async fn pull_collection(
        &self,
        collection: &str,
        config: &SyncConfiguration,
        entry: &mut SyncLogEntry,
    ) -> Result<u64> {
        let device_id = self.store.device_id().to_string();
        let mut checkpoint = self.store.get_checkpoint(collection).await?;
        let mut pulled = 0_u64;
        let mut limit = config.batch_size;

        loop {
            if self.cancelled() {
                break;
            }

            let batch = match self
                .with_retry(config.max_retries, || {
                    self.remote.list_since(collection, checkpoint, limit)
                })
                .await
            {
                Ok(batch) => batch,
                Err(error) if error.is_transient() => {
                    warn!(collection, %error, "pull failed after retries");
                    entry.errors.push(format!("pull {collection}: {error}"));
                    break;
                }
                Err(error) => return Err(error),
            };
            let Some(last) = batch.last() else {
                break;
            };
            let last_ts = last.updated_at;

            for doc in &batch {
                // Skip documents this device authored; they were just pushed
                if doc.origin_device.as_deref() == Some(device_id.as_str()) {
                    continue;
                }
                if self.store.apply_remote(collection, doc).await? {
                    pulled += 1;
                }
            }

            if batch.len() < limit {
                // Short page: everything up to last_ts is local now
                checkpoint = last_ts;
                self.store
                    .set_checkpoint(collection, checkpoint, unix_millis_now())
                    .await?;
                break;
            }

            match batch.iter().rev().find(|doc| doc.updated_at < last_ts) {
                Some(covered) => {
                    checkpoint = covered.updated_at;
                    self.store
                        .set_checkpoint(collection, checkpoint, unix_millis_now())
                        .await?;
                    limit = config.batch_size;
                }
                None => limit += config.batch_size,
            }
        }

        Ok(pulled)
    }

    async fn with_retry<T, F, Fut>(&self, max_retries: u32, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut attempt = 0_u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(error) if error.is_transient() && attempt < max_retries => {
                    let delay = backoff_delay(attempt);
                    attempt += 1;
                    debug!(%error, attempt, ?delay, "transient transport error, backing off");
                    tokio::time::sleep(delay).await;
                }
                Err(error) => return Err(error),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        AttendanceRecord, ConflictFilter, Volunteer, COLLECTION_ATTENDANCE, COLLECTION_VOLUNTEERS,
    };
    use crate::remote::{MemoryRemoteStore, RemoteDocument};
    use serde_json::json;

    struct Fixture {
        store: LocalStore,
        remote: Arc<MemoryRemoteStore>,
        manager: SyncManager,
    }

    async fn fixture() -> Fixture {
        let store = LocalStore::open_in_memory().await.unwrap();
        let remote = Arc::new(MemoryRemoteStore::new());
        let manager = SyncManager::new(store.clone(), Arc::clone(&remote) as Arc<dyn RemoteStore>);
        Fixture {
            store,
            remote,
            manager,
        }
    }

    async fn run(manager: &SyncManager) -> SyncLogEntry {
        manager
            .run_sync(SyncTrigger::Manual, None)
            .await
            .unwrap()
            .expect("run should not coalesce")
    }

    #[test]
    fn backoff_grows_and_caps() {
        assert_eq!(backoff_delay(0), Duration::from_millis(250));
        assert_eq!(backoff_delay(1), Duration::from_millis(500));
        assert_eq!(backoff_delay(2), Duration::from_millis(1_000));
        assert_eq!(backoff_delay(20), Duration::from_millis(30_000));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn push_round_trip_marks_synced() {
        let f = fixture().await;
        let record = AttendanceRecord::checked_in("u1", "2026-08-25", 1_000, 42.0);
        f.store.insert_attendance(&record).await.unwrap();

        let entry = run(&f.manager).await;
        assert_eq!(entry.status, SyncRunStatus::Completed);
        assert_eq!(entry.pushed[COLLECTION_ATTENDANCE], 1);
        assert_eq!(entry.total_conflicts(), 0);
        assert_eq!(f.remote.len(COLLECTION_ATTENDANCE).await, 1);

        let stored = f.store.get_attendance("u1", "2026-08-25").await.unwrap().unwrap();
        assert_eq!(stored.sync.sync_status, SyncStatus::Synced);
        assert!(!stored.sync.is_dirty());
        assert!(stored.sync.synced_at.unwrap() <= stored.sync.updated_at);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn rerun_on_unchanged_state_is_idempotent() {
        let f = fixture().await;
        let record = AttendanceRecord::checked_in("u1", "2026-08-25", 1_000, 42.0);
        f.store.insert_attendance(&record).await.unwrap();

        run(&f.manager).await;
        let first = f.store.get_attendance("u1", "2026-08-25").await.unwrap().unwrap();

        let second_run = run(&f.manager).await;
        assert_eq!(second_run.total_pushed(), 0);
        let second = f.store.get_attendance("u1", "2026-08-25").await.unwrap().unwrap();
        assert_eq!(first, second);
        assert_eq!(f.remote.len(COLLECTION_ATTENDANCE).await, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unique_field_collision_yields_one_conflict_row() {
        let f = fixture().await;

        // Independently authored remote volunteer with the same login
        let other = Volunteer::new("priya", "Someone Else", 500);
        let remote_doc = RemoteDocument::from_payload(
            other.id.as_str(),
            other.sync.updated_at,
            other.sync.version,
            Some("other-device".to_string()),
            &other,
        )
        .unwrap();
        f.remote.seed(COLLECTION_VOLUNTEERS, remote_doc).await;

        let local = Volunteer::new("priya", "Priya S", 1_000);
        f.store.upsert_volunteer(&local).await.unwrap();

        let entry = run(&f.manager).await;
        assert_eq!(entry.conflicts[COLLECTION_VOLUNTEERS], 1);
        assert_eq!(entry.pushed[COLLECTION_VOLUNTEERS], 0);
        // The colliding document was never written remotely
        assert_eq!(f.remote.len(COLLECTION_VOLUNTEERS).await, 1);

        // A second run neither duplicates the row nor retries the push
        run(&f.manager).await;
        let rows = f
            .store
            .list_conflicts(&ConflictFilter::default())
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);

        let stored = f.store.get_volunteer(&local.id).await.unwrap().unwrap();
        assert_eq!(stored.sync.sync_status, SyncStatus::Conflict);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn pull_applies_remote_documents_and_advances_checkpoint() {
        let f = fixture().await;
        let remote_record = AttendanceRecord::checked_in("u2", "2026-08-25", 5_000, 10.0);
        let doc = RemoteDocument::from_payload(
            remote_record.id.as_str(),
            remote_record.sync.updated_at,
            remote_record.sync.version,
            Some("other-device".to_string()),
            &remote_record,
        )
        .unwrap();
        f.remote.seed(COLLECTION_ATTENDANCE, doc).await;

        let entry = run(&f.manager).await;
        assert_eq!(entry.pulled[COLLECTION_ATTENDANCE], 1);
        assert!(f.store.get_attendance("u2", "2026-08-25").await.unwrap().is_some());
        assert_eq!(
            f.store.get_checkpoint(COLLECTION_ATTENDANCE).await.unwrap(),
            5_000
        );

        // Nothing new: second pull is empty
        let entry = run(&f.manager).await;
        assert_eq!(entry.total_pulled(), 0);
    }

    async fn seed_remote_attendance(
        remote: &MemoryRemoteStore,
        user_id: &str,
        updated_at: i64,
    ) {
        let record = AttendanceRecord::checked_in(user_id, "2026-08-25", updated_at, 10.0);
        let doc = RemoteDocument::from_payload(
            record.id.as_str(),
            record.sync.updated_at,
            record.sync.version,
            Some("other-device".to_string()),
            &record,
        )
        .unwrap();
        remote.seed(COLLECTION_ATTENDANCE, doc).await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn pull_handles_timestamp_ties_across_batch_boundaries() {
        let f = fixture().await;
        let mut config = f.store.load_sync_config().await.unwrap();
        config.batch_size = 2;
        f.store.save_sync_config(&config).await.unwrap();

        // Three documents share one timestamp, so a page ends mid-group
        for i in 0..3 {
            seed_remote_attendance(&f.remote, &format!("u{i}"), 5_000).await;
        }
        seed_remote_attendance(&f.remote, "u9", 6_000).await;

        let entry = run(&f.manager).await;
        assert_eq!(entry.pulled[COLLECTION_ATTENDANCE], 4);
        for i in 0..3 {
            assert!(f
                .store
                .get_attendance(&format!("u{i}"), "2026-08-25")
                .await
                .unwrap()
                .is_some());
        }
        assert_eq!(
            f.store.get_checkpoint(COLLECTION_ATTENDANCE).await.unwrap(),
            6_000
        );

        // Nothing left behind the checkpoint
        let entry = run(&f.manager).await;
        assert_eq!(entry.total_pulled(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn non_transient_failure_records_a_failed_run() {
        let f = fixture().await;
        let doc = RemoteDocument {
            id: "junk".to_string(),
            updated_at: 5_000,
            version: 1,
            origin_device: Some("other-device".to_string()),
            payload: json!({ "not": "an attendance record" }),
        };
        f.remote.seed(COLLECTION_ATTENDANCE, doc).await;

        let result = f.manager.run_sync(SyncTrigger::Manual, None).await;
        assert!(matches!(result, Err(Error::Serialization(_))));

        let entry = f.store.latest_sync_log().await.unwrap().unwrap();
        assert_eq!(entry.status, SyncRunStatus::Failed);
        assert!(!entry.errors.is_empty());

        // The manager is re-armed for the next trigger
        assert!(f.manager.run_sync(SyncTrigger::Manual, None).await.is_err());
        assert_eq!(f.store.list_sync_logs(10).await.unwrap().len(), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn pull_skips_documents_this_device_pushed() {
        let f = fixture().await;
        let record = AttendanceRecord::checked_in("u1", "2026-08-25", 1_000, 42.0);
        f.store.insert_attendance(&record).await.unwrap();

        // Push then pull within the same run; our own document must not
        // reimport even though it is past the checkpoint
        let entry = run(&f.manager).await;
        assert_eq!(entry.pushed[COLLECTION_ATTENDANCE], 1);
        assert_eq!(entry.pulled[COLLECTION_ATTENDANCE], 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn transient_failures_retry_and_succeed() {
        let f = fixture().await;
        let record = AttendanceRecord::checked_in("u1", "2026-08-25", 1_000, 42.0);
        f.store.insert_attendance(&record).await.unwrap();

        f.remote.fail_next(2);
        let entry = run(&f.manager).await;
        assert_eq!(entry.status, SyncRunStatus::Completed);
        assert_eq!(entry.pushed[COLLECTION_ATTENDANCE], 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn exhausted_retries_mark_document_failed_and_run_partial() {
        let f = fixture().await;
        let mut config = f.store.load_sync_config().await.unwrap();
        config.max_retries = 0;
        f.store.save_sync_config(&config).await.unwrap();

        let record = AttendanceRecord::checked_in("u1", "2026-08-25", 1_000, 42.0);
        f.store.insert_attendance(&record).await.unwrap();

        f.remote.fail_next(100);
        let entry = run(&f.manager).await;
        assert_eq!(entry.status, SyncRunStatus::Partial);
        assert!(!entry.errors.is_empty());
        assert_eq!(entry.total_pushed(), 0);

        let stored = f.store.get_attendance("u1", "2026-08-25").await.unwrap().unwrap();
        assert_eq!(stored.sync.sync_status, SyncStatus::Failed);
        assert!(stored.sync.is_dirty());

        // Next run with a healthy remote picks the document back up
        f.remote.fail_next(0);
        let entry = run(&f.manager).await;
        assert_eq!(entry.status, SyncRunStatus::Completed);
        assert_eq!(entry.pushed[COLLECTION_ATTENDANCE], 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unreachable_remote_fails_the_run() {
        let f = fixture().await;
        let record = AttendanceRecord::checked_in("u1", "2026-08-25", 1_000, 42.0);
        f.store.insert_attendance(&record).await.unwrap();

        f.remote.set_offline(true);
        let entry = run(&f.manager).await;
        assert_eq!(entry.status, SyncRunStatus::Failed);
        assert_eq!(entry.total_pushed(), 0);

        let stored = f.store.get_attendance("u1", "2026-08-25").await.unwrap().unwrap();
        assert_eq!(stored.sync.sync_status, SyncStatus::Pending);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn cancellation_exits_cleanly() {
        let f = fixture().await;
        let record = AttendanceRecord::checked_in("u1", "2026-08-25", 1_000, 42.0);
        f.store.insert_attendance(&record).await.unwrap();

        f.manager.request_cancel();
        let entry = run(&f.manager).await;
        assert_eq!(entry.status, SyncRunStatus::Partial);
        assert!(entry.errors.iter().any(|e| e.contains("cancelled")));
        assert_eq!(entry.total_pushed(), 0);

        f.manager.clear_cancel();
        let entry = run(&f.manager).await;
        assert_eq!(entry.status, SyncRunStatus::Completed);
        assert_eq!(entry.total_pushed(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn collection_subset_restricts_the_run() {
        let f = fixture().await;
        let record = AttendanceRecord::checked_in("u1", "2026-08-25", 1_000, 42.0);
        f.store.insert_attendance(&record).await.unwrap();
        let volunteer = Volunteer::new("priya", "Priya S", 1_000);
        f.store.upsert_volunteer(&volunteer).await.unwrap();

        let subset = BTreeSet::from([COLLECTION_VOLUNTEERS.to_string()]);
        let entry = f
            .manager
            .run_sync(SyncTrigger::Manual, Some(&subset))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.pushed.get(COLLECTION_ATTENDANCE), None);
        assert_eq!(entry.pushed[COLLECTION_VOLUNTEERS], 1);
        assert_eq!(f.store.count_dirty(COLLECTION_ATTENDANCE).await.unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn batching_drains_more_than_one_batch() {
        let f = fixture().await;
        let mut config = f.store.load_sync_config().await.unwrap();
        config.batch_size = 2;
        f.store.save_sync_config(&config).await.unwrap();

        for i in 0..5 {
            let record =
                AttendanceRecord::checked_in(format!("u{i}"), "2026-08-25", 1_000 + i, 42.0);
            f.store.insert_attendance(&record).await.unwrap();
        }

        let entry = run(&f.manager).await;
        assert_eq!(entry.pushed[COLLECTION_ATTENDANCE], 5);
        assert_eq!(f.remote.len(COLLECTION_ATTENDANCE).await, 5);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_trigger_is_coalesced() {
        let f = Arc::new(fixture().await);
        let record = AttendanceRecord::checked_in("u1", "2026-08-25", 1_000, 42.0);
        f.store.insert_attendance(&record).await.unwrap();

        // Slow the first run down so the second trigger lands mid-flight
        f.remote.fail_next(1);

        let m1 = Arc::clone(&f);
        let first = tokio::spawn(async move { m1.manager.run_sync(SyncTrigger::Manual, None).await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        let second = f.manager.run_sync(SyncTrigger::Reconnect, None).await.unwrap();
        assert!(second.is_none());

        let first = first.await.unwrap().unwrap();
        assert!(first.is_some());
        // The follow-up run also completed; both are in the log
        let logs = f.store.list_sync_logs(10).await.unwrap();
        assert_eq!(logs.len(), 2);
    }
}
