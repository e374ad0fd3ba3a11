//! Shared local store service used by the recorder and the sync engine.
//!
//! Wraps the database behind a clone-able handle and owns the per-record lock
//! map: the recorder and the sync apply path must hold the same lock before
//! mutating a record, so a pull-applied remote update and a concurrent local
//! check-out cannot race.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::db::{
    AttendanceRepository, Database, LibSqlAttendanceRepository, LibSqlSyncRepository,
    LibSqlVolunteerRepository, SyncRepository, VolunteerRepository,
};
use crate::error::{Error, Result};
use crate::models::{
    AttendanceRecord, ConflictFilter, ConflictLogEntry, DocId, ResolutionStrategy,
    SyncConfiguration, SyncLogEntry, SyncStatus, Volunteer, COLLECTION_ATTENDANCE,
    COLLECTION_VOLUNTEERS,
};
use crate::remote::RemoteDocument;

/// Per-record mutual exclusion, keyed by the record's lock key.
#[derive(Default)]
struct LockMap {
    locks: std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl LockMap {
    async fn acquire(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().expect("lock map poisoned");
            Arc::clone(locks.entry(key.to_string()).or_default())
        };
        lock.lock_owned().await
    }
}

/// Thread-safe service for local persistence and sync bookkeeping.
#[derive(Clone)]
pub struct LocalStore {
    db: Arc<Mutex<Database>>,
    locks: Arc<LockMap>,
    device_id: String,
}

impl LocalStore {
    /// Open a store at the given filesystem path.
    pub async fn open_path(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::open(&db_path).await?;
        Self::finish_open(db).await
    }

    /// Open an in-memory store (primarily for tests).
    pub async fn open_in_memory() -> Result<Self> {
        let db = Database::open_in_memory().await?;
        Self::finish_open(db).await
    }

    async fn finish_open(db: Database) -> Result<Self> {
        let device_id = {
            let repo = LibSqlSyncRepository::new(db.connection());
            repo.device_id().await?
        };
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            locks: Arc::new(LockMap::default()),
            device_id,
        })
    }

    /// Stable identifier for this device, stamped on pushed documents.
    #[must_use]
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Acquire the per-record lock for a key.
    pub async fn lock_record(&self, key: &str) -> OwnedMutexGuard<()> {
        self.locks.acquire(key).await
    }

    // -----------------------------------------------------------------------
    // Attendance
    // -----------------------------------------------------------------------

    /// Fetch the attendance record for a (user, day) identity.
    pub async fn get_attendance(&self, user_id: &str, date: &str) -> Result<Option<AttendanceRecord>> {
        let db = self.db.lock().await;
        let repo = LibSqlAttendanceRepository::new(db.connection());
        repo.get(user_id, date).await
    }

    /// Insert a freshly authored attendance record.
    pub async fn insert_attendance(&self, record: &AttendanceRecord) -> Result<()> {
        let db = self.db.lock().await;
        let repo = LibSqlAttendanceRepository::new(db.connection());
        repo.upsert(record).await
    }

    /// Write an attendance mutation guarded by the expected version.
    pub async fn update_attendance(
        &self,
        record: &AttendanceRecord,
        expected_version: i64,
    ) -> Result<()> {
        let db = self.db.lock().await;
        let repo = LibSqlAttendanceRepository::new(db.connection());
        repo.update_guarded(record, expected_version).await
    }

    // -----------------------------------------------------------------------
    // Volunteers
    // -----------------------------------------------------------------------

    /// Fetch a volunteer by id.
    pub async fn get_volunteer(&self, id: &DocId) -> Result<Option<Volunteer>> {
        let db = self.db.lock().await;
        let repo = LibSqlVolunteerRepository::new(db.connection());
        repo.get(id).await
    }

    /// Insert or update a volunteer.
    pub async fn upsert_volunteer(&self, volunteer: &Volunteer) -> Result<()> {
        let db = self.db.lock().await;
        let repo = LibSqlVolunteerRepository::new(db.connection());
        repo.upsert(volunteer).await
    }

    // -----------------------------------------------------------------------
    // Collection-level sync surface
    // -----------------------------------------------------------------------

    /// Dirty documents for a collection, as wire envelopes, oldest first.
    pub async fn dirty_documents(&self, collection: &str, limit: usize) -> Result<Vec<RemoteDocument>> {
        let db = self.db.lock().await;
        match collection {
            COLLECTION_ATTENDANCE => {
                let repo = LibSqlAttendanceRepository::new(db.connection());
                repo.list_dirty(limit)
                    .await?
                    .iter()
                    .map(|record| self.attendance_envelope(record))
                    .collect()
            }
            COLLECTION_VOLUNTEERS => {
                let repo = LibSqlVolunteerRepository::new(db.connection());
                repo.list_dirty(limit)
                    .await?
                    .iter()
                    .map(|volunteer| self.volunteer_envelope(volunteer))
                    .collect()
            }
            other => Err(Error::InvalidInput(format!("unknown collection: {other}"))),
        }
    }

    /// Count of documents awaiting sync in a collection.
    pub async fn count_dirty(&self, collection: &str) -> Result<u64> {
        let db = self.db.lock().await;
        match collection {
            COLLECTION_ATTENDANCE => {
                let repo = LibSqlAttendanceRepository::new(db.connection());
                repo.count_dirty().await
            }
            COLLECTION_VOLUNTEERS => {
                let repo = LibSqlVolunteerRepository::new(db.connection());
                repo.count_dirty().await
            }
            other => Err(Error::InvalidInput(format!("unknown collection: {other}"))),
        }
    }

    /// Confirm remote application of a document, under the per-record lock.
    ///
    /// Guarded by the version the pushed snapshot carried: returns `false`
    /// without writing when the document was mutated after the snapshot was
    /// taken (it stays dirty for the next run) or no longer exists.
    pub async fn mark_synced(
        &self,
        collection: &str,
        id: &str,
        synced_at: i64,
        expected_version: i64,
    ) -> Result<bool> {
        let doc_id = parse_doc_id(collection, id)?;
        match collection {
            COLLECTION_ATTENDANCE => {
                let key = {
                    let db = self.db.lock().await;
                    let repo = LibSqlAttendanceRepository::new(db.connection());
                    match repo.get_by_id(&doc_id).await? {
                        Some(record) => AttendanceRecord::lock_key(&record.user_id, &record.date),
                        None => return Ok(false),
                    }
                };
                let _guard = self.lock_record(&key).await;
                let db = self.db.lock().await;
                let repo = LibSqlAttendanceRepository::new(db.connection());
                repo.mark_synced(&doc_id, synced_at, expected_version).await
            }
            COLLECTION_VOLUNTEERS => {
                let _guard = self.lock_record(&Volunteer::lock_key(id)).await;
                let db = self.db.lock().await;
                let repo = LibSqlVolunteerRepository::new(db.connection());
                repo.mark_synced(&doc_id, synced_at, expected_version).await
            }
            other => Err(Error::InvalidInput(format!("unknown collection: {other}"))),
        }
    }

    /// Flip the sync-state flag of a document.
    pub async fn set_sync_status(&self, collection: &str, id: &str, status: SyncStatus) -> Result<()> {
        let doc_id = parse_doc_id(collection, id)?;
        let db = self.db.lock().await;
        match collection {
            COLLECTION_ATTENDANCE => {
                let repo = LibSqlAttendanceRepository::new(db.connection());
                repo.set_sync_status(&doc_id, status).await
            }
            COLLECTION_VOLUNTEERS => {
                let repo = LibSqlVolunteerRepository::new(db.connection());
                repo.set_sync_status(&doc_id, status).await
            }
            other => Err(Error::InvalidInput(format!("unknown collection: {other}"))),
        }
    }

    /// Fetch a local document as a wire envelope.
    pub async fn get_document(&self, collection: &str, id: &str) -> Result<Option<RemoteDocument>> {
        let doc_id = parse_doc_id(collection, id)?;
        let db = self.db.lock().await;
        match collection {
            COLLECTION_ATTENDANCE => {
                let repo = LibSqlAttendanceRepository::new(db.connection());
                match repo.get_by_id(&doc_id).await? {
                    Some(record) => Ok(Some(self.attendance_envelope(&record)?)),
                    None => Ok(None),
                }
            }
            COLLECTION_VOLUNTEERS => {
                let repo = LibSqlVolunteerRepository::new(db.connection());
                match repo.get(&doc_id).await? {
                    Some(volunteer) => Ok(Some(self.volunteer_envelope(&volunteer)?)),
                    None => Ok(None),
                }
            }
            other => Err(Error::InvalidInput(format!("unknown collection: {other}"))),
        }
    }

    /// Apply a remote document under the per-record lock.
    ///
    /// Returns whether anything was written (strictly-newer wins, local
    /// precedence on ties).
    pub async fn apply_remote(&self, collection: &str, doc: &RemoteDocument) -> Result<bool> {
        match collection {
            COLLECTION_ATTENDANCE => {
                let record: AttendanceRecord = doc.parse()?;
                let _guard = self
                    .lock_record(&AttendanceRecord::lock_key(&record.user_id, &record.date))
                    .await;
                let db = self.db.lock().await;
                let repo = LibSqlAttendanceRepository::new(db.connection());
                repo.apply_remote(&record).await
            }
            COLLECTION_VOLUNTEERS => {
                let volunteer: Volunteer = doc.parse()?;
                let _guard = self
                    .lock_record(&Volunteer::lock_key(&volunteer.id.as_str()))
                    .await;
                let db = self.db.lock().await;
                let repo = LibSqlVolunteerRepository::new(db.connection());
                repo.apply_remote(&volunteer).await
            }
            other => Err(Error::InvalidInput(format!("unknown collection: {other}"))),
        }
    }

    /// Overwrite a single payload field on a local document and re-mark it
    /// pending. Used by rename/merge conflict resolution.
    pub async fn set_field(
        &self,
        collection: &str,
        id: &str,
        field: &str,
        value: &Value,
        now_ms: i64,
    ) -> Result<()> {
        let doc_id = parse_doc_id(collection, id)?;
        match collection {
            COLLECTION_VOLUNTEERS => {
                let _guard = self.lock_record(&Volunteer::lock_key(id)).await;
                let db = self.db.lock().await;
                let repo = LibSqlVolunteerRepository::new(db.connection());
                let mut volunteer = repo
                    .get(&doc_id)
                    .await?
                    .ok_or_else(|| Error::NotFound(format!("{collection}/{id}")))?;
                let expected = volunteer.sync.version;

                match field {
                    "login" => volunteer.login = string_value(field, value)?,
                    "display_name" => volunteer.display_name = string_value(field, value)?,
                    other => {
                        volunteer.extra.insert(other.to_string(), value.clone());
                    }
                }
                volunteer.sync.touch(now_ms);
                repo.update_guarded(&volunteer, expected).await
            }
            COLLECTION_ATTENDANCE => {
                let key = {
                    let db = self.db.lock().await;
                    let repo = LibSqlAttendanceRepository::new(db.connection());
                    let record = repo
                        .get_by_id(&doc_id)
                        .await?
                        .ok_or_else(|| Error::NotFound(format!("{collection}/{id}")))?;
                    AttendanceRecord::lock_key(&record.user_id, &record.date)
                };
                let _guard = self.lock_record(&key).await;
                let db = self.db.lock().await;
                let repo = LibSqlAttendanceRepository::new(db.connection());
                let mut record = repo
                    .get_by_id(&doc_id)
                    .await?
                    .ok_or_else(|| Error::NotFound(format!("{collection}/{id}")))?;
                let expected = record.sync.version;

                record.extra.insert(field.to_string(), value.clone());
                record.sync.touch(now_ms);
                repo.update_guarded(&record, expected).await
            }
            other => Err(Error::InvalidInput(format!("unknown collection: {other}"))),
        }
    }

    fn attendance_envelope(&self, record: &AttendanceRecord) -> Result<RemoteDocument> {
        RemoteDocument::from_payload(
            record.id.as_str(),
            record.sync.updated_at,
            record.sync.version,
            Some(self.device_id.clone()),
            record,
        )
    }

    fn volunteer_envelope(&self, volunteer: &Volunteer) -> Result<RemoteDocument> {
        RemoteDocument::from_payload(
            volunteer.id.as_str(),
            volunteer.sync.updated_at,
            volunteer.sync.version,
            Some(self.device_id.clone()),
            volunteer,
        )
    }

    // -----------------------------------------------------------------------
    // Sync bookkeeping passthroughs
    // -----------------------------------------------------------------------

    /// Append a conflict log entry.
    pub async fn append_conflict(&self, entry: &ConflictLogEntry) -> Result<ConflictLogEntry> {
        let db = self.db.lock().await;
        let repo = LibSqlSyncRepository::new(db.connection());
        repo.append_conflict(entry).await
    }

    /// Fetch a conflict log entry.
    pub async fn get_conflict(&self, id: i64) -> Result<Option<ConflictLogEntry>> {
        let db = self.db.lock().await;
        let repo = LibSqlSyncRepository::new(db.connection());
        repo.get_conflict(id).await
    }

    /// List conflict log entries.
    pub async fn list_conflicts(&self, filter: &ConflictFilter) -> Result<Vec<ConflictLogEntry>> {
        let db = self.db.lock().await;
        let repo = LibSqlSyncRepository::new(db.connection());
        repo.list_conflicts(filter).await
    }

    /// Whether an unresolved conflict row already exists for this collision.
    pub async fn has_open_conflict(
        &self,
        collection: &str,
        local_id: &str,
        conflict_field: &str,
    ) -> Result<bool> {
        let db = self.db.lock().await;
        let repo = LibSqlSyncRepository::new(db.connection());
        repo.has_open_conflict(collection, local_id, conflict_field).await
    }

    /// Flip a conflict log entry to resolved.
    pub async fn resolve_conflict_row(
        &self,
        id: i64,
        strategy: ResolutionStrategy,
        resolved_at: i64,
        resolved_by: &str,
        notes: Option<&str>,
    ) -> Result<ConflictLogEntry> {
        let db = self.db.lock().await;
        let repo = LibSqlSyncRepository::new(db.connection());
        repo.resolve_conflict(id, strategy, resolved_at, resolved_by, notes)
            .await
    }

    /// Append a sync run entry.
    pub async fn append_sync_log(&self, entry: &SyncLogEntry) -> Result<SyncLogEntry> {
        let db = self.db.lock().await;
        let repo = LibSqlSyncRepository::new(db.connection());
        repo.append_sync_log(entry).await
    }

    /// Most recent sync run.
    pub async fn latest_sync_log(&self) -> Result<Option<SyncLogEntry>> {
        let db = self.db.lock().await;
        let repo = LibSqlSyncRepository::new(db.connection());
        repo.latest_sync_log().await
    }

    /// Recent sync runs, newest first.
    pub async fn list_sync_logs(&self, limit: usize) -> Result<Vec<SyncLogEntry>> {
        let db = self.db.lock().await;
        let repo = LibSqlSyncRepository::new(db.connection());
        repo.list_sync_logs(limit).await
    }

    /// Pull checkpoint for a collection.
    pub async fn get_checkpoint(&self, collection: &str) -> Result<i64> {
        let db = self.db.lock().await;
        let repo = LibSqlSyncRepository::new(db.connection());
        repo.get_checkpoint(collection).await
    }

    /// Persist a pull checkpoint.
    pub async fn set_checkpoint(&self, collection: &str, last_pulled_at: i64, now: i64) -> Result<()> {
        let db = self.db.lock().await;
        let repo = LibSqlSyncRepository::new(db.connection());
        repo.set_checkpoint(collection, last_pulled_at, now).await
    }

    /// Load the persisted sync configuration.
    pub async fn load_sync_config(&self) -> Result<SyncConfiguration> {
        let db = self.db.lock().await;
        let repo = LibSqlSyncRepository::new(db.connection());
        repo.load_config().await
    }

    /// Persist the sync configuration.
    pub async fn save_sync_config(&self, config: &SyncConfiguration) -> Result<()> {
        let db = self.db.lock().await;
        let repo = LibSqlSyncRepository::new(db.connection());
        repo.save_config(config).await
    }
}

fn parse_doc_id(collection: &str, id: &str) -> Result<DocId> {
    id.parse()
        .map_err(|_| Error::InvalidInput(format!("invalid {collection} id: {id}")))
}

fn string_value(field: &str, value: &Value) -> Result<String> {
    value
        .as_str()
        .map(ToString::to_string)
        .ok_or_else(|| Error::InvalidInput(format!("field '{field}' requires a string value")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test(flavor = "multi_thread")]
    async fn dirty_documents_carry_device_origin() {
        let store = LocalStore::open_in_memory().await.unwrap();
        let record = AttendanceRecord::checked_in("u1", "2026-08-25", 1_000, 42.0);
        store.insert_attendance(&record).await.unwrap();

        let docs = store.dirty_documents(COLLECTION_ATTENDANCE, 10).await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id, record.id.as_str());
        assert_eq!(docs[0].origin_device.as_deref(), Some(store.device_id()));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unknown_collection_is_rejected() {
        let store = LocalStore::open_in_memory().await.unwrap();
        assert!(matches!(
            store.dirty_documents("bookings", 10).await,
            Err(Error::InvalidInput(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn set_field_renames_volunteer_login_and_marks_pending() {
        let store = LocalStore::open_in_memory().await.unwrap();
        let volunteer = Volunteer::new("priya", "Priya S", 1_000);
        store.upsert_volunteer(&volunteer).await.unwrap();
        store
            .set_sync_status(COLLECTION_VOLUNTEERS, &volunteer.id.as_str(), SyncStatus::Conflict)
            .await
            .unwrap();

        store
            .set_field(
                COLLECTION_VOLUNTEERS,
                &volunteer.id.as_str(),
                "login",
                &json!("priya2"),
                2_000,
            )
            .await
            .unwrap();

        let stored = store.get_volunteer(&volunteer.id).await.unwrap().unwrap();
        assert_eq!(stored.login, "priya2");
        assert_eq!(stored.sync.sync_status, SyncStatus::Pending);
        assert_eq!(stored.sync.version, 2);
        assert!(stored.sync.is_dirty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn mark_synced_skips_concurrently_mutated_record() {
        let store = LocalStore::open_in_memory().await.unwrap();
        let record = AttendanceRecord::checked_in("u1", "2026-08-25", 1_000, 42.0);
        store.insert_attendance(&record).await.unwrap();

        let snapshots = store.dirty_documents(COLLECTION_ATTENDANCE, 10).await.unwrap();
        let (snapshot_ts, snapshot_version) = (snapshots[0].updated_at, snapshots[0].version);

        // A check-out commits after the snapshot was taken
        let mut updated = record.clone();
        updated.check_out_time = Some(2_000);
        updated.sync.touch(2_000);
        store.update_attendance(&updated, 1).await.unwrap();

        let marked = store
            .mark_synced(COLLECTION_ATTENDANCE, &record.id.as_str(), snapshot_ts, snapshot_version)
            .await
            .unwrap();
        assert!(!marked);

        // The newer mutation survives and stays queued
        let stored = store.get_attendance("u1", "2026-08-25").await.unwrap().unwrap();
        assert_eq!(stored.sync.version, 2);
        assert_eq!(stored.check_out_time, Some(2_000));
        assert!(stored.sync.is_dirty());
        assert_eq!(store.count_dirty(COLLECTION_ATTENDANCE).await.unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn set_field_annotates_attendance_and_marks_pending() {
        let store = LocalStore::open_in_memory().await.unwrap();
        let record = AttendanceRecord::checked_in("u1", "2026-08-25", 1_000, 42.0);
        store.insert_attendance(&record).await.unwrap();

        store
            .set_field(
                COLLECTION_ATTENDANCE,
                &record.id.as_str(),
                "resolution_note",
                &json!("merged by operator"),
                2_000,
            )
            .await
            .unwrap();

        let stored = store.get_attendance("u1", "2026-08-25").await.unwrap().unwrap();
        assert_eq!(stored.extra.get("resolution_note"), Some(&json!("merged by operator")));
        assert_eq!(stored.sync.sync_status, SyncStatus::Pending);
        assert_eq!(stored.sync.version, 2);
        assert!(stored.sync.is_dirty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn apply_remote_dispatches_by_collection() {
        let store = LocalStore::open_in_memory().await.unwrap();
        let record = AttendanceRecord::checked_in("u1", "2026-08-25", 1_000, 42.0);
        let doc = RemoteDocument::from_payload(
            record.id.as_str(),
            record.sync.updated_at,
            record.sync.version,
            Some("other-device".to_string()),
            &record,
        )
        .unwrap();

        assert!(store.apply_remote(COLLECTION_ATTENDANCE, &doc).await.unwrap());
        let stored = store.get_attendance("u1", "2026-08-25").await.unwrap().unwrap();
        assert!(!stored.sync.is_dirty());
    }
}
