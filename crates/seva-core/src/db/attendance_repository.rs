//! Attendance repository implementation

use libsql::{params, Connection};

use crate::error::{Error, Result};
use crate::models::{AttendanceRecord, DocId, Origin, SyncStatus, COLLECTION_ATTENDANCE};

/// Trait for attendance storage operations (async)
#[allow(async_fn_in_trait)]
pub trait AttendanceRepository {
    /// Insert or update a record by id
    async fn upsert(&self, record: &AttendanceRecord) -> Result<()>;

    /// Fetch the record for a (user, day) identity
    async fn get(&self, user_id: &str, date: &str) -> Result<Option<AttendanceRecord>>;

    /// Fetch a record by id
    async fn get_by_id(&self, id: &DocId) -> Result<Option<AttendanceRecord>>;

    /// Records not yet confirmed remotely, oldest mutation first.
    ///
    /// Conflicted records are excluded: they wait for explicit resolution
    /// before re-entering the push queue.
    async fn list_dirty(&self, limit: usize) -> Result<Vec<AttendanceRecord>>;

    /// Count of records awaiting sync (conflicted ones included)
    async fn count_dirty(&self) -> Result<u64>;

    /// Confirm remote application of a record.
    ///
    /// Guarded by the version the pushed snapshot carried: if the record was
    /// mutated after the snapshot was taken, nothing is written and `false`
    /// is returned, leaving the record dirty for the next run.
    async fn mark_synced(&self, id: &DocId, synced_at: i64, expected_version: i64) -> Result<bool>;

    /// Flip the sync-state flag without touching `updated_at`
    async fn set_sync_status(&self, id: &DocId, status: SyncStatus) -> Result<()>;

    /// Write a mutation guarded by the expected version; bumps the version
    async fn update_guarded(&self, record: &AttendanceRecord, expected_version: i64) -> Result<()>;

    /// Apply a remote record to the local store.
    ///
    /// Identity is (user, date). A missing row is inserted; an existing row is
    /// overwritten only when the incoming `updated_at` is strictly greater
    /// (local precedence on ties). Returns whether anything was written.
    async fn apply_remote(&self, incoming: &AttendanceRecord) -> Result<bool>;
}

/// libSQL implementation of `AttendanceRepository`
pub struct LibSqlAttendanceRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlAttendanceRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_record(row: &libsql::Row) -> Result<AttendanceRecord> {
        let id: String = row.get(0)?;
        let origin: String = row.get(11)?;
        let sync_status: String = row.get(12)?;
        let extra: String = row.get(14)?;

        Ok(AttendanceRecord {
            id: id
                .parse()
                .map_err(|_| Error::Database(format!("invalid attendance id: {id}")))?,
            user_id: row.get(1)?,
            date: row.get(2)?,
            check_in_time: row.get(3)?,
            check_out_time: row.get(4)?,
            overtime_hours: row.get(5)?,
            outside_hours: row.get(6)?,
            distance_meters: row.get(7)?,
            is_present: row.get::<i32>(8)? != 0,
            sync: crate::models::SyncMeta {
                updated_at: row.get(9)?,
                synced_at: row.get(10)?,
                origin: origin
                    .parse::<Origin>()
                    .map_err(Error::Database)?,
                sync_status: sync_status
                    .parse::<SyncStatus>()
                    .map_err(Error::Database)?,
                version: row.get(13)?,
            },
            extra: serde_json::from_str(&extra)?,
        })
    }

    async fn query_one(&self, sql: &str, id_or_key: Vec<libsql::Value>) -> Result<Option<AttendanceRecord>> {
        let mut rows = self.conn.query(sql, id_or_key).await?;
        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_record(&row)?)),
            None => Ok(None),
        }
    }

    async fn write_row(&self, sql: &str, record: &AttendanceRecord) -> Result<u64> {
        let extra = serde_json::to_string(&record.extra)?;
        let affected = self
            .conn
            .execute(
                sql,
                params![
                    record.id.as_str(),
                    record.user_id.clone(),
                    record.date.clone(),
                    record.check_in_time,
                    record.check_out_time,
                    record.overtime_hours,
                    record.outside_hours,
                    record.distance_meters,
                    i32::from(record.is_present),
                    record.sync.updated_at,
                    record.sync.synced_at,
                    record.sync.origin.as_str(),
                    record.sync.sync_status.as_str(),
                    record.sync.version,
                    extra,
                ],
            )
            .await?;
        Ok(affected)
    }
}

const SELECT_COLUMNS: &str = "id, user_id, date, check_in_time, check_out_time, overtime_hours, \
     outside_hours, distance_meters, is_present, updated_at, synced_at, origin, sync_status, \
     version, extra";

const UPSERT_SQL: &str = "INSERT INTO attendance (id, user_id, date, check_in_time, check_out_time, \
     overtime_hours, outside_hours, distance_meters, is_present, updated_at, synced_at, origin, \
     sync_status, version, extra) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
     ON CONFLICT(id) DO UPDATE SET \
     user_id = excluded.user_id, date = excluded.date, check_in_time = excluded.check_in_time, \
     check_out_time = excluded.check_out_time, overtime_hours = excluded.overtime_hours, \
     outside_hours = excluded.outside_hours, distance_meters = excluded.distance_meters, \
     is_present = excluded.is_present, updated_at = excluded.updated_at, \
     synced_at = excluded.synced_at, origin = excluded.origin, \
     sync_status = excluded.sync_status, version = excluded.version, extra = excluded.extra";

impl AttendanceRepository for LibSqlAttendanceRepository<'_> {
    async fn upsert(&self, record: &AttendanceRecord) -> Result<()> {
        self.write_row(UPSERT_SQL, record).await?;
        Ok(())
    }

    async fn get(&self, user_id: &str, date: &str) -> Result<Option<AttendanceRecord>> {
        self.query_one(
            &format!("SELECT {SELECT_COLUMNS} FROM attendance WHERE user_id = ? AND date = ?"),
            vec![user_id.into(), date.into()],
        )
        .await
    }

    async fn get_by_id(&self, id: &DocId) -> Result<Option<AttendanceRecord>> {
        self.query_one(
            &format!("SELECT {SELECT_COLUMNS} FROM attendance WHERE id = ?"),
            vec![id.as_str().into()],
        )
        .await
    }

    async fn list_dirty(&self, limit: usize) -> Result<Vec<AttendanceRecord>> {
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT {SELECT_COLUMNS} FROM attendance \
                     WHERE (synced_at IS NULL OR synced_at < updated_at) \
                       AND sync_status != 'conflict' \
                     ORDER BY updated_at ASC LIMIT ?"
                ),
                params![limit as i64],
            )
            .await?;

        let mut records = Vec::new();
        while let Some(row) = rows.next().await? {
            records.push(Self::parse_record(&row)?);
        }
        Ok(records)
    }

    async fn count_dirty(&self) -> Result<u64> {
        let mut rows = self
            .conn
            .query(
                "SELECT COUNT(*) FROM attendance WHERE synced_at IS NULL OR synced_at < updated_at",
                (),
            )
            .await?;
        let row = rows
            .next()
            .await?
            .ok_or_else(|| Error::Database("count query returned no rows".to_string()))?;
        let count: i64 = row.get(0)?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    async fn mark_synced(&self, id: &DocId, synced_at: i64, expected_version: i64) -> Result<bool> {
        let affected = self
            .conn
            .execute(
                "UPDATE attendance SET synced_at = ?, sync_status = 'synced' \
                 WHERE id = ? AND version = ?",
                params![synced_at, id.as_str(), expected_version],
            )
            .await?;
        Ok(affected > 0)
    }

    async fn set_sync_status(&self, id: &DocId, status: SyncStatus) -> Result<()> {
        let affected = self
            .conn
            .execute(
                "UPDATE attendance SET sync_status = ? WHERE id = ?",
                params![status.as_str(), id.as_str()],
            )
            .await?;
        if affected == 0 {
            return Err(Error::NotFound(format!("attendance/{id}")));
        }
        Ok(())
    }

    async fn update_guarded(&self, record: &AttendanceRecord, expected_version: i64) -> Result<()> {
        let extra = serde_json::to_string(&record.extra)?;
        let affected = self
            .conn
            .execute(
                "UPDATE attendance SET check_in_time = ?, check_out_time = ?, overtime_hours = ?, \
                 outside_hours = ?, distance_meters = ?, is_present = ?, updated_at = ?, \
                 synced_at = ?, origin = ?, sync_status = ?, version = ?, extra = ? \
                 WHERE id = ? AND version = ?",
                params![
                    record.check_in_time,
                    record.check_out_time,
                    record.overtime_hours,
                    record.outside_hours,
                    record.distance_meters,
                    i32::from(record.is_present),
                    record.sync.updated_at,
                    record.sync.synced_at,
                    record.sync.origin.as_str(),
                    record.sync.sync_status.as_str(),
                    expected_version + 1,
                    extra,
                    record.id.as_str(),
                    expected_version,
                ],
            )
            .await?;

        if affected == 0 {
            return if self.get_by_id(&record.id).await?.is_some() {
                Err(Error::VersionConflict {
                    collection: COLLECTION_ATTENDANCE.to_string(),
                    id: record.id.to_string(),
                    expected: expected_version,
                })
            } else {
                Err(Error::NotFound(format!("attendance/{}", record.id)))
            };
        }
        Ok(())
    }

    async fn apply_remote(&self, incoming: &AttendanceRecord) -> Result<bool> {
        let Some(existing) = self.get(&incoming.user_id, &incoming.date).await? else {
            let mut record = incoming.clone();
            record.sync.origin = Origin::Remote;
            record.sync.sync_status = SyncStatus::Synced;
            record.sync.synced_at = Some(incoming.sync.updated_at);
            self.upsert(&record).await?;
            return Ok(true);
        };

        // Strictly newer wins; the local copy keeps its row id
        if incoming.sync.updated_at <= existing.sync.updated_at {
            return Ok(false);
        }

        let mut record = incoming.clone();
        record.id = existing.id;
        record.sync.origin = Origin::Remote;
        record.sync.sync_status = SyncStatus::Synced;
        record.sync.synced_at = Some(incoming.sync.updated_at);
        record.sync.version = existing.sync.version + 1;
        self.upsert(&record).await?;
        Ok(true)
    }
}
