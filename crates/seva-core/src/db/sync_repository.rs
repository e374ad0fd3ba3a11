//! Sync bookkeeping repository: conflict log, run log, pull checkpoints,
//! and the persisted sync configuration.

use libsql::{params, Connection};

use crate::error::{Error, Result};
use crate::models::{
    ConflictFilter, ConflictLogEntry, ResolutionStrategy, SyncConfiguration, SyncLogEntry,
    SyncRunStatus, SyncTrigger,
};

const DEFAULT_LIST_LIMIT: usize = 50;

/// Trait for sync bookkeeping operations (async)
#[allow(async_fn_in_trait)]
pub trait SyncRepository {
    /// Append a conflict entry; returns it with the assigned row id
    async fn append_conflict(&self, entry: &ConflictLogEntry) -> Result<ConflictLogEntry>;

    /// Fetch a conflict entry by row id
    async fn get_conflict(&self, id: i64) -> Result<Option<ConflictLogEntry>>;

    /// List conflict entries, newest detection first
    async fn list_conflicts(&self, filter: &ConflictFilter) -> Result<Vec<ConflictLogEntry>>;

    /// Whether an unresolved entry already exists for this collision
    async fn has_open_conflict(
        &self,
        collection: &str,
        local_id: &str,
        conflict_field: &str,
    ) -> Result<bool>;

    /// Flip an entry to resolved; detection fields are never rewritten
    async fn resolve_conflict(
        &self,
        id: i64,
        strategy: ResolutionStrategy,
        resolved_at: i64,
        resolved_by: &str,
        notes: Option<&str>,
    ) -> Result<ConflictLogEntry>;

    /// Append a sync run entry; returns it with the assigned row id
    async fn append_sync_log(&self, entry: &SyncLogEntry) -> Result<SyncLogEntry>;

    /// Most recent sync run, if any
    async fn latest_sync_log(&self) -> Result<Option<SyncLogEntry>>;

    /// Recent sync runs, newest first
    async fn list_sync_logs(&self, limit: usize) -> Result<Vec<SyncLogEntry>>;

    /// Pull checkpoint for a collection (0 when never pulled)
    async fn get_checkpoint(&self, collection: &str) -> Result<i64>;

    /// Persist a pull checkpoint after a committed batch
    async fn set_checkpoint(&self, collection: &str, last_pulled_at: i64, now: i64) -> Result<()>;

    /// Load the persisted sync configuration (defaults when absent)
    async fn load_config(&self) -> Result<SyncConfiguration>;

    /// Persist the sync configuration
    async fn save_config(&self, config: &SyncConfiguration) -> Result<()>;

    /// Stable identifier for this device, created on first use
    async fn device_id(&self) -> Result<String>;
}

/// libSQL implementation of `SyncRepository`
pub struct LibSqlSyncRepository<'a> {
    conn: &'a Connection,
}

const CONFLICT_COLUMNS: &str = "id, collection, local_id, remote_id, conflict_field, local_value, \
     remote_value, detected_at, resolved, resolution_strategy, resolved_at, resolved_by, notes";

const SYNC_LOG_COLUMNS: &str =
    "id, start_time, end_time, trigger_source, pushed, pulled, conflicts, errors, status";

impl<'a> LibSqlSyncRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_conflict(row: &libsql::Row) -> Result<ConflictLogEntry> {
        let strategy: Option<String> = row.get(9)?;
        Ok(ConflictLogEntry {
            id: row.get(0)?,
            collection: row.get(1)?,
            local_id: row.get(2)?,
            remote_id: row.get(3)?,
            conflict_field: row.get(4)?,
            local_value: row.get(5)?,
            remote_value: row.get(6)?,
            detected_at: row.get(7)?,
            resolved: row.get::<i32>(8)? != 0,
            resolution_strategy: strategy
                .map(|s| s.parse::<ResolutionStrategy>().map_err(Error::Database))
                .transpose()?,
            resolved_at: row.get(10)?,
            resolved_by: row.get(11)?,
            notes: row.get(12)?,
        })
    }

    fn parse_sync_log(row: &libsql::Row) -> Result<SyncLogEntry> {
        let trigger: String = row.get(3)?;
        let pushed: String = row.get(4)?;
        let pulled: String = row.get(5)?;
        let conflicts: String = row.get(6)?;
        let errors: String = row.get(7)?;
        let status: String = row.get(8)?;

        Ok(SyncLogEntry {
            id: row.get(0)?,
            start_time: row.get(1)?,
            end_time: row.get(2)?,
            trigger: trigger.parse::<SyncTrigger>().map_err(Error::Database)?,
            pushed: serde_json::from_str(&pushed)?,
            pulled: serde_json::from_str(&pulled)?,
            conflicts: serde_json::from_str(&conflicts)?,
            errors: serde_json::from_str(&errors)?,
            status: status.parse::<SyncRunStatus>().map_err(Error::Database)?,
        })
    }

    async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let mut rows = self
            .conn
            .query("SELECT value FROM sync_settings WHERE key = ?", [key])
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO sync_settings (key, value) VALUES (?, ?)",
                [key, value],
            )
            .await?;
        Ok(())
    }

    async fn last_insert_id(&self) -> Result<i64> {
        let mut rows = self.conn.query("SELECT last_insert_rowid()", ()).await?;
        let row = rows
            .next()
            .await?
            .ok_or_else(|| Error::Database("last_insert_rowid returned no rows".to_string()))?;
        Ok(row.get(0)?)
    }
}

impl SyncRepository for LibSqlSyncRepository<'_> {
    async fn append_conflict(&self, entry: &ConflictLogEntry) -> Result<ConflictLogEntry> {
        self.conn
            .execute(
                "INSERT INTO conflict_log (collection, local_id, remote_id, conflict_field, \
                 local_value, remote_value, detected_at, resolved, resolution_strategy, \
                 resolved_at, resolved_by, notes) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    entry.collection.clone(),
                    entry.local_id.clone(),
                    entry.remote_id.clone(),
                    entry.conflict_field.clone(),
                    entry.local_value.clone(),
                    entry.remote_value.clone(),
                    entry.detected_at,
                    i32::from(entry.resolved),
                    entry.resolution_strategy.map(ResolutionStrategy::as_str),
                    entry.resolved_at,
                    entry.resolved_by.clone(),
                    entry.notes.clone(),
                ],
            )
            .await?;

        let mut inserted = entry.clone();
        inserted.id = self.last_insert_id().await?;
        Ok(inserted)
    }

    async fn get_conflict(&self, id: i64) -> Result<Option<ConflictLogEntry>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {CONFLICT_COLUMNS} FROM conflict_log WHERE id = ?"),
                params![id],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_conflict(&row)?)),
            None => Ok(None),
        }
    }

    async fn list_conflicts(&self, filter: &ConflictFilter) -> Result<Vec<ConflictLogEntry>> {
        let limit = if filter.limit == 0 {
            DEFAULT_LIST_LIMIT
        } else {
            filter.limit
        };

        // Two optional predicates; keep the SQL static per combination
        let mut sql = format!("SELECT {CONFLICT_COLUMNS} FROM conflict_log WHERE 1=1");
        let mut args: Vec<libsql::Value> = Vec::new();
        if let Some(collection) = &filter.collection {
            sql.push_str(" AND collection = ?");
            args.push(collection.as_str().into());
        }
        if filter.unresolved_only {
            sql.push_str(" AND resolved = 0");
        }
        sql.push_str(" ORDER BY detected_at DESC, id DESC LIMIT ?");
        args.push((limit as i64).into());

        let mut rows = self.conn.query(&sql, args).await?;
        let mut entries = Vec::new();
        while let Some(row) = rows.next().await? {
            entries.push(Self::parse_conflict(&row)?);
        }
        Ok(entries)
    }

    async fn has_open_conflict(
        &self,
        collection: &str,
        local_id: &str,
        conflict_field: &str,
    ) -> Result<bool> {
        let mut rows = self
            .conn
            .query(
                "SELECT EXISTS(SELECT 1 FROM conflict_log WHERE collection = ? AND local_id = ? \
                 AND conflict_field = ? AND resolved = 0)",
                params![collection, local_id, conflict_field],
            )
            .await?;
        let row = rows
            .next()
            .await?
            .ok_or_else(|| Error::Database("exists query returned no rows".to_string()))?;
        Ok(row.get::<i32>(0)? != 0)
    }

    async fn resolve_conflict(
        &self,
        id: i64,
        strategy: ResolutionStrategy,
        resolved_at: i64,
        resolved_by: &str,
        notes: Option<&str>,
    ) -> Result<ConflictLogEntry> {
        let affected = self
            .conn
            .execute(
                "UPDATE conflict_log SET resolved = 1, resolution_strategy = ?, resolved_at = ?, \
                 resolved_by = ?, notes = COALESCE(?, notes) WHERE id = ? AND resolved = 0",
                params![strategy.as_str(), resolved_at, resolved_by, notes, id],
            )
            .await?;

        if affected == 0 {
            return match self.get_conflict(id).await? {
                Some(entry) if entry.resolved => Err(Error::InvalidInput(format!(
                    "conflict {id} is already resolved"
                ))),
                Some(_) => Err(Error::Database(format!("conflict {id} update failed"))),
                None => Err(Error::NotFound(format!("conflict/{id}"))),
            };
        }

        self.get_conflict(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("conflict/{id}")))
    }

    async fn append_sync_log(&self, entry: &SyncLogEntry) -> Result<SyncLogEntry> {
        self.conn
            .execute(
                "INSERT INTO sync_log (start_time, end_time, trigger_source, pushed, pulled, conflicts, \
                 errors, status) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    entry.start_time,
                    entry.end_time,
                    entry.trigger.as_str(),
                    serde_json::to_string(&entry.pushed)?,
                    serde_json::to_string(&entry.pulled)?,
                    serde_json::to_string(&entry.conflicts)?,
                    serde_json::to_string(&entry.errors)?,
                    entry.status.as_str(),
                ],
            )
            .await?;

        let mut inserted = entry.clone();
        inserted.id = self.last_insert_id().await?;
        Ok(inserted)
    }

    async fn latest_sync_log(&self) -> Result<Option<SyncLogEntry>> {
        Ok(self.list_sync_logs(1).await?.into_iter().next())
    }

    async fn list_sync_logs(&self, limit: usize) -> Result<Vec<SyncLogEntry>> {
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT {SYNC_LOG_COLUMNS} FROM sync_log ORDER BY start_time DESC, id DESC \
                     LIMIT ?"
                ),
                params![limit as i64],
            )
            .await?;

        let mut entries = Vec::new();
        while let Some(row) = rows.next().await? {
            entries.push(Self::parse_sync_log(&row)?);
        }
        Ok(entries)
    }

    async fn get_checkpoint(&self, collection: &str) -> Result<i64> {
        let mut rows = self
            .conn
            .query(
                "SELECT last_pulled_at FROM sync_checkpoints WHERE collection = ?",
                [collection],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(row.get(0)?),
            None => Ok(0),
        }
    }

    async fn set_checkpoint(&self, collection: &str, last_pulled_at: i64, now: i64) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO sync_checkpoints (collection, last_pulled_at, updated_at) \
                 VALUES (?, ?, ?) ON CONFLICT(collection) DO UPDATE SET \
                 last_pulled_at = excluded.last_pulled_at, updated_at = excluded.updated_at",
                params![collection, last_pulled_at, now],
            )
            .await?;
        Ok(())
    }

    async fn load_config(&self) -> Result<SyncConfiguration> {
        match self.get_setting("sync_configuration").await? {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Ok(SyncConfiguration::default()),
        }
    }

    async fn save_config(&self, config: &SyncConfiguration) -> Result<()> {
        let json = serde_json::to_string(config)?;
        self.set_setting("sync_configuration", &json).await
    }

    async fn device_id(&self) -> Result<String> {
        if let Some(id) = self.get_setting("device_id").await? {
            return Ok(id);
        }
        let id = uuid::Uuid::now_v7().to_string();
        self.set_setting("device_id", &id).await?;
        Ok(id)
    }
}
