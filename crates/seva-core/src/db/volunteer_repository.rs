//! Volunteer repository implementation

use libsql::{params, Connection};

use crate::error::{Error, Result};
use crate::models::{DocId, Origin, SyncStatus, Volunteer, COLLECTION_VOLUNTEERS};

/// Trait for volunteer storage operations (async)
#[allow(async_fn_in_trait)]
pub trait VolunteerRepository {
    /// Insert or update a volunteer by id
    async fn upsert(&self, volunteer: &Volunteer) -> Result<()>;

    /// Fetch a volunteer by id
    async fn get(&self, id: &DocId) -> Result<Option<Volunteer>>;

    /// Volunteers not yet confirmed remotely, oldest mutation first
    /// (conflicted rows excluded, they wait for resolution)
    async fn list_dirty(&self, limit: usize) -> Result<Vec<Volunteer>>;

    /// Count of volunteers awaiting sync (conflicted ones included)
    async fn count_dirty(&self) -> Result<u64>;

    /// Confirm remote application of a volunteer.
    ///
    /// Guarded by the version the pushed snapshot carried: if the volunteer
    /// was mutated after the snapshot was taken, nothing is written and
    /// `false` is returned, leaving it dirty for the next run.
    async fn mark_synced(&self, id: &DocId, synced_at: i64, expected_version: i64) -> Result<bool>;

    /// Flip the sync-state flag without touching `updated_at`
    async fn set_sync_status(&self, id: &DocId, status: SyncStatus) -> Result<()>;

    /// Write a mutation guarded by the expected version; bumps the version
    async fn update_guarded(&self, volunteer: &Volunteer, expected_version: i64) -> Result<()>;

    /// Apply a remote volunteer; identity is the document id.
    /// Strictly newer `updated_at` wins, local precedence on ties.
    async fn apply_remote(&self, incoming: &Volunteer) -> Result<bool>;
}

/// libSQL implementation of `VolunteerRepository`
pub struct LibSqlVolunteerRepository<'a> {
    conn: &'a Connection,
}

const SELECT_COLUMNS: &str =
    "id, login, display_name, updated_at, synced_at, origin, sync_status, version, extra";

impl<'a> LibSqlVolunteerRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_volunteer(row: &libsql::Row) -> Result<Volunteer> {
        let id: String = row.get(0)?;
        let origin: String = row.get(5)?;
        let sync_status: String = row.get(6)?;
        let extra: String = row.get(8)?;

        Ok(Volunteer {
            id: id
                .parse()
                .map_err(|_| Error::Database(format!("invalid volunteer id: {id}")))?,
            login: row.get(1)?,
            display_name: row.get(2)?,
            sync: crate::models::SyncMeta {
                updated_at: row.get(3)?,
                synced_at: row.get(4)?,
                origin: origin.parse::<Origin>().map_err(Error::Database)?,
                sync_status: sync_status.parse::<SyncStatus>().map_err(Error::Database)?,
                version: row.get(7)?,
            },
            extra: serde_json::from_str(&extra)?,
        })
    }
}

impl VolunteerRepository for LibSqlVolunteerRepository<'_> {
    async fn upsert(&self, volunteer: &Volunteer) -> Result<()> {
        let extra = serde_json::to_string(&volunteer.extra)?;
        self.conn
            .execute(
                "INSERT INTO volunteers (id, login, display_name, updated_at, synced_at, origin, \
                 sync_status, version, extra) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?) \
                 ON CONFLICT(id) DO UPDATE SET \
                 login = excluded.login, display_name = excluded.display_name, \
                 updated_at = excluded.updated_at, synced_at = excluded.synced_at, \
                 origin = excluded.origin, sync_status = excluded.sync_status, \
                 version = excluded.version, extra = excluded.extra",
                params![
                    volunteer.id.as_str(),
                    volunteer.login.clone(),
                    volunteer.display_name.clone(),
                    volunteer.sync.updated_at,
                    volunteer.sync.synced_at,
                    volunteer.sync.origin.as_str(),
                    volunteer.sync.sync_status.as_str(),
                    volunteer.sync.version,
                    extra,
                ],
            )
            .await?;
        Ok(())
    }

    async fn get(&self, id: &DocId) -> Result<Option<Volunteer>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {SELECT_COLUMNS} FROM volunteers WHERE id = ?"),
                params![id.as_str()],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_volunteer(&row)?)),
            None => Ok(None),
        }
    }

    async fn list_dirty(&self, limit: usize) -> Result<Vec<Volunteer>> {
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT {SELECT_COLUMNS} FROM volunteers \
                     WHERE (synced_at IS NULL OR synced_at < updated_at) \
                       AND sync_status != 'conflict' \
                     ORDER BY updated_at ASC LIMIT ?"
                ),
                params![limit as i64],
            )
            .await?;

        let mut volunteers = Vec::new();
        while let Some(row) = rows.next().await? {
            volunteers.push(Self::parse_volunteer(&row)?);
        }
        Ok(volunteers)
    }

    async fn count_dirty(&self) -> Result<u64> {
        let mut rows = self
            .conn
            .query(
                "SELECT COUNT(*) FROM volunteers WHERE synced_at IS NULL OR synced_at < updated_at",
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
                "UPDATE volunteers SET synced_at = ?, sync_status = 'synced' \
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
                "UPDATE volunteers SET sync_status = ? WHERE id = ?",
                params![status.as_str(), id.as_str()],
            )
            .await?;
        if affected == 0 {
            return Err(Error::NotFound(format!("volunteers/{id}")));
        }
        Ok(())
    }

    async fn update_guarded(&self, volunteer: &Volunteer, expected_version: i64) -> Result<()> {
        let extra = serde_json::to_string(&volunteer.extra)?;
        let affected = self
            .conn
            .execute(
                "UPDATE volunteers SET login = ?, display_name = ?, updated_at = ?, synced_at = ?, \
                 origin = ?, sync_status = ?, version = ?, extra = ? \
                 WHERE id = ? AND version = ?",
                params![
                    volunteer.login.clone(),
                    volunteer.display_name.clone(),
                    volunteer.sync.updated_at,
                    volunteer.sync.synced_at,
                    volunteer.sync.origin.as_str(),
                    volunteer.sync.sync_status.as_str(),
                    expected_version + 1,
                    extra,
                    volunteer.id.as_str(),
                    expected_version,
                ],
            )
            .await?;

        if affected == 0 {
            return if self.get(&volunteer.id).await?.is_some() {
                Err(Error::VersionConflict {
                    collection: COLLECTION_VOLUNTEERS.to_string(),
                    id: volunteer.id.to_string(),
                    expected: expected_version,
                })
            } else {
                Err(Error::NotFound(format!("volunteers/{}", volunteer.id)))
            };
        }
        Ok(())
    }

    async fn apply_remote(&self, incoming: &Volunteer) -> Result<bool> {
        let mut applied = incoming.clone();
        applied.sync.origin = Origin::Remote;
        applied.sync.sync_status = SyncStatus::Synced;
        applied.sync.synced_at = Some(incoming.sync.updated_at);

        let Some(existing) = self.get(&incoming.id).await? else {
            self.upsert(&applied).await?;
            return Ok(true);
        };

        if incoming.sync.updated_at <= existing.sync.updated_at {
            return Ok(false);
        }

        applied.sync.version = existing.sync.version + 1;
        self.upsert(&applied).await?;
        Ok(true)
    }
}
