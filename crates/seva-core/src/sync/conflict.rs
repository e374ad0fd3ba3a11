//! Unique-field conflict detection and resolution.
//!
//! A push candidate is checked against the remote store for any document
//! claiming the same unique field value under a different identity. Collisions
//! are never written through: they are logged, the local document is flagged,
//! and an operator (or the auto-resolve policy for opted-in collections)
//! decides the outcome.

use std::sync::Arc;

use serde_json::Value;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::models::{
    ConflictFilter, ConflictLogEntry, ResolutionStrategy, SyncConfiguration, SyncStatus,
};
use crate::remote::{RemoteDocument, RemoteStore};
use crate::store::LocalStore;
use crate::util::unix_millis_now;

/// Outcome of a pre-push conflict check.
#[derive(Debug)]
pub enum PushCheck {
    /// No collision; the document may be pushed
    Ok,
    /// Collision found; the document was flagged and must not be pushed
    Conflict(ConflictLogEntry),
}

/// Gates pushes on unique-field collisions and executes resolutions.
#[derive(Clone)]
pub struct ConflictResolver {
    store: LocalStore,
    remote: Arc<dyn RemoteStore>,
}

impl ConflictResolver {
    #[must_use]
    pub fn new(store: LocalStore, remote: Arc<dyn RemoteStore>) -> Self {
        Self { store, remote }
    }

    /// Check whether pushing `doc` would collide with a remote document on a
    /// declared unique field.
    ///
    /// On collision the local document is flagged `conflict` and a log entry
    /// is appended, unless an unresolved entry for the same collision already
    /// exists (re-running sync never duplicates conflict rows).
    pub async fn check_push(
        &self,
        config: &SyncConfiguration,
        collection: &str,
        doc: &RemoteDocument,
    ) -> Result<PushCheck> {
        let Some(unique_fields) = config.unique_fields(collection) else {
            return Ok(PushCheck::Ok);
        };

        for field in unique_fields {
            let Some(local_value) = doc.field_str(field) else {
                continue;
            };

            let Some(existing) = self.remote.find_by_field(collection, field, local_value).await?
            else {
                continue;
            };
            if existing.id == doc.id {
                continue;
            }

            self.store
                .set_sync_status(collection, &doc.id, SyncStatus::Conflict)
                .await?;

            let entry = ConflictLogEntry {
                id: 0,
                collection: collection.to_string(),
                local_id: doc.id.clone(),
                remote_id: Some(existing.id.clone()),
                conflict_field: field.clone(),
                local_value: local_value.to_string(),
                remote_value: existing
                    .field_str(field)
                    .unwrap_or(local_value)
                    .to_string(),
                detected_at: unix_millis_now(),
                resolved: false,
                resolution_strategy: None,
                resolved_at: None,
                resolved_by: None,
                notes: None,
            };

            let entry = if self
                .store
                .has_open_conflict(collection, &doc.id, field)
                .await?
            {
                entry
            } else {
                warn!(
                    collection,
                    local_id = %doc.id,
                    field,
                    "unique-field collision, document held back"
                );
                self.store.append_conflict(&entry).await?
            };
            return Ok(PushCheck::Conflict(entry));
        }

        Ok(PushCheck::Ok)
    }

    /// Resolve a logged conflict with an explicit strategy.
    ///
    /// `value` is required for `rename_local` and `merge`. Resolution flips
    /// the log entry and puts the local document back on the push queue
    /// (except `keep_remote`, which abandons the local claim).
    pub async fn resolve(
        &self,
        conflict_id: i64,
        strategy: ResolutionStrategy,
        value: Option<&Value>,
        resolved_by: &str,
        notes: Option<&str>,
    ) -> Result<ConflictLogEntry> {
        let entry = self
            .store
            .get_conflict(conflict_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("conflict/{conflict_id}")))?;
        if entry.resolved {
            return Err(Error::InvalidInput(format!(
                "conflict {conflict_id} is already resolved"
            )));
        }
        if strategy == ResolutionStrategy::Manual {
            return Err(Error::InvalidInput(
                "manual is the default holding state, not an executable strategy".to_string(),
            ));
        }
        if strategy.requires_value() && value.is_none() {
            return Err(Error::InvalidInput(format!(
                "strategy {strategy} requires a replacement value"
            )));
        }

        let now = unix_millis_now();
        match strategy {
            ResolutionStrategy::RenameLocal | ResolutionStrategy::Merge => {
                // Replace the conflicting field and requeue; the next run
                // re-checks uniqueness with the new value
                let value = value.ok_or_else(|| {
                    Error::InvalidInput(format!("strategy {strategy} requires a replacement value"))
                })?;
                self.store
                    .set_field(&entry.collection, &entry.local_id, &entry.conflict_field, value, now)
                    .await?;
            }
            ResolutionStrategy::KeepRemote => {
                self.keep_remote(&entry).await?;
            }
            ResolutionStrategy::KeepLocal => {
                self.keep_local(&entry).await?;
            }
            ResolutionStrategy::Manual => unreachable!("rejected above"),
        }

        let resolved = self
            .store
            .resolve_conflict_row(conflict_id, strategy, now, resolved_by, notes)
            .await?;
        info!(
            conflict_id,
            collection = resolved.collection,
            %strategy,
            resolved_by,
            "conflict resolved"
        );
        Ok(resolved)
    }

    /// Discard the local claim: import the remote document and mark the local
    /// one synced as-is so it leaves the push queue without being written.
    async fn keep_remote(&self, entry: &ConflictLogEntry) -> Result<()> {
        let remote_doc = match &entry.remote_id {
            Some(remote_id) => self.remote.get(&entry.collection, remote_id).await?,
            None => {
                self.remote
                    .find_by_field(&entry.collection, &entry.conflict_field, &entry.remote_value)
                    .await?
            }
        };
        if let Some(doc) = remote_doc {
            self.store.apply_remote(&entry.collection, &doc).await?;
        }

        let local = self
            .store
            .get_document(&entry.collection, &entry.local_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("{}/{}", entry.collection, entry.local_id)))?;
        self.store
            .mark_synced(&entry.collection, &entry.local_id, local.updated_at, local.version)
            .await?;
        Ok(())
    }

    /// Deliberate override: push the local document regardless of the
    /// collision and mark it synced.
    async fn keep_local(&self, entry: &ConflictLogEntry) -> Result<()> {
        let local = self
            .store
            .get_document(&entry.collection, &entry.local_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("{}/{}", entry.collection, entry.local_id)))?;
        self.remote.upsert(&entry.collection, &local).await?;
        self.store
            .mark_synced(&entry.collection, &entry.local_id, local.updated_at, local.version)
            .await?;
        Ok(())
    }

    /// Apply the configured default strategy to unresolved conflicts in
    /// opted-in collections, up to `limit` entries. Returns how many were
    /// resolved.
    pub async fn auto_resolve(&self, config: &SyncConfiguration, limit: usize) -> Result<u64> {
        let strategy = config.conflict_resolution_strategy;
        if strategy == ResolutionStrategy::Manual || strategy.requires_value() {
            return Ok(0);
        }

        let open = self
            .store
            .list_conflicts(&ConflictFilter {
                collection: None,
                unresolved_only: true,
                limit,
            })
            .await?;

        let mut resolved = 0;
        for entry in open {
            if !config.allows_auto_resolve(&entry.collection) {
                continue;
            }
            self.resolve(entry.id, strategy, None, "auto", None).await?;
            resolved += 1;
        }
        Ok(resolved)
    }
}
