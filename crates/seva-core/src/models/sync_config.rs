//! Sync configuration singleton

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use super::conflict::ResolutionStrategy;

/// Collection name for attendance records.
pub const COLLECTION_ATTENDANCE: &str = "attendance";

/// Collection name for volunteer accounts.
pub const COLLECTION_VOLUNTEERS: &str = "volunteers";

/// Engine-wide sync policy, persisted in the local store and mutated only
/// through the engine's config surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfiguration {
    /// Collections included in push/pull runs
    pub collections_to_sync: BTreeSet<String>,
    /// Per-collection fields that must be globally unique on the remote side
    pub unique_fields_by_collection: BTreeMap<String, BTreeSet<String>>,
    /// Documents per push/pull batch
    pub batch_size: usize,
    /// Retry attempts per batch for transient transport errors
    pub max_retries: u32,
    /// Whether reconnect/scheduled triggers run automatically
    pub auto_sync_enabled: bool,
    /// Periodic sync cadence; `None` disables the scheduler entirely
    pub sync_interval_minutes: Option<u64>,
    /// Default policy applied by batch auto-resolution
    pub conflict_resolution_strategy: ResolutionStrategy,
    /// Low-risk collections eligible for batch auto-resolution
    pub auto_resolve_collections: BTreeSet<String>,
}

impl Default for SyncConfiguration {
    fn default() -> Self {
        let mut unique_fields = BTreeMap::new();
        unique_fields.insert(
            COLLECTION_VOLUNTEERS.to_string(),
            BTreeSet::from(["login".to_string()]),
        );

        Self {
            collections_to_sync: BTreeSet::from([
                COLLECTION_ATTENDANCE.to_string(),
                COLLECTION_VOLUNTEERS.to_string(),
            ]),
            unique_fields_by_collection: unique_fields,
            batch_size: 50,
            max_retries: 3,
            auto_sync_enabled: true,
            sync_interval_minutes: None,
            conflict_resolution_strategy: ResolutionStrategy::Manual,
            auto_resolve_collections: BTreeSet::new(),
        }
    }
}

impl SyncConfiguration {
    /// Unique fields declared for a collection, if any.
    #[must_use]
    pub fn unique_fields(&self, collection: &str) -> Option<&BTreeSet<String>> {
        self.unique_fields_by_collection
            .get(collection)
            .filter(|fields| !fields.is_empty())
    }

    /// Whether a collection may be auto-resolved in batch.
    #[must_use]
    pub fn allows_auto_resolve(&self, collection: &str) -> bool {
        self.auto_resolve_collections.contains(collection)
    }

    /// Apply a partial update; `None` fields keep their current value.
    pub fn apply_partial(&mut self, partial: SyncConfigurationPatch) {
        if let Some(collections) = partial.collections_to_sync {
            self.collections_to_sync = collections;
        }
        if let Some(batch_size) = partial.batch_size {
            self.batch_size = batch_size.max(1);
        }
        if let Some(max_retries) = partial.max_retries {
            self.max_retries = max_retries;
        }
        if let Some(auto_sync) = partial.auto_sync_enabled {
            self.auto_sync_enabled = auto_sync;
        }
        if let Some(interval) = partial.sync_interval_minutes {
            self.sync_interval_minutes = interval;
        }
        if let Some(strategy) = partial.conflict_resolution_strategy {
            self.conflict_resolution_strategy = strategy;
        }
        if let Some(collections) = partial.auto_resolve_collections {
            self.auto_resolve_collections = collections;
        }
    }
}

/// Partial update for [`SyncConfiguration`]; the engine's `set_config`
/// surface takes this shape.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfigurationPatch {
    pub collections_to_sync: Option<BTreeSet<String>>,
    pub batch_size: Option<usize>,
    pub max_retries: Option<u32>,
    pub auto_sync_enabled: Option<bool>,
    /// `Some(None)` clears the interval, disabling periodic sync
    pub sync_interval_minutes: Option<Option<u64>>,
    pub conflict_resolution_strategy: Option<ResolutionStrategy>,
    pub auto_resolve_collections: Option<BTreeSet<String>>,
}
