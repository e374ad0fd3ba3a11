//! Shared models for seva-core

mod attendance;
mod conflict;
mod meta;
mod sync_config;
mod sync_log;
mod volunteer;

pub use attendance::AttendanceRecord;
pub use conflict::{ConflictFilter, ConflictLogEntry, ResolutionStrategy};
pub use meta::{DocId, Origin, SyncMeta, SyncStatus};
pub use sync_config::{
    SyncConfiguration, SyncConfigurationPatch, COLLECTION_ATTENDANCE, COLLECTION_VOLUNTEERS,
};
pub use sync_log::{SyncLogEntry, SyncRunStatus, SyncTrigger};
pub use volunteer::Volunteer;
