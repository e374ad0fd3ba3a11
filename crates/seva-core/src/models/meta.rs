//! Sync metadata shared by every syncable entity.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// A unique document identifier, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocId(Uuid);

impl DocId {
    /// Create a new unique document ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for DocId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DocId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Which side authored the last write to a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    /// Written by this device
    #[default]
    Local,
    /// Applied from the remote store
    Remote,
}

impl Origin {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Remote => "remote",
        }
    }
}

impl FromStr for Origin {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(Self::Local),
            "remote" => Ok(Self::Remote),
            other => Err(format!("unknown origin: {other}")),
        }
    }
}

/// Sync state of a document relative to the remote store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// Locally authored, not yet confirmed remotely
    #[default]
    Pending,
    /// Confirmed applied to the remote store
    Synced,
    /// Blocked on an unresolved unique-field conflict
    Conflict,
    /// Push exhausted its retries during the last run
    Failed,
}

impl SyncStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Synced => "synced",
            Self::Conflict => "conflict",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for SyncStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "synced" => Ok(Self::Synced),
            "conflict" => Ok(Self::Conflict),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown sync status: {other}")),
        }
    }
}

/// Metadata present on every syncable entity.
///
/// Invariant: `synced_at` is `None` or `synced_at <= updated_at`. A document
/// with `synced_at == None` or `synced_at < updated_at` is dirty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncMeta {
    /// Last local mutation timestamp (unix ms), bumped on every write
    pub updated_at: i64,
    /// Timestamp of last confirmed remote application (unix ms)
    pub synced_at: Option<i64>,
    /// Which side authored the last write
    pub origin: Origin,
    /// Sync state flag
    pub sync_status: SyncStatus,
    /// Incremented on every successful write; optimistic-concurrency token
    pub version: i64,
}

impl SyncMeta {
    /// Metadata for a freshly authored local document.
    #[must_use]
    pub const fn new_local(now_ms: i64) -> Self {
        Self {
            updated_at: now_ms,
            synced_at: None,
            origin: Origin::Local,
            sync_status: SyncStatus::Pending,
            version: 1,
        }
    }

    /// Whether the document still needs to reach the remote store.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        match self.synced_at {
            None => true,
            Some(synced_at) => synced_at < self.updated_at,
        }
    }

    /// Record a local mutation: bump the timestamp and mark pending.
    pub fn touch(&mut self, now_ms: i64) {
        self.updated_at = self.updated_at.max(now_ms);
        self.origin = Origin::Local;
        self.sync_status = SyncStatus::Pending;
    }
}
