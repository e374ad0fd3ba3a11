//! Sync run audit log model

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// What started a sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncTrigger {
    /// Explicit operator call
    Manual,
    /// Offline-to-online transition from the network monitor
    Reconnect,
    /// Periodic scheduler tick
    Scheduled,
}

impl SyncTrigger {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Reconnect => "reconnect",
            Self::Scheduled => "scheduled",
        }
    }
}

impl fmt::Display for SyncTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncTrigger {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual" => Ok(Self::Manual),
            "reconnect" => Ok(Self::Reconnect),
            "scheduled" => Ok(Self::Scheduled),
            other => Err(format!("unknown sync trigger: {other}")),
        }
    }
}

/// Outcome of a whole sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncRunStatus {
    /// Every batch in every collection succeeded
    Completed,
    /// Some documents failed but the run finished
    Partial,
    /// The run could not proceed at all
    Failed,
}

impl SyncRunStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Partial => "partial",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for SyncRunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "completed" => Ok(Self::Completed),
            "partial" => Ok(Self::Partial),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown sync run status: {other}")),
        }
    }
}

/// Append-only audit record for one sync run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncLogEntry {
    /// Log row identifier (0 before insertion)
    pub id: i64,
    /// Run start (unix ms)
    pub start_time: i64,
    /// Run end (unix ms)
    pub end_time: i64,
    /// What started the run
    pub trigger: SyncTrigger,
    /// Documents pushed, per collection
    pub pushed: BTreeMap<String, u64>,
    /// Documents pulled, per collection
    pub pulled: BTreeMap<String, u64>,
    /// Conflicts detected, per collection
    pub conflicts: BTreeMap<String, u64>,
    /// Transport/document errors accumulated during the run
    pub errors: Vec<String>,
    /// Run outcome
    pub status: SyncRunStatus,
}

impl SyncLogEntry {
    /// Start a new, empty run entry.
    #[must_use]
    pub fn begin(trigger: SyncTrigger, start_time: i64) -> Self {
        Self {
            id: 0,
            start_time,
            end_time: start_time,
            trigger,
            pushed: BTreeMap::new(),
            pulled: BTreeMap::new(),
            conflicts: BTreeMap::new(),
            errors: Vec::new(),
            status: SyncRunStatus::Failed,
        }
    }

    /// Total documents pushed across collections.
    #[must_use]
    pub fn total_pushed(&self) -> u64 {
        self.pushed.values().sum()
    }

    /// Total documents pulled across collections.
    #[must_use]
    pub fn total_pulled(&self) -> u64 {
        self.pulled.values().sum()
    }

    /// Total conflicts detected across collections.
    #[must_use]
    pub fn total_conflicts(&self) -> u64 {
        self.conflicts.values().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn totals_sum_across_collections() {
        let mut entry = SyncLogEntry::begin(SyncTrigger::Manual, 1_000);
        entry.pushed.insert("attendance".to_string(), 3);
        entry.pushed.insert("volunteers".to_string(), 2);
        entry.conflicts.insert("volunteers".to_string(), 1);

        assert_eq!(entry.total_pushed(), 5);
        assert_eq!(entry.total_pulled(), 0);
        assert_eq!(entry.total_conflicts(), 1);
    }

    #[test]
    fn trigger_roundtrips_through_string() {
        for trigger in [SyncTrigger::Manual, SyncTrigger::Reconnect, SyncTrigger::Scheduled] {
            assert_eq!(trigger.as_str().parse::<SyncTrigger>().unwrap(), trigger);
        }
    }
}
