//! Conflict log model
//!
//! Entries are append-only: resolution only flips `resolved` and fills the
//! resolution fields, it never deletes or rewrites the detection half.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Operator-selectable strategy for resolving a unique-field conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    /// Assign a new unique value to the local document and retry the push
    RenameLocal,
    /// Discard the local change and pull the remote document instead
    KeepRemote,
    /// Force-overwrite the remote document; deliberate manual override only
    KeepLocal,
    /// Apply an operator-supplied field value and retry the push
    Merge,
    /// No automatic action; wait for an operator decision
    #[default]
    Manual,
}

impl ResolutionStrategy {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RenameLocal => "rename_local",
            Self::KeepRemote => "keep_remote",
            Self::KeepLocal => "keep_local",
            Self::Merge => "merge",
            Self::Manual => "manual",
        }
    }

    /// Whether this strategy needs an operator-supplied value.
    #[must_use]
    pub const fn requires_value(self) -> bool {
        matches!(self, Self::RenameLocal | Self::Merge)
    }
}

impl fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResolutionStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rename_local" => Ok(Self::RenameLocal),
            "keep_remote" => Ok(Self::KeepRemote),
            "keep_local" => Ok(Self::KeepLocal),
            "merge" => Ok(Self::Merge),
            "manual" => Ok(Self::Manual),
            other => Err(format!("unknown resolution strategy: {other}")),
        }
    }
}

/// A detected unique-field collision between a local document and the remote
/// store, plus its eventual resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictLogEntry {
    /// Conflict row identifier
    pub id: i64,
    /// Collection the conflicting document belongs to
    pub collection: String,
    /// Identity of the local document that could not be pushed
    pub local_id: String,
    /// Identity of the colliding remote document, when known
    pub remote_id: Option<String>,
    /// The unique field both documents claim
    pub conflict_field: String,
    /// Local value of the conflicting field
    pub local_value: String,
    /// Remote value of the conflicting field
    pub remote_value: String,
    /// Detection timestamp (unix ms)
    pub detected_at: i64,
    /// Whether the conflict has been resolved
    pub resolved: bool,
    /// Strategy used, once resolved
    pub resolution_strategy: Option<ResolutionStrategy>,
    /// Resolution timestamp (unix ms)
    pub resolved_at: Option<i64>,
    /// Who or what resolved it (operator id, or "auto")
    pub resolved_by: Option<String>,
    /// Free-form operator notes
    pub notes: Option<String>,
}

/// Filter for listing conflict log entries.
#[derive(Debug, Clone, Default)]
pub struct ConflictFilter {
    /// Restrict to one collection
    pub collection: Option<String>,
    /// Only entries not yet resolved
    pub unresolved_only: bool,
    /// Maximum rows to return (0 = repository default)
    pub limit: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategy_roundtrips_through_string() {
        for strategy in [
            ResolutionStrategy::RenameLocal,
            ResolutionStrategy::KeepRemote,
            ResolutionStrategy::KeepLocal,
            ResolutionStrategy::Merge,
            ResolutionStrategy::Manual,
        ] {
            let parsed: ResolutionStrategy = strategy.as_str().parse().unwrap();
            assert_eq!(parsed, strategy);
        }
    }

    #[test]
    fn value_requirement_per_strategy() {
        assert!(ResolutionStrategy::RenameLocal.requires_value());
        assert!(ResolutionStrategy::Merge.requires_value());
        assert!(!ResolutionStrategy::KeepRemote.requires_value());
        assert!(!ResolutionStrategy::KeepLocal.requires_value());
    }
}
