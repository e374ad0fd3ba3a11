//! Volunteer account model
//!
//! Volunteers are the administrative-accounts collection: `login` must be
//! globally unique on the remote side, which makes this the collection that
//! exercises unique-field conflict detection.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use super::meta::{DocId, SyncMeta};

/// A volunteer account synced between devices and the remote store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Volunteer {
    /// Unique identifier
    pub id: DocId,
    /// Login name; remotely unique
    pub login: String,
    /// Human-readable name
    pub display_name: String,
    /// Sync metadata
    #[serde(flatten)]
    pub sync: SyncMeta,
    /// Non-schema attributes carried through sync untouched
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, Value>,
}

impl Volunteer {
    /// Create a locally authored volunteer account.
    #[must_use]
    pub fn new(login: impl Into<String>, display_name: impl Into<String>, now_ms: i64) -> Self {
        Self {
            id: DocId::new(),
            login: login.into(),
            display_name: display_name.into(),
            sync: SyncMeta::new_local(now_ms),
            extra: BTreeMap::new(),
        }
    }

    /// Lock key shared with the sync apply path.
    #[must_use]
    pub fn lock_key(id: &str) -> String {
        format!("volunteers/{id}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_volunteer_is_dirty() {
        let volunteer = Volunteer::new("priya", "Priya S", 1_000);
        assert!(volunteer.sync.is_dirty());
        assert_eq!(volunteer.login, "priya");
    }
}
