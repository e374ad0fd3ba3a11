//! Attendance record model

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use super::meta::{DocId, SyncMeta};

/// One attendance record per (user, calendar day).
///
/// Created on the first check-in of the day, mutated on check-out and on
/// outside-zone accrual, never physically deleted by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    /// Unique identifier
    pub id: DocId,
    /// User the record belongs to
    pub user_id: String,
    /// Calendar day in the device-local timezone (`YYYY-MM-DD`).
    /// `user_id` + `date` are unique together.
    pub date: String,
    /// Check-in timestamp (unix ms)
    pub check_in_time: Option<i64>,
    /// Check-out timestamp (unix ms); `None` while the shift is open
    pub check_out_time: Option<i64>,
    /// Hours worked beyond the configured shift length
    pub overtime_hours: f64,
    /// Hours accrued while classified in the outside zone
    pub outside_hours: f64,
    /// Device distance at the last transition, in meters
    pub distance_meters: Option<f64>,
    /// Whether the user was present this day
    pub is_present: bool,
    /// Sync metadata
    #[serde(flatten)]
    pub sync: SyncMeta,
    /// Non-schema attributes carried through sync untouched
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, Value>,
}

impl AttendanceRecord {
    /// Create the record for a first check-in of the day.
    #[must_use]
    pub fn checked_in(
        user_id: impl Into<String>,
        date: impl Into<String>,
        now_ms: i64,
        distance_meters: f64,
    ) -> Self {
        Self {
            id: DocId::new(),
            user_id: user_id.into(),
            date: date.into(),
            check_in_time: Some(now_ms),
            check_out_time: None,
            overtime_hours: 0.0,
            outside_hours: 0.0,
            distance_meters: Some(distance_meters),
            is_present: true,
            sync: SyncMeta::new_local(now_ms),
            extra: BTreeMap::new(),
        }
    }

    /// Whether the user is currently checked in (open shift).
    #[must_use]
    pub const fn is_checked_in(&self) -> bool {
        self.check_in_time.is_some() && self.check_out_time.is_none()
    }

    /// Whether the day is closed out.
    #[must_use]
    pub const fn is_checked_out(&self) -> bool {
        self.check_out_time.is_some()
    }

    /// Lock key shared by the recorder and the sync apply path.
    #[must_use]
    pub fn lock_key(user_id: &str, date: &str) -> String {
        format!("attendance/{user_id}/{date}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checked_in_record_is_open_and_dirty() {
        let record = AttendanceRecord::checked_in("user-1", "2026-08-25", 1_000, 42.0);
        assert!(record.is_checked_in());
        assert!(!record.is_checked_out());
        assert!(record.sync.is_dirty());
        assert!(record.is_present);
        assert_eq!(record.sync.version, 1);
    }

    #[test]
    fn serializes_with_flattened_sync_meta() {
        let record = AttendanceRecord::checked_in("user-1", "2026-08-25", 1_000, 42.0);
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["user_id"], "user-1");
        assert_eq!(value["sync_status"], "pending");
        assert_eq!(value["version"], 1);
        // extra map omitted when empty
        assert!(value.get("extra").is_none());
    }

    #[test]
    fn extra_attributes_roundtrip() {
        let mut record = AttendanceRecord::checked_in("user-1", "2026-08-25", 1_000, 42.0);
        record
            .extra
            .insert("seva_role".to_string(), Value::String("kitchen".to_string()));

        let json = serde_json::to_string(&record).unwrap();
        let back: AttendanceRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.extra["seva_role"], "kitchen");
    }
}
