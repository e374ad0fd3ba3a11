//! Attendance state machine.
//!
//! One record per (user, calendar day), driven through
//! `NoRecord -> CheckedIn -> CheckedOut` (terminal for the day). Transitions
//! run under the store's per-record lock so duplicate UI triggers cannot both
//! succeed, and they never touch the network.

use tracing::info;

use crate::error::{Error, Result};
use crate::geofence::{self, GeofenceConfig, Zone};
use crate::models::AttendanceRecord;
use crate::store::LocalStore;
use crate::util::local_date_of;

const MS_PER_HOUR: f64 = 3_600_000.0;

/// Shift and geofence parameters for attendance capture.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecorderConfig {
    /// Regular shift length; time worked beyond this counts as overtime
    pub shift_hours: f64,
    /// Radii used to gate check-in and classify outside time
    pub geofence: GeofenceConfig,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            shift_hours: 8.0,
            geofence: GeofenceConfig::default(),
        }
    }
}

/// Records geofenced check-in/check-out events against the local store.
#[derive(Clone)]
pub struct AttendanceRecorder {
    store: LocalStore,
    config: RecorderConfig,
}

impl AttendanceRecorder {
    #[must_use]
    pub const fn new(store: LocalStore, config: RecorderConfig) -> Self {
        Self { store, config }
    }

    /// Open the day's record with a check-in.
    ///
    /// Requires the device inside the check-in radius. Fails with
    /// `AlreadyCheckedIn` when the day already has an open shift and with
    /// `InvalidTransition` when the day was already closed out.
    pub async fn check_in(
        &self,
        user_id: &str,
        now_ms: i64,
        distance_m: f64,
    ) -> Result<AttendanceRecord> {
        if !geofence::can_check_in(distance_m, &self.config.geofence)? {
            return Err(Error::LocationDenied(distance_m));
        }

        let date = local_date_of(now_ms);
        let _guard = self
            .store
            .lock_record(&AttendanceRecord::lock_key(user_id, &date))
            .await;

        match self.store.get_attendance(user_id, &date).await? {
            Some(existing) if existing.is_checked_out() => {
                return Err(Error::InvalidTransition(format!(
                    "{user_id} already checked out for {date}"
                )));
            }
            Some(_) => {
                return Err(Error::AlreadyCheckedIn(user_id.to_string(), date));
            }
            None => {}
        }

        let record = AttendanceRecord::checked_in(user_id, &date, now_ms, distance_m);
        self.store.insert_attendance(&record).await?;
        info!(user_id, date, distance_m, "checked in");
        Ok(record)
    }

    /// Close the day's record with a check-out and compute overtime.
    pub async fn check_out(
        &self,
        user_id: &str,
        now_ms: i64,
        distance_m: f64,
    ) -> Result<AttendanceRecord> {
        // Validates the distance even though check-out is not zone-gated
        geofence::classify(distance_m, &self.config.geofence)?;

        let date = local_date_of(now_ms);
        let _guard = self
            .store
            .lock_record(&AttendanceRecord::lock_key(user_id, &date))
            .await;

        let mut record = self
            .store
            .get_attendance(user_id, &date)
            .await?
            .filter(AttendanceRecord::is_checked_in)
            .ok_or_else(|| Error::NotCheckedIn(user_id.to_string(), date.clone()))?;

        let check_in_time = record
            .check_in_time
            .ok_or_else(|| Error::NotCheckedIn(user_id.to_string(), date.clone()))?;
        if now_ms <= check_in_time {
            return Err(Error::InvalidTransition(format!(
                "check-out time must be after check-in for {user_id} on {date}"
            )));
        }

        let worked_hours = (now_ms - check_in_time) as f64 / MS_PER_HOUR;
        let expected = record.sync.version;
        record.check_out_time = Some(now_ms);
        record.overtime_hours = (worked_hours - self.config.shift_hours).max(0.0);
        record.distance_meters = Some(distance_m);
        record.sync.touch(now_ms);

        self.store.update_attendance(&record, expected).await?;
        record.sync.version = expected + 1;
        info!(
            user_id,
            date,
            worked_hours,
            overtime_hours = record.overtime_hours,
            "checked out"
        );
        Ok(record)
    }

    /// Accrue outside-zone time onto the open shift.
    ///
    /// Adds `interval_hours` only when the device currently classifies as
    /// `Outside`; other zones leave the record untouched. Callable only while
    /// checked in.
    pub async fn accrue_outside_time(
        &self,
        user_id: &str,
        now_ms: i64,
        distance_m: f64,
        interval_hours: f64,
    ) -> Result<AttendanceRecord> {
        if !interval_hours.is_finite() || interval_hours <= 0.0 {
            return Err(Error::InvalidInput(format!(
                "accrual interval must be a positive number of hours, got {interval_hours}"
            )));
        }
        let zone = geofence::classify(distance_m, &self.config.geofence)?;

        let date = local_date_of(now_ms);
        let _guard = self
            .store
            .lock_record(&AttendanceRecord::lock_key(user_id, &date))
            .await;

        let mut record = self
            .store
            .get_attendance(user_id, &date)
            .await?
            .filter(AttendanceRecord::is_checked_in)
            .ok_or_else(|| Error::NotCheckedIn(user_id.to_string(), date.clone()))?;

        if zone != Zone::Outside {
            return Ok(record);
        }

        let expected = record.sync.version;
        record.outside_hours += interval_hours;
        record.distance_meters = Some(distance_m);
        record.sync.touch(now_ms);

        self.store.update_attendance(&record, expected).await?;
        record.sync.version = expected + 1;
        Ok(record)
    }

    /// The record for the calendar day containing `now_ms`, if any.
    pub async fn current(&self, user_id: &str, now_ms: i64) -> Result<Option<AttendanceRecord>> {
        self.store
            .get_attendance(user_id, &local_date_of(now_ms))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SyncStatus;

    // 2026-08-25 09:00:00 UTC
    const NINE_AM: i64 = 1_787_648_400_000;

    async fn recorder() -> AttendanceRecorder {
        let store = LocalStore::open_in_memory().await.unwrap();
        AttendanceRecorder::new(store, RecorderConfig::default())
    }

    fn hours(h: f64) -> i64 {
        (h * MS_PER_HOUR) as i64
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn check_in_outside_radius_is_denied() {
        let recorder = recorder().await;
        let result = recorder.check_in("u1", NINE_AM, 100.01).await;
        assert!(matches!(result, Err(Error::LocationDenied(_))));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn double_check_in_fails() {
        let recorder = recorder().await;
        recorder.check_in("u1", NINE_AM, 50.0).await.unwrap();

        let result = recorder.check_in("u1", NINE_AM + 1_000, 50.0).await;
        assert!(matches!(result, Err(Error::AlreadyCheckedIn(_, _))));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn check_out_without_check_in_fails() {
        let recorder = recorder().await;
        let result = recorder.check_out("u1", NINE_AM, 50.0).await;
        assert!(matches!(result, Err(Error::NotCheckedIn(_, _))));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn check_out_must_be_after_check_in() {
        let recorder = recorder().await;
        recorder.check_in("u1", NINE_AM, 50.0).await.unwrap();

        let result = recorder.check_out("u1", NINE_AM, 50.0).await;
        assert!(matches!(result, Err(Error::InvalidTransition(_))));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn check_in_after_check_out_is_terminal_for_the_day() {
        let recorder = recorder().await;
        recorder.check_in("u1", NINE_AM, 50.0).await.unwrap();
        recorder.check_out("u1", NINE_AM + hours(8.0), 50.0).await.unwrap();

        let result = recorder.check_in("u1", NINE_AM + hours(9.0), 50.0).await;
        assert!(matches!(result, Err(Error::InvalidTransition(_))));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn accrual_requires_open_shift_and_outside_zone() {
        let recorder = recorder().await;
        let result = recorder
            .accrue_outside_time("u1", NINE_AM, 600.0, 0.5)
            .await;
        assert!(matches!(result, Err(Error::NotCheckedIn(_, _))));

        recorder.check_in("u1", NINE_AM, 50.0).await.unwrap();

        // Near zone: nothing accrues
        let record = recorder
            .accrue_outside_time("u1", NINE_AM + hours(1.0), 200.0, 0.5)
            .await
            .unwrap();
        assert_eq!(record.outside_hours, 0.0);

        // Outside zone: interval added
        let record = recorder
            .accrue_outside_time("u1", NINE_AM + hours(2.0), 600.0, 0.5)
            .await
            .unwrap();
        assert_eq!(record.outside_hours, 0.5);

        assert!(matches!(
            recorder.accrue_outside_time("u1", NINE_AM, 600.0, 0.0).await,
            Err(Error::InvalidInput(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn full_day_computes_overtime_and_stays_pending() {
        let recorder = recorder().await;
        recorder.check_in("u1", NINE_AM, 50.0).await.unwrap();

        for i in 0..3 {
            recorder
                .accrue_outside_time("u1", NINE_AM + hours(2.0 + f64::from(i)), 600.0, 0.5)
                .await
                .unwrap();
        }

        // 18:30 against an 8-hour shift
        let record = recorder
            .check_out("u1", NINE_AM + hours(9.5), 40.0)
            .await
            .unwrap();

        assert!((record.overtime_hours - 1.5).abs() < 1e-9);
        assert!((record.outside_hours - 1.5).abs() < 1e-9);
        assert!(record.is_present);
        assert!(record.is_checked_out());
        assert_eq!(record.sync.sync_status, SyncStatus::Pending);
        assert!(record.sync.is_dirty());
        assert_eq!(record.sync.version, 5);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_check_ins_admit_exactly_one() {
        let recorder = recorder().await;
        let (a, b) = tokio::join!(
            recorder.check_in("u1", NINE_AM, 50.0),
            recorder.check_in("u1", NINE_AM + 1, 50.0),
        );

        assert_eq!(u8::from(a.is_ok()) + u8::from(b.is_ok()), 1);
        let failure = if a.is_err() { a } else { b };
        assert!(matches!(failure, Err(Error::AlreadyCheckedIn(_, _))));
    }
}
