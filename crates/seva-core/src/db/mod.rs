//! Database layer for Seva

mod attendance_repository;
mod connection;
mod migrations;
mod sync_repository;
mod volunteer_repository;

pub use attendance_repository::{AttendanceRepository, LibSqlAttendanceRepository};
pub use connection::Database;
pub use sync_repository::{LibSqlSyncRepository, SyncRepository};
pub use volunteer_repository::{LibSqlVolunteerRepository, VolunteerRepository};
