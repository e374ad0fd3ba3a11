//! Database migrations

use crate::error::Result;
use libsql::Connection;

/// Current schema version
const CURRENT_VERSION: i32 = 2;

/// Run all pending migrations
pub async fn run(conn: &Connection) -> Result<()> {
    let version = get_version(conn).await?;

    if version < 1 {
        migrate_v1(conn).await?;
    }
    if version < 2 {
        migrate_v2(conn).await?;
    }

    Ok(())
}

/// Get the current schema version
async fn get_version(conn: &Connection) -> Result<i32> {
    let mut rows = conn
        .query(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
            (),
        )
        .await?;

    let exists: bool = if let Some(row) = rows.next().await? {
        row.get::<i32>(0)? != 0
    } else {
        false
    };

    if !exists {
        return Ok(0);
    }

    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM schema_version", ())
        .await?;

    let version: i32 = if let Some(row) = rows.next().await? {
        row.get(0)?
    } else {
        0
    };

    Ok(version)
}

async fn apply(conn: &Connection, statements: &[&str], version: i32) -> Result<()> {
    // libsql has no execute_batch; run statements inside one transaction
    conn.execute("BEGIN TRANSACTION", ()).await?;

    for stmt in statements {
        if let Err(e) = conn.execute(stmt, ()).await {
            conn.execute("ROLLBACK", ()).await.ok();
            return Err(e.into());
        }
    }

    if let Err(e) = conn.execute("COMMIT", ()).await {
        conn.execute("ROLLBACK", ()).await.ok();
        return Err(e.into());
    }

    tracing::info!("Migrated database to version {version}");
    Ok(())
}

/// Migration to version 1: attendance and volunteers with sync metadata
async fn migrate_v1(conn: &Connection) -> Result<()> {
    let statements = [
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        )",
        // Attendance: one row per user per local calendar day
        "CREATE TABLE IF NOT EXISTS attendance (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            date TEXT NOT NULL,
            check_in_time INTEGER,
            check_out_time INTEGER,
            overtime_hours REAL NOT NULL DEFAULT 0,
            outside_hours REAL NOT NULL DEFAULT 0,
            distance_meters REAL,
            is_present INTEGER NOT NULL DEFAULT 0,
            updated_at INTEGER NOT NULL,
            synced_at INTEGER,
            origin TEXT NOT NULL DEFAULT 'local',
            sync_status TEXT NOT NULL DEFAULT 'pending',
            version INTEGER NOT NULL DEFAULT 1,
            extra TEXT NOT NULL DEFAULT '{}'
        )",
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_attendance_user_date ON attendance(user_id, date)",
        "CREATE INDEX IF NOT EXISTS idx_attendance_updated ON attendance(updated_at DESC)",
        "CREATE INDEX IF NOT EXISTS idx_attendance_dirty ON attendance(sync_status, synced_at)",
        // Volunteer accounts; login is unique remotely, mirrored locally
        "CREATE TABLE IF NOT EXISTS volunteers (
            id TEXT PRIMARY KEY,
            login TEXT NOT NULL,
            display_name TEXT NOT NULL DEFAULT '',
            updated_at INTEGER NOT NULL,
            synced_at INTEGER,
            origin TEXT NOT NULL DEFAULT 'local',
            sync_status TEXT NOT NULL DEFAULT 'pending',
            version INTEGER NOT NULL DEFAULT 1,
            extra TEXT NOT NULL DEFAULT '{}'
        )",
        "CREATE INDEX IF NOT EXISTS idx_volunteers_login ON volunteers(login)",
        "CREATE INDEX IF NOT EXISTS idx_volunteers_dirty ON volunteers(sync_status, synced_at)",
        "INSERT INTO schema_version (version) VALUES (1)",
    ];

    apply(conn, &statements, 1).await
}

/// Migration to version 2: sync bookkeeping (conflicts, run log, checkpoints, settings)
async fn migrate_v2(conn: &Connection) -> Result<()> {
    let statements = [
        // Append-only; resolution flips `resolved` and fills the tail columns
        "CREATE TABLE IF NOT EXISTS conflict_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            collection TEXT NOT NULL,
            local_id TEXT NOT NULL,
            remote_id TEXT,
            conflict_field TEXT NOT NULL,
            local_value TEXT NOT NULL,
            remote_value TEXT NOT NULL,
            detected_at INTEGER NOT NULL,
            resolved INTEGER NOT NULL DEFAULT 0,
            resolution_strategy TEXT,
            resolved_at INTEGER,
            resolved_by TEXT,
            notes TEXT
        )",
        "CREATE INDEX IF NOT EXISTS idx_conflict_log_local ON conflict_log(collection, local_id)",
        "CREATE INDEX IF NOT EXISTS idx_conflict_log_resolved ON conflict_log(resolved, detected_at DESC)",
        // One row per sync run
        "CREATE TABLE IF NOT EXISTS sync_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            start_time INTEGER NOT NULL,
            end_time INTEGER NOT NULL,
            trigger_source TEXT NOT NULL,
            pushed TEXT NOT NULL DEFAULT '{}',
            pulled TEXT NOT NULL DEFAULT '{}',
            conflicts TEXT NOT NULL DEFAULT '{}',
            errors TEXT NOT NULL DEFAULT '[]',
            status TEXT NOT NULL
        )",
        "CREATE INDEX IF NOT EXISTS idx_sync_log_start ON sync_log(start_time DESC)",
        // Per-collection pull resume position
        "CREATE TABLE IF NOT EXISTS sync_checkpoints (
            collection TEXT PRIMARY KEY,
            last_pulled_at INTEGER NOT NULL DEFAULT 0,
            updated_at INTEGER NOT NULL
        )",
        // Key-value sync settings (configuration singleton, device id)
        "CREATE TABLE IF NOT EXISTS sync_settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )",
        "INSERT INTO schema_version (version) VALUES (2)",
    ];

    apply(conn, &statements, 2).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use libsql::Builder;

    async fn setup() -> Connection {
        let db = Builder::new_local(":memory:").build().await.unwrap();
        db.connect().unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_migrations() {
        let conn = setup().await;
        run(&conn).await.unwrap();

        let version = get_version(&conn).await.unwrap();
        assert_eq!(version, CURRENT_VERSION);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_migrations_idempotent() {
        let conn = setup().await;
        run(&conn).await.unwrap();
        run(&conn).await.unwrap(); // Should not fail

        let version = get_version(&conn).await.unwrap();
        assert_eq!(version, CURRENT_VERSION);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn attendance_user_date_pair_is_unique() {
        let conn = setup().await;
        run(&conn).await.unwrap();

        conn.execute(
            "INSERT INTO attendance (id, user_id, date, updated_at) VALUES ('a', 'u1', '2026-08-25', 1)",
            (),
        )
        .await
        .unwrap();

        let duplicate = conn
            .execute(
                "INSERT INTO attendance (id, user_id, date, updated_at) VALUES ('b', 'u1', '2026-08-25', 2)",
                (),
            )
            .await;
        assert!(duplicate.is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn sync_tables_exist() {
        let conn = setup().await;
        run(&conn).await.unwrap();

        for table in ["conflict_log", "sync_log", "sync_checkpoints", "sync_settings"] {
            let mut rows = conn
                .query(
                    "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name = ?)",
                    [table],
                )
                .await
                .unwrap();
            let row = rows.next().await.unwrap().unwrap();
            assert_eq!(row.get::<i32>(0).unwrap(), 1, "missing table {table}");
        }
    }
}
