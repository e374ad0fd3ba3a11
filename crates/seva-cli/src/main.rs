//! Seva CLI - attendance capture and sync from the terminal
//!
//! Check volunteers in and out, inspect sync health, and work the conflict
//! queue against the same local store the kiosk engine uses.

mod cli;
mod error;

use std::collections::BTreeSet;
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{Local, TimeZone};
use clap::Parser;
use serde_json::Value;
use seva_core::models::{
    ConflictFilter, ConflictLogEntry, ResolutionStrategy, SyncConfiguration,
    SyncConfigurationPatch, SyncLogEntry,
};
use seva_core::util::unix_millis_now;
use seva_core::{EngineConfig, SyncEngine};

use crate::cli::{Cli, Commands, ConfigCommands, ConflictCommands, SyncCommands};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("seva=info".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();
    let db_path = resolve_db_path(cli.db_path);

    match cli.command {
        Commands::CheckIn { user, distance } => run_check_in(&user, distance, &db_path).await?,
        Commands::CheckOut { user, distance } => run_check_out(&user, distance, &db_path).await?,
        Commands::Status { user, json } => run_status(&user, json, &db_path).await?,
        Commands::Sync { command } => match command {
            SyncCommands::Run { collection } => run_sync_now(&collection, &db_path).await?,
            SyncCommands::Status { json } => run_sync_status(json, &db_path).await?,
            SyncCommands::Log { limit, json } => run_sync_log(limit, json, &db_path).await?,
        },
        Commands::Conflicts { command } => match command {
            ConflictCommands::List {
                collection,
                unresolved,
                limit,
                json,
            } => run_conflicts_list(collection, unresolved, limit, json, &db_path).await?,
            ConflictCommands::Resolve {
                id,
                strategy,
                value,
                by,
                notes,
            } => {
                run_conflicts_resolve(id, &strategy, value, &by, notes.as_deref(), &db_path)
                    .await?;
            }
            ConflictCommands::AutoResolve { limit } => {
                run_conflicts_auto_resolve(limit, &db_path).await?;
            }
        },
        Commands::Config { command } => match command {
            ConfigCommands::Show { json } => run_config_show(json, &db_path).await?,
            ConfigCommands::Set {
                batch_size,
                max_retries,
                auto_sync,
                interval,
                strategy,
            } => {
                run_config_set(
                    batch_size,
                    max_retries,
                    auto_sync,
                    interval.as_deref(),
                    strategy.as_deref(),
                    &db_path,
                )
                .await?;
            }
        },
    }

    Ok(())
}

async fn run_check_in(user: &str, distance: f64, db_path: &Path) -> Result<(), CliError> {
    let user = normalize_user_id(user)?;
    let engine = open_engine(db_path).await?;

    let result = engine
        .recorder()
        .check_in(&user, unix_millis_now(), distance)
        .await;
    engine.shutdown().await;

    let record = result?;
    let time = record.check_in_time.map_or_else(|| "?".to_string(), format_clock);
    println!("Checked in {user} at {time} ({})", record.date);
    Ok(())
}

async fn run_check_out(user: &str, distance: f64, db_path: &Path) -> Result<(), CliError> {
    let user = normalize_user_id(user)?;
    let engine = open_engine(db_path).await?;

    let result = engine
        .recorder()
        .check_out(&user, unix_millis_now(), distance)
        .await;
    engine.shutdown().await;

    let record = result?;
    let time = record
        .check_out_time
        .map_or_else(|| "?".to_string(), format_clock);
    let worked = match (record.check_in_time, record.check_out_time) {
        (Some(start), Some(end)) => (end - start) as f64 / 3_600_000.0,
        _ => 0.0,
    };
    println!(
        "Checked out {user} at {time} (worked {worked:.2}h, overtime {:.2}h)",
        record.overtime_hours
    );
    Ok(())
}

async fn run_status(user: &str, as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let user = normalize_user_id(user)?;
    let engine = open_engine(db_path).await?;

    let result = engine.recorder().current(&user, unix_millis_now()).await;
    engine.shutdown().await;

    let Some(record) = result? else {
        println!("No attendance record for {user} today");
        return Ok(());
    };

    if as_json {
        println!("{}", serde_json::to_string_pretty(&record)?);
    } else {
        let check_in = record.check_in_time.map_or_else(|| "-".to_string(), format_clock);
        let check_out = record
            .check_out_time
            .map_or_else(|| "-".to_string(), format_clock);
        println!("{user}  {}", record.date);
        println!("  check-in:   {check_in}");
        println!("  check-out:  {check_out}");
        println!("  overtime:   {:.2}h", record.overtime_hours);
        println!("  outside:    {:.2}h", record.outside_hours);
        println!("  sync:       {}", record.sync.sync_status.as_str());
    }
    Ok(())
}

async fn run_sync_now(collections: &[String], db_path: &Path) -> Result<(), CliError> {
    let subset = collection_subset(collections);
    let engine = open_engine(db_path).await?;

    let result = engine.trigger_sync(subset.as_ref()).await;
    engine.shutdown().await;

    match result? {
        Some(entry) => {
            println!("{}", format_sync_entry(&entry));
            for error in &entry.errors {
                println!("  error: {error}");
            }
        }
        None => println!("A sync run is already in flight; queued a follow-up run"),
    }
    Ok(())
}

async fn run_sync_status(as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let engine = open_engine(db_path).await?;
    let result = engine.sync_status().await;
    engine.shutdown().await;

    let report = result?;
    if as_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("online: {}", if report.online { "yes" } else { "no" });
    match &report.last_sync {
        Some(entry) => println!("last sync: {}", format_sync_entry(entry)),
        None => println!("last sync: never"),
    }
    let pending = report
        .pending
        .iter()
        .map(|(collection, count)| format!("{collection}={count}"))
        .collect::<Vec<_>>()
        .join(" ");
    println!("pending: {pending} (total {})", report.pending_total());
    Ok(())
}

async fn run_sync_log(limit: usize, as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let engine = open_engine(db_path).await?;
    let result = engine.store().list_sync_logs(limit).await;
    engine.shutdown().await;

    let entries = result?;
    if as_json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
    } else if entries.is_empty() {
        println!("No sync runs recorded");
    } else {
        for entry in &entries {
            println!("{}", format_sync_entry(entry));
        }
    }
    Ok(())
}

async fn run_conflicts_list(
    collection: Option<String>,
    unresolved_only: bool,
    limit: usize,
    as_json: bool,
    db_path: &Path,
) -> Result<(), CliError> {
    let filter = ConflictFilter {
        collection,
        unresolved_only,
        limit,
    };

    let engine = open_engine(db_path).await?;
    let result = engine.list_conflicts(&filter).await;
    engine.shutdown().await;

    let entries = result?;
    if as_json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
    } else if entries.is_empty() {
        println!("No conflicts");
    } else {
        for entry in &entries {
            println!("{}", format_conflict_entry(entry));
        }
    }
    Ok(())
}

async fn run_conflicts_resolve(
    id: i64,
    strategy: &str,
    value: Option<String>,
    resolved_by: &str,
    notes: Option<&str>,
    db_path: &Path,
) -> Result<(), CliError> {
    let strategy = parse_strategy(strategy)?;
    let value = value.map(Value::String);

    let engine = open_engine(db_path).await?;
    let result = engine
        .resolve_conflict(id, strategy, value.as_ref(), resolved_by, notes)
        .await;
    engine.shutdown().await;

    let entry = result?;
    println!("Resolved conflict {} with {strategy}", entry.id);
    Ok(())
}

async fn run_conflicts_auto_resolve(limit: usize, db_path: &Path) -> Result<(), CliError> {
    let engine = open_engine(db_path).await?;
    let result = engine.auto_resolve_conflicts(limit).await;
    engine.shutdown().await;

    let count = result?;
    println!("Auto-resolved {count} conflict(s)");
    Ok(())
}

async fn run_config_show(as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let engine = open_engine(db_path).await?;
    let result = engine.get_config().await;
    engine.shutdown().await;

    let config = result?;
    if as_json {
        println!("{}", serde_json::to_string_pretty(&config)?);
    } else {
        print_config(&config);
    }
    Ok(())
}

async fn run_config_set(
    batch_size: Option<usize>,
    max_retries: Option<u32>,
    auto_sync: Option<bool>,
    interval: Option<&str>,
    strategy: Option<&str>,
    db_path: &Path,
) -> Result<(), CliError> {
    let patch = SyncConfigurationPatch {
        batch_size,
        max_retries,
        auto_sync_enabled: auto_sync,
        sync_interval_minutes: interval.map(parse_interval).transpose()?,
        conflict_resolution_strategy: strategy.map(parse_strategy).transpose()?,
        ..Default::default()
    };

    let engine = open_engine(db_path).await?;
    let result = engine.set_config(patch).await;
    engine.shutdown().await;

    print_config(&result?);
    Ok(())
}

async fn open_engine(db_path: &Path) -> Result<SyncEngine, CliError> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let mut config = EngineConfig::from_env()?;
    config.db_path = db_path.to_path_buf();
    Ok(SyncEngine::start(config).await?)
}

fn normalize_user_id(user: &str) -> Result<String, CliError> {
    let trimmed = user.trim();
    if trimmed.is_empty() {
        Err(CliError::EmptyUserId)
    } else {
        Ok(trimmed.to_string())
    }
}

fn parse_strategy(raw: &str) -> Result<ResolutionStrategy, CliError> {
    ResolutionStrategy::from_str(raw.trim())
        .map_err(|_| CliError::UnknownStrategy(raw.to_string()))
}

/// "none" disables periodic sync; any other value must be a minute count.
fn parse_interval(raw: &str) -> Result<Option<u64>, CliError> {
    let trimmed = raw.trim();
    if trimmed.eq_ignore_ascii_case("none") {
        return Ok(None);
    }
    trimmed
        .parse::<u64>()
        .map(Some)
        .map_err(|_| CliError::InvalidFlag("--interval", raw.to_string()))
}

fn collection_subset(collections: &[String]) -> Option<BTreeSet<String>> {
    let subset: BTreeSet<String> = collections
        .iter()
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .collect();
    if subset.is_empty() {
        None
    } else {
        Some(subset)
    }
}

fn print_config(config: &SyncConfiguration) {
    let collections = config
        .collections_to_sync
        .iter()
        .cloned()
        .collect::<Vec<_>>()
        .join(", ");
    let interval = config
        .sync_interval_minutes
        .map_or_else(|| "none".to_string(), |minutes| format!("{minutes}m"));

    println!("collections:    {collections}");
    println!("batch size:     {}", config.batch_size);
    println!("max retries:    {}", config.max_retries);
    println!(
        "auto sync:      {}",
        if config.auto_sync_enabled { "on" } else { "off" }
    );
    println!("interval:       {interval}");
    println!("strategy:       {}", config.conflict_resolution_strategy);
}

fn format_sync_entry(entry: &SyncLogEntry) -> String {
    format!(
        "[{}] {} ({}) pushed={} pulled={} conflicts={} errors={}",
        entry.id,
        entry.status.as_str(),
        entry.trigger,
        entry.total_pushed(),
        entry.total_pulled(),
        entry.total_conflicts(),
        entry.errors.len()
    )
}

fn format_conflict_entry(entry: &ConflictLogEntry) -> String {
    let state = if entry.resolved {
        entry
            .resolution_strategy
            .map_or_else(|| "resolved".to_string(), |s| format!("resolved/{s}"))
    } else {
        "open".to_string()
    };
    format!(
        "[{}] {} {}='{}' vs remote '{}' ({state})",
        entry.id, entry.collection, entry.conflict_field, entry.local_value, entry.remote_value
    )
}

fn format_clock(timestamp_ms: i64) -> String {
    Local
        .timestamp_millis_opt(timestamp_ms)
        .single()
        .map_or_else(|| "?".to_string(), |time| time.format("%H:%M").to_string())
}

fn resolve_db_path(cli_db_path: Option<PathBuf>) -> PathBuf {
    cli_db_path
        .or_else(|| env::var_os("SEVA_DB_PATH").map(PathBuf::from))
        .unwrap_or_else(default_db_path)
}

fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("seva")
        .join("seva.db")
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::{SystemTime, UNIX_EPOCH};

    use seva_core::models::{SyncLogEntry, SyncRunStatus, SyncTrigger};
    use seva_core::LocalStore;

    use super::{
        collection_subset, format_conflict_entry, format_sync_entry, normalize_user_id,
        parse_interval, parse_strategy, run_check_in, run_config_set, CliError,
        ResolutionStrategy,
    };

    #[test]
    fn normalize_user_id_trims_and_rejects_empty() {
        assert_eq!(normalize_user_id("  usha  ").unwrap(), "usha");
        assert!(matches!(
            normalize_user_id(" \n "),
            Err(CliError::EmptyUserId)
        ));
    }

    #[test]
    fn parse_strategy_accepts_known_names() {
        assert_eq!(
            parse_strategy(" keep_remote ").unwrap(),
            ResolutionStrategy::KeepRemote
        );
        assert!(matches!(
            parse_strategy("overwrite"),
            Err(CliError::UnknownStrategy(_))
        ));
    }

    #[test]
    fn parse_interval_none_and_minutes() {
        assert_eq!(parse_interval("none").unwrap(), None);
        assert_eq!(parse_interval("15").unwrap(), Some(15));
        assert!(matches!(
            parse_interval("soon"),
            Err(CliError::InvalidFlag("--interval", _))
        ));
    }

    #[test]
    fn collection_subset_drops_blank_names() {
        assert!(collection_subset(&[]).is_none());
        assert!(collection_subset(&["  ".to_string()]).is_none());

        let subset = collection_subset(&["attendance".to_string(), " ".to_string()]).unwrap();
        assert_eq!(subset.len(), 1);
        assert!(subset.contains("attendance"));
    }

    #[test]
    fn sync_entry_line_includes_totals() {
        let mut entry = SyncLogEntry::begin(SyncTrigger::Manual, 1_000);
        entry.id = 7;
        entry.status = SyncRunStatus::Partial;
        entry.pushed = BTreeMap::from([("attendance".to_string(), 3)]);
        entry.errors.push("boom".to_string());

        let line = format_sync_entry(&entry);
        assert!(line.contains("[7] partial (manual)"));
        assert!(line.contains("pushed=3"));
        assert!(line.contains("errors=1"));
    }

    #[test]
    fn conflict_entry_line_shows_state() {
        let mut entry = sample_conflict();
        assert!(format_conflict_entry(&entry).contains("(open)"));

        entry.resolved = true;
        entry.resolution_strategy = Some(ResolutionStrategy::RenameLocal);
        assert!(format_conflict_entry(&entry).contains("(resolved/rename_local)"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn check_in_persists_a_record() {
        let db_path = unique_test_db_path();

        run_check_in("usha", 50.0, &db_path).await.unwrap();

        let store = LocalStore::open_path(&db_path).await.unwrap();
        let record = store
            .get_attendance("usha", &seva_core::util::local_date_today())
            .await
            .unwrap()
            .unwrap();
        assert!(record.is_checked_in());

        cleanup_db_files(&db_path);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn check_in_outside_radius_is_denied() {
        let db_path = unique_test_db_path();

        let error = run_check_in("usha", 5_000.0, &db_path).await.unwrap_err();
        assert!(matches!(
            error,
            CliError::Core(seva_core::Error::LocationDenied(_))
        ));

        cleanup_db_files(&db_path);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn config_set_persists_interval_and_strategy() {
        let db_path = unique_test_db_path();

        run_config_set(
            Some(25),
            None,
            Some(false),
            Some("15"),
            Some("keep_remote"),
            &db_path,
        )
        .await
        .unwrap();

        let store = LocalStore::open_path(&db_path).await.unwrap();
        let config = store.load_sync_config().await.unwrap();
        assert_eq!(config.batch_size, 25);
        assert!(!config.auto_sync_enabled);
        assert_eq!(config.sync_interval_minutes, Some(15));
        assert_eq!(
            config.conflict_resolution_strategy,
            ResolutionStrategy::KeepRemote
        );

        cleanup_db_files(&db_path);
    }

    fn sample_conflict() -> seva_core::models::ConflictLogEntry {
        seva_core::models::ConflictLogEntry {
            id: 3,
            collection: "volunteers".to_string(),
            local_id: "local".to_string(),
            remote_id: Some("remote".to_string()),
            conflict_field: "login".to_string(),
            local_value: "usha".to_string(),
            remote_value: "usha".to_string(),
            detected_at: 1_000,
            resolved: false,
            resolution_strategy: None,
            resolved_at: None,
            resolved_by: None,
            notes: None,
        }
    }

    fn unique_test_db_path() -> PathBuf {
        static NEXT_TEST_DB_ID: AtomicU64 = AtomicU64::new(0);

        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |duration| duration.as_nanos());
        let sequence = NEXT_TEST_DB_ID.fetch_add(1, Ordering::Relaxed);
        std::env::temp_dir().join(format!("seva-cli-test-{timestamp}-{sequence}.db"))
    }

    fn cleanup_db_files(path: &PathBuf) {
        let _ = std::fs::remove_file(path);
        let _ = std::fs::remove_file(path.with_extension("db-shm"));
        let _ = std::fs::remove_file(path.with_extension("db-wal"));
    }
}
