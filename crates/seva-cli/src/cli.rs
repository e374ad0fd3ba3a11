use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "seva")]
#[command(about = "Offline-first attendance capture and sync for temple operations")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Check a user in for the day
    CheckIn {
        /// User identifier
        user: String,
        /// Device distance from the temple, in meters
        #[arg(short, long)]
        distance: f64,
    },
    /// Check a user out and compute overtime
    CheckOut {
        /// User identifier
        user: String,
        /// Device distance from the temple, in meters
        #[arg(short, long)]
        distance: f64,
    },
    /// Show today's attendance record for a user
    Status {
        /// User identifier
        user: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Sync operations
    Sync {
        #[command(subcommand)]
        command: SyncCommands,
    },
    /// Conflict log operations
    Conflicts {
        #[command(subcommand)]
        command: ConflictCommands,
    },
    /// Show or update the sync configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
pub enum SyncCommands {
    /// Run a sync now
    Run {
        /// Restrict the run to one or more collections
        #[arg(short, long, value_name = "NAME")]
        collection: Vec<String>,
    },
    /// Show connectivity, last run, and pending counts
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show recent sync runs
    Log {
        /// Number of runs to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
pub enum ConflictCommands {
    /// List conflict log entries
    List {
        /// Restrict to one collection
        #[arg(long, value_name = "NAME")]
        collection: Option<String>,
        /// Only unresolved entries
        #[arg(long)]
        unresolved: bool,
        /// Number of entries to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Resolve a conflict
    Resolve {
        /// Conflict id from `seva conflicts list`
        id: i64,
        /// rename_local, keep_remote, keep_local, or merge
        #[arg(short, long)]
        strategy: String,
        /// Replacement value for rename_local/merge
        #[arg(short, long)]
        value: Option<String>,
        /// Operator name recorded on the entry
        #[arg(long, default_value = "operator")]
        by: String,
        /// Free-form note recorded on the entry
        #[arg(long)]
        notes: Option<String>,
    },
    /// Apply the configured default strategy to open conflicts in opted-in
    /// collections
    AutoResolve {
        /// Maximum conflicts to resolve
        #[arg(short, long, default_value = "50")]
        limit: usize,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the current configuration
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Update configuration fields
    Set {
        /// Documents per push/pull batch
        #[arg(long)]
        batch_size: Option<usize>,
        /// Retry attempts per batch for transient transport errors
        #[arg(long)]
        max_retries: Option<u32>,
        /// Enable or disable automatic reconnect/scheduled sync (true/false)
        #[arg(long)]
        auto_sync: Option<bool>,
        /// Periodic sync cadence in minutes; "none" disables the scheduler
        #[arg(long, value_name = "MINUTES")]
        interval: Option<String>,
        /// Default strategy for batch auto-resolution
        #[arg(long, value_name = "STRATEGY")]
        strategy: Option<String>,
    },
}
