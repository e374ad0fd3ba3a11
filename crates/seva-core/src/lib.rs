//! seva-core - Core engine for Seva
//!
//! Offline-first attendance capture and bidirectional sync between a local
//! embedded store and a remote document store: geofenced check-in/check-out,
//! unique-field conflict detection, and batched resumable sync runs.

pub mod attendance;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod geofence;
pub mod models;
pub mod monitor;
pub mod remote;
pub mod store;
pub mod sync;
pub mod util;

pub use config::EngineConfig;
pub use engine::{SyncEngine, SyncStatusReport};
pub use error::{Error, Result};
pub use store::LocalStore;
