//! Bidirectional synchronization between the local store and the remote
//! document store: conflict gating, batched push/pull runs, and scheduling.

mod conflict;
mod manager;
mod scheduler;

pub use conflict::{ConflictResolver, PushCheck};
pub use manager::SyncManager;
pub use scheduler::{SyncScheduler, DEFAULT_CONFIG_POLL_INTERVAL};
