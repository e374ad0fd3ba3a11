use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] seva_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("User id cannot be empty")]
    EmptyUserId,
    #[error("Unknown resolution strategy '{0}'. Use rename_local, keep_remote, keep_local, or merge")]
    UnknownStrategy(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidFlag(&'static str, String),
}
