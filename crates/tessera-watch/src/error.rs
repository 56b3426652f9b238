//! Error types for the polling watcher.

use crate::state::WatchState;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while watching a project tree.
#[derive(Error, Debug)]
pub enum WatchError {
    /// Root directory does not exist.
    #[error("Watch root '{0}' does not exist")]
    MissingRoot(PathBuf),

    /// Include or exclude glob failed to compile.
    #[error("Invalid pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: globset::Error,
    },

    /// No include patterns were given.
    #[error("At least one include pattern is required")]
    NoIncludes,

    /// State machine was asked for a move it does not allow.
    #[error("Invalid watcher transition {from} -> {to}")]
    InvalidTransition { from: WatchState, to: WatchState },

    /// Watcher is already running.
    #[error("Watcher is already running")]
    AlreadyRunning,

    /// Background task failed.
    #[error("Watcher task failed: {0}")]
    Task(String),
}

/// Result type for watcher operations.
pub type Result<T> = std::result::Result<T, WatchError>;
