//! Errors raised while setting runners up. Failures during a call are
//! [`tessera_core::RunnerFailure`]s instead.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RunnerError {
    /// A configured database could not be opened
    #[error("Failed to open database '{name}' at {path}: {source}")]
    Open {
        name: String,
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// Parent directory for a database file could not be created
    #[error("Failed to prepare {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, RunnerError>;
