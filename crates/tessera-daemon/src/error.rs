//! Errors that stop a daemon from starting or running

use tessera_config::ConfigError;
use tessera_core::{ErrorKind, RuntimeError, TopologyError};
use tessera_runners::RunnerError;
use tessera_watch::WatchError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Topology(#[from] TopologyError),

    #[error(transparent)]
    Runners(#[from] RunnerError),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error("auto reload: {0}")]
    Watch(#[from] WatchError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DaemonError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DaemonError::Config(_) | DaemonError::Watch(_) => ErrorKind::Validation,
            DaemonError::Topology(e) => e.kind(),
            DaemonError::Runtime(e) => e.kind(),
            DaemonError::Runners(_) | DaemonError::Other(_) => ErrorKind::Internal,
        }
    }
}

pub type Result<T> = std::result::Result<T, DaemonError>;
