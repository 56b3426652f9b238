use std::path::PathBuf;
use tessera_core::{ErrorKind, TopologyError};
use tessera_protocol::RpcError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("cannot connect to daemon at {path}: {source}")]
    Connect {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("daemon connection failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed daemon message: {0}")]
    Protocol(#[from] serde_json::Error),

    #[error("connection closed by daemon")]
    Closed,

    /// The daemon answered with an error; its classification is preserved
    #[error("{}", .0.message)]
    Rpc(RpcError),

    #[error("failed to launch daemon: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("daemon exited during startup (status {})", .code.map_or("unknown".to_string(), |c| c.to_string()))]
    DaemonExited { code: Option<i32> },

    #[error("daemon did not become ready after {attempts} attempts; see .tessera/daemon.log")]
    StartTimeout { attempts: u32 },

    #[error(transparent)]
    Topology(#[from] TopologyError),
}

impl ClientError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClientError::Rpc(e) => e.kind(),
            // startup refusals surface through the child's exit status
            ClientError::DaemonExited { code: Some(2) } => ErrorKind::Validation,
            ClientError::Connect { .. }
            | ClientError::Spawn(_)
            | ClientError::DaemonExited { .. }
            | ClientError::StartTimeout { .. }
            | ClientError::Topology(_) => ErrorKind::Topology,
            ClientError::Io(_) | ClientError::Protocol(_) | ClientError::Closed => {
                ErrorKind::Internal
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
