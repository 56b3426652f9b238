//! Error types for invocation, topology and runtime operations.

use crate::diagnostics::Diagnostic;
use crate::registry::RegistryError;
use crate::runner::RunnerFailure;
use crate::scanner::ScanError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

/// Stable classification shared by the protocol and the CLI exit codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    Quarantined,
    Timeout,
    QueueFull,
    ShuttingDown,
    Runner,
    Topology,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Quarantined => "quarantined",
            ErrorKind::Timeout => "timeout",
            ErrorKind::QueueFull => "queue_full",
            ErrorKind::ShuttingDown => "shutting_down",
            ErrorKind::Runner => "runner",
            ErrorKind::Topology => "topology",
            ErrorKind::Internal => "internal",
        }
    }

    /// Process exit code for the CLI
    pub fn exit_code(&self) -> i32 {
        match self {
            ErrorKind::Validation => 2,
            ErrorKind::NotFound | ErrorKind::Quarantined => 3,
            ErrorKind::Timeout => 4,
            ErrorKind::QueueFull
            | ErrorKind::ShuttingDown
            | ErrorKind::Runner
            | ErrorKind::Topology
            | ErrorKind::Internal => 5,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s {
            "validation" => ErrorKind::Validation,
            "not_found" => ErrorKind::NotFound,
            "quarantined" => ErrorKind::Quarantined,
            "timeout" => ErrorKind::Timeout,
            "queue_full" => ErrorKind::QueueFull,
            "shutting_down" => ErrorKind::ShuttingDown,
            "runner" => ErrorKind::Runner,
            "topology" => ErrorKind::Topology,
            "internal" => ErrorKind::Internal,
            other => return Err(format!("unknown error kind: {}", other)),
        })
    }
}

/// Failures returned to the caller of a single invocation
#[derive(Debug, Error)]
pub enum InvocationError {
    #[error("function '{0}' not found")]
    NotFound(String),

    #[error("function '{name}' is quarantined: {reason}")]
    Quarantined { name: String, reason: String },

    #[error("invalid arguments for '{name}': {reason}")]
    InvalidArguments { name: String, reason: String },

    #[error("'{name}' failed: {source}")]
    Runner {
        name: String,
        #[source]
        source: RunnerFailure,
    },

    #[error("'{name}' timed out after {timeout_ms}ms")]
    Timeout { name: String, timeout_ms: u64 },

    #[error("invocation queue is full (capacity: {0})")]
    QueueFull(usize),

    #[error("runtime is shutting down")]
    ShuttingDown,
}

impl InvocationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            InvocationError::NotFound(_) => ErrorKind::NotFound,
            InvocationError::Quarantined { .. } => ErrorKind::Quarantined,
            InvocationError::InvalidArguments { .. } => ErrorKind::Validation,
            InvocationError::Runner { .. } => ErrorKind::Runner,
            InvocationError::Timeout { .. } => ErrorKind::Timeout,
            InvocationError::QueueFull(_) => ErrorKind::QueueFull,
            InvocationError::ShuttingDown => ErrorKind::ShuttingDown,
        }
    }
}

/// Daemon placement and lifecycle metadata failures
#[derive(Debug, Error)]
pub enum TopologyError {
    #[error("a daemon is already running for this root (pid {pid})")]
    AlreadyRunning { pid: u32 },

    #[error("another client is attached (pid {pid})")]
    ClientAttached { pid: u32 },

    #[error("another daemon holds the root lock {path}")]
    Locked { path: PathBuf },

    #[error("lifecycle metadata error at {path}: {source}")]
    MetadataIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to bind control socket {path}: {source}")]
    Bind {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl TopologyError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Topology
    }
}

/// Runtime-level failures outside a single invocation
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Scan(#[from] ScanError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("startup blocked by {} error diagnostic(s)", .diagnostics.len())]
    StartupBlocked { diagnostics: Vec<Diagnostic> },

    #[error("background task failed: {0}")]
    Join(String),
}

impl RuntimeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RuntimeError::StartupBlocked { .. } => ErrorKind::Validation,
            RuntimeError::Scan(_) => ErrorKind::Validation,
            RuntimeError::Registry(_) | RuntimeError::Join(_) => ErrorKind::Internal,
        }
    }
}

pub type Result<T> = std::result::Result<T, RuntimeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(InvocationError::NotFound("x".into()).kind().exit_code(), 3);
        assert_eq!(
            InvocationError::Timeout {
                name: "x".into(),
                timeout_ms: 10
            }
            .kind()
            .exit_code(),
            4
        );
        assert_eq!(InvocationError::QueueFull(1).kind().exit_code(), 5);
        assert_eq!(
            RuntimeError::StartupBlocked {
                diagnostics: Vec::new()
            }
            .kind()
            .exit_code(),
            2
        );
        assert_eq!(TopologyError::AlreadyRunning { pid: 1 }.kind().exit_code(), 5);
    }

    #[test]
    fn test_kind_strings_round_trip() {
        for kind in [ErrorKind::NotFound, ErrorKind::QueueFull, ErrorKind::ShuttingDown] {
            assert_eq!(kind.as_str().parse::<ErrorKind>().unwrap(), kind);
        }
        assert!("nope".parse::<ErrorKind>().is_err());
    }
}
