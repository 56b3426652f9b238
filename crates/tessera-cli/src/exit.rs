//! Process exit codes derived from error kinds

use tessera_config::ConfigError;
use tessera_core::{ErrorKind, RuntimeError, TopologyError};
use tessera_daemon::DaemonError;
use tessera_daemon_client::ClientError;
use thiserror::Error;

pub const SUCCESS: i32 = 0;

/// Bad command-line input, reported as a validation failure
#[derive(Debug, Error)]
#[error("{0}")]
pub struct UsageError(pub String);

/// Classify an error chain by the first typed error found in it
pub fn kind_of(err: &anyhow::Error) -> ErrorKind {
    for cause in err.chain() {
        if let Some(e) = cause.downcast_ref::<ClientError>() {
            return e.kind();
        }
        if let Some(e) = cause.downcast_ref::<DaemonError>() {
            return e.kind();
        }
        if let Some(e) = cause.downcast_ref::<RuntimeError>() {
            return e.kind();
        }
        if let Some(e) = cause.downcast_ref::<TopologyError>() {
            return e.kind();
        }
        if cause.is::<ConfigError>() || cause.is::<UsageError>() {
            return ErrorKind::Validation;
        }
    }
    ErrorKind::Internal
}

pub fn code_for(err: &anyhow::Error) -> i32 {
    kind_of(err).exit_code()
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_usage_is_validation() {
        let err = anyhow::Error::new(UsageError("bad".into()));
        assert_eq!(code_for(&err), 2);
    }

    #[test]
    fn test_context_does_not_hide_kind() {
        let err: anyhow::Result<()> = Err(TopologyError::AlreadyRunning { pid: 7 }.into());
        let err = err.context("starting daemon").unwrap_err();
        assert_eq!(kind_of(&err), ErrorKind::Topology);
        assert_eq!(code_for(&err), 5);
    }

    #[test]
    fn test_startup_blocked_maps_to_two() {
        let err = anyhow::Error::new(DaemonError::Runtime(RuntimeError::StartupBlocked {
            diagnostics: Vec::new(),
        }));
        assert_eq!(code_for(&err), 2);
    }

    #[test]
    fn test_untyped_errors_are_internal() {
        assert_eq!(code_for(&anyhow::anyhow!("boom")), 5);
    }
}
