//! Watcher lifecycle states and the allowed moves between them.

use crate::error::{Result, WatchError};
use std::fmt;

/// Lifecycle state of a [`crate::PollingWatcher`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatchState {
    Stopped,
    Watching,
    ChangeDetected,
    Debouncing,
    Reloading,
}

impl WatchState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WatchState::Stopped => "stopped",
            WatchState::Watching => "watching",
            WatchState::ChangeDetected => "change-detected",
            WatchState::Debouncing => "debouncing",
            WatchState::Reloading => "reloading",
        }
    }

    /// Transition table. Every running state may stop.
    pub fn can_transition(self, to: WatchState) -> bool {
        use WatchState::*;
        matches!(
            (self, to),
            (Stopped, Watching)
                | (Watching, ChangeDetected)
                | (ChangeDetected, Debouncing)
                | (Debouncing, Debouncing)
                | (Debouncing, Reloading)
                | (Reloading, Watching)
                | (Watching, Stopped)
                | (ChangeDetected, Stopped)
                | (Debouncing, Stopped)
                | (Reloading, Stopped)
        )
    }

    /// Checked move; the state is left untouched on error
    pub fn transition(&mut self, to: WatchState) -> Result<()> {
        if !self.can_transition(to) {
            return Err(WatchError::InvalidTransition { from: *self, to });
        }
        *self = to;
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        !matches!(self, WatchState::Stopped)
    }
}

impl fmt::Display for WatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
