//! # Tessera watch
//!
//! Polling change detection for a project root. Each tick fingerprints the
//! tracked files (mtime, length), opens or resets a debounce window on any
//! difference, and fires one callback when the window closes quietly.
//!
//! ```text
//! Stopped ─▶ Watching ─▶ ChangeDetected ─▶ Debouncing ─▶ Reloading ─▶ Watching
//!                                            ▲      │
//!                                            └──────┘ (further edits)
//! ```

pub mod error;
pub mod snapshot;
pub mod state;
pub mod watcher;

pub use error::{Result, WatchError};
pub use snapshot::{ChangeSet, Fingerprint, Snapshot, WatchFilter};
pub use state::WatchState;
pub use watcher::{PollingWatcher, WatchCore, WatchOptions, MIN_INTERVAL};
