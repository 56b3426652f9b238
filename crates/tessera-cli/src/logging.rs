//! Subscriber setup: stderr for commands, a log file for the daemon

use crate::cli::LogLevel;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tessera_config::{fallback_log_dir, state_dir};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

pub const DAEMON_LOG: &str = "daemon.log";

/// `--log-level` beats `RUST_LOG`, which beats `runtime.log_level`
pub fn build_filter(flag: Option<LogLevel>, configured: Option<&str>, fallback: &str) -> EnvFilter {
    if let Some(level) = flag {
        return EnvFilter::default().add_directive(LevelFilter::from(level).into());
    }
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }
    configured
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(fallback))
}

/// Interactive commands: warnings and up on stderr unless asked otherwise
pub fn init_stderr(filter: EnvFilter) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Daemon: append to `.tessera/daemon.log`, or the user state dir when the
/// project cannot hold one. Returns the file in use.
pub fn init_daemon(root: &Path, filter: EnvFilter) -> Option<PathBuf> {
    let Some((path, file)) = open_daemon_log(root) else {
        init_stderr(filter);
        return None;
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_writer(Mutex::new(file))
        .try_init();
    Some(path)
}

fn open_daemon_log(root: &Path) -> Option<(PathBuf, File)> {
    let candidates = [Some(state_dir(root)), fallback_log_dir()];
    candidates.into_iter().flatten().find_map(|dir| {
        fs::create_dir_all(&dir).ok()?;
        let path = dir.join(DAEMON_LOG);
        let file = OpenOptions::new().create(true).append(true).open(&path).ok()?;
        Some((path, file))
    })
}
