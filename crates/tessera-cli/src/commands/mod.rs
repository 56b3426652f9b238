//! Command implementations

pub mod attach;
pub mod check;
pub mod daemon;
pub mod diagnostics;
pub mod invoke;
pub mod list;
pub mod reload;

use anyhow::Result;
use serde_json::Value;
use std::path::Path;
use tessera_daemon_client::{ensure_daemon, DaemonClient};
use tracing::info;

/// Connect to the root's daemon, starting one when none is running
pub async fn connect(root: &Path) -> Result<DaemonClient> {
    if ensure_daemon(root).await? {
        info!(root = %root.display(), "Started daemon on demand");
    }
    Ok(DaemonClient::connect(root).await?)
}

/// Strings print bare; everything else as indented JSON
pub fn print_value(value: &Value) -> Result<()> {
    match value {
        Value::String(s) => println!("{}", s),
        other => println!("{}", serde_json::to_string_pretty(other)?),
    }
    Ok(())
}
