//! Daemon management commands

use anyhow::{Context, Result};
use colored::Colorize;
use std::path::Path;
use std::time::{Duration, Instant};
use tessera_config::ProjectConfig;
use tessera_core::TopologyError;
use tessera_daemon::lifecycle::lock_path;
use tessera_daemon::{is_root_locked, probe, recover_stale, Daemon, DaemonState};
use tessera_daemon_client::{ensure_daemon, DaemonClient};
use tracing::info;

use crate::cli::DaemonCommands;

pub async fn handle(cmd: DaemonCommands, root: &Path, json: bool) -> Result<()> {
    match cmd {
        DaemonCommands::Start { foreground } => start_daemon(root, foreground).await,
        DaemonCommands::Stop => stop_daemon(root).await,
        DaemonCommands::Status => show_status(root, json).await,
        DaemonCommands::Serve => serve(root).await,
    }
}

/// Run the daemon in this process until it is told to stop
pub async fn serve(root: &Path) -> Result<()> {
    let config = ProjectConfig::load(root)?;
    Daemon::new(root, config).run().await?;
    Ok(())
}

async fn start_daemon(root: &Path, foreground: bool) -> Result<()> {
    let probed = probe(root);
    if let (DaemonState::Running, Some(meta)) = (probed.state, &probed.metadata) {
        return Err(TopologyError::AlreadyRunning { pid: meta.pid }.into());
    }
    if is_root_locked(root) {
        return Err(TopologyError::Locked {
            path: lock_path(root),
        }
        .into());
    }

    if foreground {
        info!("Starting daemon in foreground");
        println!("Daemon serving {} (pid {})", root.display(), std::process::id());
        return serve(root).await;
    }

    ensure_daemon(root).await.context("starting daemon")?;
    match probe(root).metadata {
        Some(meta) => println!("Daemon started (pid {})", meta.pid),
        None => println!("Daemon started"),
    }
    Ok(())
}

async fn stop_daemon(root: &Path) -> Result<()> {
    let probed = probe(root);
    match probed.state {
        DaemonState::Absent => {
            println!("Daemon is not running");
            return Ok(());
        }
        DaemonState::Stale => {
            recover_stale(root)?;
            println!("Daemon is not running (removed stale metadata)");
            return Ok(());
        }
        DaemonState::Running => {}
    }

    let client = DaemonClient::connect(root).await?;
    client.shutdown().await?;

    // the daemon drains in-flight calls before removing its metadata
    let drain = ProjectConfig::load(root)
        .map(|c| c.execution.drain_ms)
        .unwrap_or(5_000);
    let deadline = Instant::now() + Duration::from_millis(drain) + Duration::from_secs(5);
    while probe(root).state == DaemonState::Running {
        if Instant::now() > deadline {
            anyhow::bail!("daemon acknowledged shutdown but is still running");
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    println!("Daemon stopped");
    Ok(())
}

async fn show_status(root: &Path, json: bool) -> Result<()> {
    let probed = probe(root);
    let live = match probed.state {
        DaemonState::Running => Some(DaemonClient::connect(root).await?.status().await?),
        _ => None,
    };

    if json {
        let mut out = serde_json::to_value(&probed)?;
        if let (Some(map), Some(status)) = (out.as_object_mut(), live) {
            map.insert("runtime".into(), status);
        }
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    match (&probed.state, &probed.metadata) {
        (DaemonState::Running, Some(meta)) => {
            println!("{} (pid {})", "Daemon is running".green(), meta.pid);
            println!("  socket:  {}", meta.socket.display());
            println!("  started: {}", meta.started_at.to_rfc3339());
        }
        (DaemonState::Stale, _) => {
            println!("{} ({})", "Daemon is not running".yellow(), probed.reason)
        }
        _ => println!("Daemon is not running"),
    }
    if let Some(status) = live {
        println!("  version: {}", status["version_id"]);
        if let Some(counts) = status["counts"].as_object() {
            for (domain, count) in counts {
                println!("  {:<14} {}", format!("{}:", domain), count);
            }
        }
        println!("  quarantined: {}", status["quarantined"]);
        println!("  unresolved diagnostics: {}", status["unresolved_diagnostics"]);
        if let Some(pid) = status["client"].as_u64() {
            println!("  attached client: pid {}", pid);
        }
    }
    Ok(())
}
