//! `tess`: command-line front end for the Tessera daemon

pub mod cli;
pub mod commands;
pub mod exit;
pub mod logging;

use anyhow::{Context, Result};
use cli::{Cli, Commands, DaemonCommands};
use std::path::PathBuf;
use tessera_config::ProjectConfig;
use tessera_protocol::{DiagnosticsParams, ResolveParams};

/// Absolute, symlink-free project root so every process agrees on the socket path
pub fn resolve_root(root: Option<PathBuf>) -> Result<PathBuf> {
    let root = match root {
        Some(root) => root,
        None => std::env::current_dir().context("reading current directory")?,
    };
    std::fs::canonicalize(&root)
        .map_err(|e| exit::UsageError(format!("project root {}: {}", root.display(), e)).into())
}

pub async fn run(cli: Cli) -> Result<()> {
    let root = resolve_root(cli.root)?;

    let configured = ProjectConfig::load(&root)
        .ok()
        .and_then(|c| c.runtime.log_level);
    if matches!(cli.command, Commands::Daemon(DaemonCommands::Serve)) {
        let filter = logging::build_filter(cli.log_level, configured.as_deref(), "info");
        logging::init_daemon(&root, filter);
    } else {
        let filter = logging::build_filter(cli.log_level, configured.as_deref(), "warn");
        logging::init_stderr(filter);
    }

    match cli.command {
        Commands::Daemon(cmd) => commands::daemon::handle(cmd, &root, cli.json).await,
        Commands::Invoke {
            name,
            args_json,
            arg,
        } => commands::invoke::execute(&root, &name, args_json.as_deref(), &arg).await,
        Commands::List { domain } => commands::list::execute(&root, &domain, cli.json).await,
        Commands::Diagnostics { all, limit, offset } => {
            let params = DiagnosticsParams {
                limit,
                offset,
                include_resolved: all,
            };
            commands::diagnostics::list(&root, params, cli.json).await
        }
        Commands::Resolve { code, file } => {
            commands::diagnostics::resolve(&root, ResolveParams { code, file }).await
        }
        Commands::Reload => commands::reload::execute(&root, cli.json).await,
        Commands::Attach => commands::attach::execute(&root).await,
        Commands::Detach => commands::attach::detach(&root).await,
        Commands::Check => commands::check::execute(&root, cli.json).await,
    }
}
