//! Daemon startup and teardown
//!
//! Startup: lock the root, build runners, boot the runtime (any error
//! diagnostic refuses startup), bind the socket, publish `daemon.json`, then
//! start auto reload. Teardown runs in reverse: stop accepting, stop the
//! watcher, drain the dispatcher, close connections, remove the socket and
//! the client slot, and remove `daemon.json` last. The root lock is held
//! from the claim until `daemon.json` is gone.

use crate::error::Result;
use crate::lifecycle::{self, DaemonMetadata};
use crate::server::Server;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tessera_config::{Overflow, ProjectConfig};
use tessera_core::{
    DispatcherConfig, ManifestTransport, OutboundTransport, OverflowPolicy, RunnerSet, Runtime,
    RuntimeError, RuntimeOptions,
};
use tessera_protocol::{remove_socket, socket_path};
use tessera_watch::{ChangeSet, PollingWatcher, WatchOptions};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

const CONNECTION_GRACE: Duration = Duration::from_secs(1);

/// Runtime settings derived from the project config
pub fn runtime_options(root: &Path, config: &ProjectConfig) -> RuntimeOptions {
    let exec = &config.execution;
    let mut app = config.app.clone();
    if let Some(name) = &config.runtime.app_name {
        app.entry("name").or_insert_with(|| json!(name));
    }
    app.entry("env").or_insert_with(|| json!(config.runtime.env));

    RuntimeOptions {
        root: root.to_path_buf(),
        dispatcher: DispatcherConfig {
            workers: exec.workers,
            queue_capacity: exec.queue_capacity,
            overflow: match exec.overflow {
                Overflow::Reject => OverflowPolicy::Reject,
                Overflow::Block => OverflowPolicy::Block,
            },
            timeout: Duration::from_millis(exec.timeout_ms),
            drain: Duration::from_millis(exec.drain_ms),
        },
        app,
        config: config.config.clone(),
    }
}

pub struct Daemon {
    root: PathBuf,
    config: ProjectConfig,
    runners: Option<RunnerSet>,
}

impl Daemon {
    pub fn new(root: impl Into<PathBuf>, config: ProjectConfig) -> Self {
        Self {
            root: root.into(),
            config,
            runners: None,
        }
    }

    /// Replace the default Lua / template / SQLite runners
    pub fn with_runners(mut self, runners: RunnerSet) -> Self {
        self.runners = Some(runners);
        self
    }

    /// Serve until `shutdown` is called over the socket or a signal arrives
    pub async fn run(self) -> Result<()> {
        let Daemon {
            root,
            config,
            runners,
        } = self;

        let _lock = lifecycle::claim(&root)?;

        let runners = match runners {
            Some(runners) => runners,
            None => tessera_runners::default_runners(&config, &root)?,
        };
        let transport = config.transport.enabled.then(|| {
            Arc::new(ManifestTransport::new(config.transport.manifest_path(&root)))
                as Arc<dyn OutboundTransport>
        });
        let runtime = Arc::new(Runtime::new(
            runtime_options(&root, &config),
            runners,
            transport,
        ));

        match runtime.boot().await {
            Ok(summary) => info!(
                version = summary.version_id,
                warnings = summary.warnings,
                "Runtime booted"
            ),
            Err(e) => {
                if let RuntimeError::StartupBlocked { diagnostics } = &e {
                    for d in diagnostics {
                        error!(code = %d.code, file = %d.location.path.display(), "{}", d.message);
                    }
                }
                return Err(e.into());
            }
        }

        let socket = socket_path(&root);
        let (shutdown_tx, _) = broadcast::channel(4);
        let server = Server::bind(&socket, &root, runtime.clone(), shutdown_tx.clone()).await?;

        let meta = DaemonMetadata::current(&root, &socket);
        if let Err(e) = lifecycle::write_daemon_metadata(&root, &meta) {
            remove_socket(&socket);
            return Err(e.into());
        }
        info!(pid = meta.pid, root = %root.display(), "Daemon started");

        let mut watcher = match start_watcher(&root, &config, runtime.clone()) {
            Ok(watcher) => watcher,
            Err(e) => {
                remove_socket(&socket);
                let _ = lifecycle::remove_daemon_metadata(&root);
                return Err(e);
            }
        };

        let signal_tx = shutdown_tx.clone();
        let signals = tokio::spawn(async move {
            wait_for_signal().await;
            info!("Termination signal received");
            let _ = signal_tx.send(());
        });

        let connections = server.run().await?;
        signals.abort();

        if let Some(watcher) = watcher.as_mut() {
            if let Err(e) = watcher.stop().await {
                warn!("Watcher did not stop cleanly: {}", e);
            }
        }
        if !runtime.shutdown().await {
            warn!("Drain window elapsed with invocations still running");
        }
        connections.close(CONNECTION_GRACE).await;
        remove_socket(&socket);
        if let Err(e) = lifecycle::release_client_slot(&root, None) {
            warn!("Failed to release client slot: {}", e);
        }
        lifecycle::remove_daemon_metadata(&root)?;
        info!("Daemon stopped");
        Ok(())
    }
}

fn start_watcher(
    root: &Path,
    config: &ProjectConfig,
    runtime: Arc<Runtime>,
) -> Result<Option<PollingWatcher>> {
    let section = &config.auto_reload;
    if !section.enabled {
        return Ok(None);
    }
    let options = WatchOptions::new(
        section.include.clone(),
        section.exclude.clone(),
        section.interval_ms,
        section.debounce_ms,
    );
    let watcher = PollingWatcher::start(root, options, move |changes: ChangeSet| {
        let runtime = runtime.clone();
        async move {
            info!(changed = changes.len(), "Change detected, reloading");
            match runtime.reload().await {
                Ok(summary) => info!(
                    version = summary.version_id,
                    published = summary.published,
                    quarantined = summary.quarantined.len(),
                    "Auto reload finished"
                ),
                Err(e) => error!("Auto reload failed: {}", e),
            }
        }
    })?;
    Ok(Some(watcher))
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            warn!("Cannot listen for SIGTERM: {}", e);
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
