//! Start-on-demand: launch `tess daemon serve` for a root when none is running

use crate::error::{ClientError, Result};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::time::Duration;
use tessera_daemon::{is_root_locked, probe, recover_stale, DaemonState};
use tessera_protocol::socket_path;
use tracing::{debug, info, warn};

const READY_ATTEMPTS: u32 = 10;

/// Socket exists and accepts connections
pub fn is_daemon_running(socket: &Path) -> bool {
    if !socket.exists() {
        return false;
    }
    match std::os::unix::net::UnixStream::connect(socket) {
        Ok(_) => true,
        Err(e) => {
            debug!("Socket exists but connection failed: {}", e);
            false
        }
    }
}

/// Spawn the current executable as the daemon for `root`
///
/// The child gets its own process group so a terminal interrupt aimed at
/// the launching command does not reach it.
pub fn spawn_daemon(root: &Path) -> Result<Child> {
    let exe = std::env::current_exe().map_err(ClientError::Spawn)?;
    debug!("Spawning daemon: {} daemon serve --root {:?}", exe.display(), root);

    let mut command = Command::new(&exe);
    command
        .arg("daemon")
        .arg("serve")
        .arg("--root")
        .arg(root)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }
    let child = command.spawn().map_err(ClientError::Spawn)?;
    info!(pid = child.id(), "Spawned daemon process");
    Ok(child)
}

/// Make sure a daemon serves `root`; true when this call started it
pub async fn ensure_daemon(root: &Path) -> Result<bool> {
    let socket = socket_path(root);
    let probed = probe(root);
    match probed.state {
        DaemonState::Running if is_daemon_running(&socket) => {
            debug!("Daemon already running at {:?}", socket);
            return Ok(false);
        }
        DaemonState::Running => {
            // metadata is written after bind, so this is a daemon mid-teardown
            debug!(reason = %probed.reason, "Daemon metadata present but socket refused");
            return wait_for_socket(root, None).await.map(|_| false);
        }
        DaemonState::Stale => {
            recover_stale(root)?;
        }
        DaemonState::Absent => {}
    }

    if is_root_locked(root) {
        debug!("Another daemon holds the root lock, waiting for it");
        return wait_for_socket(root, None).await.map(|_| false);
    }

    info!(root = %root.display(), "Daemon not running, starting one");
    let mut child = spawn_daemon(root)?;
    wait_for_socket(root, Some(&mut child)).await?;
    Ok(true)
}

/// Poll with exponential backoff until the socket accepts connections
///
/// A child that exits while another process holds the root lock lost a
/// start race; the winner's socket is awaited instead.
async fn wait_for_socket(root: &Path, mut child: Option<&mut Child>) -> Result<()> {
    let socket = socket_path(root);
    let mut delay = Duration::from_millis(50);

    for attempt in 0..READY_ATTEMPTS {
        tokio::time::sleep(delay).await;

        if let Some(child) = child.as_deref_mut() {
            if let Some(status) = child.try_wait()? {
                if !is_daemon_running(&socket) && !is_root_locked(root) {
                    return Err(ClientError::DaemonExited {
                        code: status.code(),
                    });
                }
                debug!(code = ?status.code(), "Spawned daemon lost the start race");
            }
        }
        if is_daemon_running(&socket) {
            info!("Daemon ready after {} attempts", attempt + 1);
            return Ok(());
        }

        delay = std::cmp::min(delay * 2, Duration::from_secs(1));
        if attempt > 5 {
            warn!("Daemon not ready after {} attempts, retrying...", attempt + 1);
        }
    }

    Err(ClientError::StartTimeout {
        attempts: READY_ATTEMPTS,
    })
}
