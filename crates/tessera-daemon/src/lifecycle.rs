//! Daemon lifecycle: metadata files, liveness probes, the client slot
//!
//! `<root>/.tessera/daemon.json` records the daemon owning a root and
//! `<root>/.tessera/client.json` records the single attached client. A file
//! naming a dead process is stale and may be replaced.
//!
//! `<root>/.tessera/daemon.lock` is held with an exclusive `flock` for the
//! whole life of a daemon, from before boot until after `daemon.json` is
//! removed, so two daemons starting together cannot both own a root.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tessera_config::state_dir;
use tessera_core::TopologyError;
use tracing::{debug, info, warn};

pub const DAEMON_FILE: &str = "daemon.json";
pub const CLIENT_FILE: &str = "client.json";
pub const LOCK_FILE: &str = "daemon.lock";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonMetadata {
    pub pid: u32,
    pub root: PathBuf,
    pub socket: PathBuf,
    pub started_at: DateTime<Utc>,
    pub version: String,
}

impl DaemonMetadata {
    /// Metadata describing the current process
    pub fn current(root: &Path, socket: &Path) -> Self {
        Self {
            pid: std::process::id(),
            root: root.to_path_buf(),
            socket: socket.to_path_buf(),
            started_at: Utc::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientMetadata {
    pub pid: u32,
    pub attached_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DaemonState {
    Absent,
    Running,
    Stale,
}

/// What `daemon.json` says about a root
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Probe {
    pub state: DaemonState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<DaemonMetadata>,
    pub reason: String,
}

pub fn daemon_metadata_path(root: &Path) -> PathBuf {
    state_dir(root).join(DAEMON_FILE)
}

pub fn client_metadata_path(root: &Path) -> PathBuf {
    state_dir(root).join(CLIENT_FILE)
}

pub fn lock_path(root: &Path) -> PathBuf {
    state_dir(root).join(LOCK_FILE)
}

/// Signal-0 probe; a process we may not signal still exists
#[cfg(unix)]
pub fn is_process_alive(pid: u32) -> bool {
    if pid == 0 || pid > i32::MAX as u32 {
        return false;
    }
    // SAFETY: signal 0 performs permission and existence checks only
    let rc = unsafe { libc::kill(pid as libc::pid_t, 0) };
    if rc == 0 {
        return true;
    }
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
pub fn is_process_alive(pid: u32) -> bool {
    pid == std::process::id()
}

fn metadata_error(path: &Path, source: std::io::Error) -> TopologyError {
    TopologyError::MetadataIo {
        path: path.to_path_buf(),
        source,
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Option<Result<T, String>> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => return Some(Err(e.to_string())),
    };
    Some(serde_json::from_str(&raw).map_err(|e| e.to_string()))
}

/// Write through a sibling temp file so readers never see a partial document
fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), TopologyError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| metadata_error(parent, e))?;
    }
    let body = serde_json::to_vec_pretty(value)
        .map_err(|e| metadata_error(path, std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, body).map_err(|e| metadata_error(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| metadata_error(path, e))
}

fn remove_if_present(path: &Path) -> Result<bool, TopologyError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(metadata_error(path, e)),
    }
}

/// Classify the daemon recorded for `root`
pub fn probe(root: &Path) -> Probe {
    let path = daemon_metadata_path(root);
    match read_json::<DaemonMetadata>(&path) {
        None => Probe {
            state: DaemonState::Absent,
            metadata: None,
            reason: "no daemon metadata".to_string(),
        },
        Some(Err(e)) => Probe {
            state: DaemonState::Stale,
            metadata: None,
            reason: format!("unreadable daemon metadata: {}", e),
        },
        Some(Ok(meta)) if is_process_alive(meta.pid) => Probe {
            state: DaemonState::Running,
            reason: format!("pid {} is alive", meta.pid),
            metadata: Some(meta),
        },
        Some(Ok(meta)) => Probe {
            state: DaemonState::Stale,
            reason: format!("pid {} is not running", meta.pid),
            metadata: Some(meta),
        },
    }
}

/// Delete stale daemon metadata and its socket; false when nothing was stale
pub fn recover_stale(root: &Path) -> Result<bool, TopologyError> {
    let probe = probe(root);
    if probe.state != DaemonState::Stale {
        return Ok(false);
    }
    warn!(root = %root.display(), reason = %probe.reason, "Recovering stale daemon metadata");
    remove_if_present(&daemon_metadata_path(root))?;
    if let Some(meta) = &probe.metadata {
        remove_if_present(&meta.socket)?;
    }
    Ok(true)
}

/// Exclusive ownership of a root, released when dropped
///
/// The lock file is left in place; unlinking it while held would let a
/// later daemon lock a fresh inode next to a live holder.
#[derive(Debug)]
pub struct RootLock {
    file: File,
    path: PathBuf,
}

impl RootLock {
    /// Take the root's lock without waiting; `None` when another process holds it
    pub fn try_acquire(root: &Path) -> Result<Option<Self>, TopologyError> {
        let path = lock_path(root);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| metadata_error(parent, e))?;
        }
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| metadata_error(&path, e))?;
        if !try_lock_exclusive(&file).map_err(|e| metadata_error(&path, e))? {
            return Ok(None);
        }
        // record the holder so a refused starter can name it
        let pid = std::process::id().to_string();
        file.set_len(0)
            .and_then(|_| file.seek(SeekFrom::Start(0)))
            .and_then(|_| file.write_all(pid.as_bytes()))
            .map_err(|e| metadata_error(&path, e))?;
        debug!(path = %path.display(), "Acquired root lock");
        Ok(Some(Self { file, path }))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RootLock {
    fn drop(&mut self) {
        unlock(&self.file);
        debug!(path = %self.path.display(), "Released root lock");
    }
}

#[cfg(unix)]
fn try_lock_exclusive(file: &File) -> std::io::Result<bool> {
    use std::os::unix::io::AsRawFd;
    // SAFETY: the descriptor is owned by `file` for the duration of the call
    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if rc == 0 {
        return Ok(true);
    }
    let err = std::io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::EWOULDBLOCK) {
        Ok(false)
    } else {
        Err(err)
    }
}

#[cfg(unix)]
fn unlock(file: &File) {
    use std::os::unix::io::AsRawFd;
    // SAFETY: as above; closing the file would release the lock anyway
    unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_UN) };
}

#[cfg(not(unix))]
fn try_lock_exclusive(_file: &File) -> std::io::Result<bool> {
    Ok(true)
}

#[cfg(not(unix))]
fn unlock(_file: &File) {}

/// Pid written by the current lock holder, if readable
fn lock_holder(root: &Path) -> Option<u32> {
    let mut raw = String::new();
    File::open(lock_path(root)).ok()?.read_to_string(&mut raw).ok()?;
    raw.trim().parse().ok()
}

/// Another process holds the root lock: a daemon is starting or serving
pub fn is_root_locked(root: &Path) -> bool {
    let path = lock_path(root);
    let Ok(file) = File::open(&path) else {
        return false;
    };
    match try_lock_exclusive(&file) {
        Ok(true) => {
            unlock(&file);
            false
        }
        Ok(false) => true,
        Err(e) => {
            debug!("Failed to check lock file {:?}: {}", path, e);
            false
        }
    }
}

/// Take exclusive ownership of `root` for a new daemon
///
/// Refuses when another process holds the root lock or a live daemon is
/// recorded in `daemon.json`; stale leftovers are cleared under the lock.
pub fn claim(root: &Path) -> Result<RootLock, TopologyError> {
    let Some(lock) = RootLock::try_acquire(root)? else {
        return Err(match lock_holder(root).or_else(|| probe(root).metadata.map(|m| m.pid)) {
            Some(pid) => TopologyError::AlreadyRunning { pid },
            None => TopologyError::Locked {
                path: lock_path(root),
            },
        });
    };
    let probe = probe(root);
    match (probe.state, probe.metadata) {
        (DaemonState::Running, Some(meta)) => Err(TopologyError::AlreadyRunning { pid: meta.pid }),
        (DaemonState::Stale, _) => recover_stale(root).map(|_| lock),
        _ => Ok(lock),
    }
}

pub fn write_daemon_metadata(root: &Path, meta: &DaemonMetadata) -> Result<PathBuf, TopologyError> {
    let path = daemon_metadata_path(root);
    write_json(&path, meta)?;
    debug!(path = %path.display(), pid = meta.pid, "Wrote daemon metadata");
    Ok(path)
}

pub fn remove_daemon_metadata(root: &Path) -> Result<bool, TopologyError> {
    remove_if_present(&daemon_metadata_path(root))
}

/// Live client holding the slot, if any
pub fn current_client(root: &Path) -> Option<ClientMetadata> {
    match read_json::<ClientMetadata>(&client_metadata_path(root)) {
        Some(Ok(client)) if is_process_alive(client.pid) => Some(client),
        _ => None,
    }
}

/// Take the single client slot for `pid`
///
/// A slot held by a dead process or by an unreadable file is replaced; one
/// held by another live process is refused.
pub fn acquire_client_slot(root: &Path, pid: u32) -> Result<ClientMetadata, TopologyError> {
    if let Some(holder) = current_client(root) {
        if holder.pid != pid {
            return Err(TopologyError::ClientAttached { pid: holder.pid });
        }
        return Ok(holder);
    }
    let client = ClientMetadata {
        pid,
        attached_at: Utc::now(),
    };
    write_json(&client_metadata_path(root), &client)?;
    info!(pid, "Client attached");
    Ok(client)
}

/// Release the slot; with `pid` set, only when that process holds it
pub fn release_client_slot(root: &Path, pid: Option<u32>) -> Result<bool, TopologyError> {
    let path = client_metadata_path(root);
    if let Some(pid) = pid {
        if let Some(Ok(holder)) = read_json::<ClientMetadata>(&path) {
            if holder.pid != pid && is_process_alive(holder.pid) {
                return Ok(false);
            }
        }
    }
    let released = remove_if_present(&path)?;
    if released {
        info!("Client detached");
    }
    Ok(released)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    // Never a live pid: above the kernel's pid_max ceiling
    const DEAD_PID: u32 = 4_194_304 + 7;

    fn meta(root: &Path, pid: u32) -> DaemonMetadata {
        DaemonMetadata {
            pid,
            ..DaemonMetadata::current(root, &root.join(".tessera/daemon.sock"))
        }
    }

    #[test]
    fn test_probe_absent() {
        let dir = TempDir::new().unwrap();
        assert_eq!(probe(dir.path()).state, DaemonState::Absent);
    }

    #[test]
    fn test_probe_running_and_claim_refused() {
        let dir = TempDir::new().unwrap();
        // pid 1 is always alive and never this test process
        write_daemon_metadata(dir.path(), &meta(dir.path(), 1)).unwrap();
        assert_eq!(probe(dir.path()).state, DaemonState::Running);
        let err = claim(dir.path()).unwrap_err();
        assert!(matches!(err, TopologyError::AlreadyRunning { pid: 1 }));
    }

    #[test]
    fn test_dead_pid_is_stale_and_recovered() {
        let dir = TempDir::new().unwrap();
        write_daemon_metadata(dir.path(), &meta(dir.path(), DEAD_PID)).unwrap();
        let probed = probe(dir.path());
        assert_eq!(probed.state, DaemonState::Stale);
        assert_eq!(probed.metadata.unwrap().pid, DEAD_PID);

        let _lock = claim(dir.path()).unwrap();
        assert!(!daemon_metadata_path(dir.path()).exists());
        assert_eq!(probe(dir.path()).state, DaemonState::Absent);
    }

    #[test]
    fn test_claim_is_exclusive_until_dropped() {
        let dir = TempDir::new().unwrap();
        let lock = claim(dir.path()).unwrap();
        assert!(is_root_locked(dir.path()));

        let err = claim(dir.path()).unwrap_err();
        assert!(matches!(err, TopologyError::AlreadyRunning { pid } if pid == std::process::id()));

        drop(lock);
        assert!(!is_root_locked(dir.path()));
        let _again = claim(dir.path()).unwrap();
    }

    #[test]
    fn test_unlocked_root() {
        let dir = TempDir::new().unwrap();
        assert!(!is_root_locked(dir.path()));
    }

    #[test]
    fn test_corrupt_metadata_is_stale() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(state_dir(dir.path())).unwrap();
        fs::write(daemon_metadata_path(dir.path()), "{ not json").unwrap();
        let probed = probe(dir.path());
        assert_eq!(probed.state, DaemonState::Stale);
        assert!(probed.metadata.is_none());
        assert!(recover_stale(dir.path()).unwrap());
    }

    #[test]
    fn test_client_slot_single_holder() {
        let dir = TempDir::new().unwrap();
        let me = std::process::id();
        acquire_client_slot(dir.path(), me).unwrap();
        // re-acquiring by the holder is a no-op
        assert_eq!(acquire_client_slot(dir.path(), me).unwrap().pid, me);

        let err = acquire_client_slot(dir.path(), 1).unwrap_err();
        assert!(matches!(err, TopologyError::ClientAttached { pid } if pid == me));

        // another live pid cannot release our slot
        assert!(!release_client_slot(dir.path(), Some(1)).unwrap());
        assert!(release_client_slot(dir.path(), Some(me)).unwrap());
        assert!(current_client(dir.path()).is_none());
    }

    #[test]
    fn test_dead_client_slot_is_replaced() {
        let dir = TempDir::new().unwrap();
        write_json(
            &client_metadata_path(dir.path()),
            &ClientMetadata {
                pid: DEAD_PID,
                attached_at: Utc::now(),
            },
        )
        .unwrap();
        let me = std::process::id();
        assert_eq!(acquire_client_slot(dir.path(), me).unwrap().pid, me);
    }

    #[test]
    fn test_release_without_slot() {
        let dir = TempDir::new().unwrap();
        assert!(!release_client_slot(dir.path(), None).unwrap());
    }
}
