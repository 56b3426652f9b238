use std::fs;
use std::path::{Path, PathBuf};

/// Control socket file name inside the state directory
pub const SOCKET_FILE: &str = "daemon.sock";

/// `<root>/.tessera/daemon.sock`
pub fn socket_path(root: &Path) -> PathBuf {
    tessera_config::state_dir(root).join(SOCKET_FILE)
}

pub fn remove_socket(path: &Path) {
    let _ = fs::remove_file(path);
}
