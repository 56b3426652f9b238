//! `[transport]` section: exposed-tool manifest

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TransportSection {
    pub enabled: bool,
    /// Manifest location, relative to the project root
    pub manifest: Option<PathBuf>,
}

impl Default for TransportSection {
    fn default() -> Self {
        Self {
            enabled: true,
            manifest: None,
        }
    }
}

impl TransportSection {
    pub fn manifest_path(&self, root: &Path) -> PathBuf {
        match &self.manifest {
            Some(path) if path.is_absolute() => path.clone(),
            Some(path) => root.join(path),
            None => crate::state_dir(root).join("tools.json"),
        }
    }
}
