//! `[databases.<name>]` sections: named SQLite connections for query units

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// In-memory database path
pub const MEMORY: &str = ":memory:";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseSection {
    pub path: PathBuf,
    #[serde(default)]
    pub read_only: bool,
}

impl DatabaseSection {
    /// Path resolved against the project root; `:memory:` is passed through
    pub fn resolve(&self, root: &Path) -> PathBuf {
        if self.path == Path::new(MEMORY) || self.path.is_absolute() {
            self.path.clone()
        } else {
            root.join(&self.path)
        }
    }

    pub fn is_memory(&self) -> bool {
        self.path == Path::new(MEMORY)
    }
}
