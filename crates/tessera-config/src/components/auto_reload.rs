//! `[auto_reload]` section: polling watcher settings

use serde::{Deserialize, Serialize};

/// Floor for the polling interval
pub const MIN_INTERVAL_MS: u64 = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AutoReloadSection {
    pub enabled: bool,
    pub interval_ms: u64,
    pub debounce_ms: u64,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

impl Default for AutoReloadSection {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_ms: 1000,
            debounce_ms: 300,
            include: vec!["*.lua".into(), "*.sql".into(), "*.md".into()],
            exclude: Vec::new(),
        }
    }
}
