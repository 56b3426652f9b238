//! `[runtime]` section

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeSection {
    pub app_name: Option<String>,
    pub env: String,
    /// `tracing` filter directive; the CLI flag and `RUST_LOG` take precedence
    pub log_level: Option<String>,
}

impl Default for RuntimeSection {
    fn default() -> Self {
        Self {
            app_name: None,
            env: "development".to_string(),
            log_level: None,
        }
    }
}
