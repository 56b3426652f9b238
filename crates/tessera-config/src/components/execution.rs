//! `[execution]` section: invocation pool sizing and limits

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Overflow {
    #[default]
    Reject,
    Block,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExecutionSection {
    pub workers: usize,
    pub timeout_ms: u64,
    pub queue_capacity: usize,
    pub overflow: Overflow,
    /// Grace period for in-flight calls at shutdown
    pub drain_ms: u64,
}

impl Default for ExecutionSection {
    fn default() -> Self {
        Self {
            workers: 4,
            timeout_ms: 30_000,
            queue_capacity: 64,
            overflow: Overflow::Reject,
            drain_ms: 5_000,
        }
    }
}
