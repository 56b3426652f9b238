use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvokeParams {
    pub name: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListParams {
    /// `entities` or `functions`; functions when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticsParams {
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
    #[serde(default)]
    pub include_resolved: bool,
}

fn default_limit() -> usize {
    50
}

impl Default for DiagnosticsParams {
    fn default() -> Self {
        Self {
            limit: default_limit(),
            offset: 0,
            include_resolved: false,
        }
    }
}

/// Filters for `diagnostics.resolve`; with neither set every open entry resolves
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolveParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachParams {
    pub pid: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetachParams {
    /// Release only if this client holds the slot; any holder when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diagnostics_defaults() {
        let params: DiagnosticsParams = serde_json::from_str("{}").unwrap();
        assert_eq!(params, DiagnosticsParams::default());
        assert_eq!(params.limit, 50);
    }

    #[test]
    fn test_invoke_arguments_optional() {
        let params: InvokeParams = serde_json::from_str(r#"{"name":"ping"}"#).unwrap();
        assert!(params.arguments.is_empty());
    }
}
