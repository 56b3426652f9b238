//! Outbound transport: publishes the exposed-tools domain to external clients

use crate::registry::DomainMap;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to write tool manifest {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode tool manifest: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    Ok,
    /// Tools whose input schema changed under connected clients
    NeedsReinit(Vec<String>),
}

#[async_trait]
pub trait OutboundTransport: Send + Sync {
    async fn refresh(&self, tools: &DomainMap) -> Result<RefreshOutcome, TransportError>;
}

/// One tool as external clients see it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolManifestEntry {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub input_schema: JsonValue,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolManifest {
    pub generated_at: chrono::DateTime<chrono::Utc>,
    pub tools: Vec<ToolManifestEntry>,
}

/// Writes the exposed tools to a JSON manifest file
pub struct ManifestTransport {
    path: PathBuf,
    published: Mutex<Option<BTreeMap<String, JsonValue>>>,
}

impl ManifestTransport {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            published: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn entries(tools: &DomainMap) -> Vec<ToolManifestEntry> {
        tools
            .values()
            .map(|d| ToolManifestEntry {
                name: d.name.clone(),
                description: d
                    .exposure
                    .description
                    .clone()
                    .or_else(|| d.description.clone()),
                input_schema: d.signature.input_schema(),
            })
            .collect()
    }
}

#[async_trait]
impl OutboundTransport for ManifestTransport {
    async fn refresh(&self, tools: &DomainMap) -> Result<RefreshOutcome, TransportError> {
        let entries = Self::entries(tools);
        let schemas: BTreeMap<String, JsonValue> = entries
            .iter()
            .map(|e| (e.name.clone(), e.input_schema.clone()))
            .collect();

        let manifest = ToolManifest {
            generated_at: chrono::Utc::now(),
            tools: entries,
        };
        let json = serde_json::to_string_pretty(&manifest)?;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| TransportError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }
        tokio::fs::write(&self.path, json)
            .await
            .map_err(|source| TransportError::Io {
                path: self.path.clone(),
                source,
            })?;

        let previous = self.published.lock().replace(schemas.clone());
        let changed: Vec<String> = match previous {
            None => Vec::new(),
            Some(previous) => schemas
                .iter()
                .filter(|(name, schema)| previous.get(*name).is_some_and(|old| old != *schema))
                .map(|(name, _)| name.clone())
                .collect(),
        };

        debug!(path = %self.path.display(), tools = schemas.len(), changed = changed.len(), "Refreshed tool manifest");
        if changed.is_empty() {
            Ok(RefreshOutcome::Ok)
        } else {
            Ok(RefreshOutcome::NeedsReinit(changed))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{fixtures, ArgumentSpec};
    use crate::types::TypeExpr;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn tools(with_scope: bool) -> DomainMap {
        let mut d = fixtures::function("search", "search.lua");
        d.exposure.externally_exposed = true;
        d.signature.arguments = vec![ArgumentSpec::new("query", TypeExpr::String)];
        if with_scope {
            d.signature
                .arguments
                .push(ArgumentSpec::new("scope", TypeExpr::String));
        }
        let mut map = DomainMap::new();
        map.insert("search".into(), Arc::new(d));
        map
    }

    #[tokio::test]
    async fn test_manifest_is_written() {
        let dir = TempDir::new().unwrap();
        let transport = ManifestTransport::new(dir.path().join(".tessera/tools.json"));
        let outcome = transport.refresh(&tools(false)).await.unwrap();
        assert_eq!(outcome, RefreshOutcome::Ok);

        let raw = std::fs::read_to_string(transport.path()).unwrap();
        let manifest: ToolManifest = serde_json::from_str(&raw).unwrap();
        assert_eq!(manifest.tools.len(), 1);
        assert_eq!(manifest.tools[0].input_schema["required"], serde_json::json!(["query"]));
    }

    #[tokio::test]
    async fn test_schema_change_needs_reinit() {
        let dir = TempDir::new().unwrap();
        let transport = ManifestTransport::new(dir.path().join("tools.json"));
        transport.refresh(&tools(false)).await.unwrap();
        assert_eq!(transport.refresh(&tools(false)).await.unwrap(), RefreshOutcome::Ok);
        assert_eq!(
            transport.refresh(&tools(true)).await.unwrap(),
            RefreshOutcome::NeedsReinit(vec!["search".into()])
        );
    }
}
