//! Runtime: the registry owner and the single entry point for reloads and calls
//!
//! Reload cycles are strictly serialized behind an async mutex; a request that
//! arrives mid-cycle waits and then runs its own cycle against whatever the
//! first one published. Invocations never take that lock: they load the
//! current version once and keep it for the whole call.

use crate::arguments::ArgumentResolver;
use crate::descriptor::SourceLocation;
use crate::diagnostics::{codes, Diagnostic, DiagnosticPage, DiagnosticStore};
use crate::error::{InvocationError, Result, RuntimeError};
use crate::execution::{Dispatcher, DispatcherConfig, DispatcherStats};
use crate::nested::{self, NestedCalls};
use crate::registry::{Domain, Registry, RegistryVersion};
use crate::reload::{client_action_required, ReloadEngine, ReloadOutcome, ReloadSummary};
use crate::runner::{RunRequest, RunnerSet};
use crate::scanner::{ScanError, Scanner};
use crate::transport::{OutboundTransport, RefreshOutcome};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Static settings for one runtime instance
#[derive(Debug, Clone, Default)]
pub struct RuntimeOptions {
    pub root: PathBuf,
    pub dispatcher: DispatcherConfig,
    /// Values reachable as `app.*` from context-injected arguments
    pub app: Map<String, JsonValue>,
    /// Values reachable as `config.*` from context-injected arguments
    pub config: Map<String, JsonValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeStatus {
    pub root: PathBuf,
    pub version_id: u64,
    pub counts: BTreeMap<Domain, usize>,
    pub quarantined: usize,
    pub unresolved_diagnostics: usize,
    pub dispatcher: DispatcherStats,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_reload: Option<ReloadSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuarantineEntry {
    pub name: String,
    pub code: String,
    pub reason: String,
    pub file: PathBuf,
}

/// `list` result for one domain
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Listing {
    pub version_id: u64,
    pub domain: Domain,
    pub items: Vec<JsonValue>,
    pub quarantined: Vec<QuarantineEntry>,
}

pub struct Runtime {
    scanner: Scanner,
    registry: Registry,
    store: DiagnosticStore,
    reload_lock: tokio::sync::Mutex<()>,
    runners: Arc<RunnerSet>,
    transport: Option<Arc<dyn OutboundTransport>>,
    dispatcher: Dispatcher,
    arguments: Arc<ArgumentResolver>,
    last_reload: Mutex<Option<ReloadSummary>>,
    started_at: DateTime<Utc>,
}

impl Runtime {
    pub fn new(
        options: RuntimeOptions,
        runners: RunnerSet,
        transport: Option<Arc<dyn OutboundTransport>>,
    ) -> Self {
        Self {
            scanner: Scanner::new(options.root),
            registry: Registry::new(),
            store: DiagnosticStore::new(),
            reload_lock: tokio::sync::Mutex::new(()),
            runners: Arc::new(runners),
            transport,
            dispatcher: Dispatcher::new(options.dispatcher),
            arguments: Arc::new(ArgumentResolver::new(options.app, options.config)),
            last_reload: Mutex::new(None),
            started_at: Utc::now(),
        }
    }

    pub fn root(&self) -> &Path {
        self.scanner.root()
    }

    pub fn current(&self) -> Arc<RegistryVersion> {
        self.registry.current()
    }

    pub fn diagnostics_store(&self) -> &DiagnosticStore {
        &self.store
    }

    /// First cycle; any error-level diagnostic refuses startup
    pub async fn boot(&self) -> Result<ReloadSummary> {
        let _guard = self.reload_lock.lock().await;
        let outcome = self.run_engine().await?;
        if outcome.summary.errors > 0 {
            self.store.reconcile(&outcome.diagnostics);
            let diagnostics: Vec<Diagnostic> = outcome
                .diagnostics
                .into_iter()
                .filter(Diagnostic::is_error)
                .collect();
            warn!(errors = diagnostics.len(), "Startup blocked by diagnostics");
            return Err(RuntimeError::StartupBlocked { diagnostics });
        }
        self.apply(outcome).await
    }

    /// One full scan-and-reload cycle
    pub async fn reload(&self) -> Result<ReloadSummary> {
        let _guard = self.reload_lock.lock().await;
        let outcome = self.run_engine().await?;
        self.apply(outcome).await
    }

    async fn run_engine(&self) -> Result<ReloadOutcome> {
        let scanner = self.scanner.clone();
        let runners = self.runners.clone();
        let previous = self.registry.current();

        let outcome = tokio::task::spawn_blocking(move || -> std::result::Result<ReloadOutcome, ScanError> {
            let scan = scanner.scan()?;
            Ok(ReloadEngine::new(runners.as_ref()).reload(&scan, &previous))
        })
        .await
        .map_err(|e| RuntimeError::Join(e.to_string()))??;
        Ok(outcome)
    }

    async fn apply(&self, outcome: ReloadOutcome) -> Result<ReloadSummary> {
        let ReloadOutcome {
            candidate,
            mut summary,
            mut diagnostics,
        } = outcome;

        if let Some(candidate) = candidate {
            self.registry.publish(candidate)?;
            let current = self.registry.current();
            self.refresh_transport(&current, &mut summary, &mut diagnostics)
                .await;
        }

        let stats = self.store.reconcile(&diagnostics);
        info!(
            version = summary.version_id,
            published = summary.published,
            quarantined = summary.quarantined.len(),
            blocked = summary.blocked_domains.len(),
            errors = summary.errors,
            warnings = summary.warnings,
            resolved = stats.resolved,
            "Reload cycle complete"
        );
        *self.last_reload.lock() = Some(summary.clone());
        Ok(summary)
    }

    async fn refresh_transport(
        &self,
        current: &RegistryVersion,
        summary: &mut ReloadSummary,
        diagnostics: &mut Vec<Diagnostic>,
    ) {
        let Some(transport) = &self.transport else {
            return;
        };
        match transport.refresh(&current.exposed_tools).await {
            Ok(RefreshOutcome::Ok) => {}
            Ok(RefreshOutcome::NeedsReinit(names)) => {
                for name in names {
                    if summary.client_action_required.contains(&name) {
                        continue;
                    }
                    let location = current
                        .exposed_tools
                        .get(&name)
                        .map(|d| d.source.clone())
                        .unwrap_or_else(|| SourceLocation::file("<transport>"));
                    diagnostics.push(client_action_required(location, &name));
                    summary.client_action_required.push(name);
                }
            }
            Err(e) => {
                warn!(error = %e, "Transport refresh failed");
                diagnostics.push(
                    Diagnostic::warning(SourceLocation::file("<transport>"), codes::IO, e.to_string())
                        .in_domain(Domain::ExposedTools),
                );
            }
        }
    }

    /// Call a registered function by name
    pub async fn invoke(
        &self,
        name: &str,
        input: Map<String, JsonValue>,
    ) -> std::result::Result<JsonValue, InvocationError> {
        let version = self.registry.current();
        let descriptor = nested::lookup(&version, name)?;
        let arguments = self
            .arguments
            .resolve(&descriptor.signature, &input)
            .map_err(|e| InvocationError::InvalidArguments {
                name: name.to_string(),
                reason: e.to_string(),
            })?;

        let runners = self.runners.clone();
        let resolver = self.arguments.clone();
        self.dispatcher
            .submit(name, |budget| async move {
                let nested = NestedCalls::new(version, resolver, runners.clone(), budget);
                runners
                    .run(RunRequest {
                        descriptor,
                        arguments,
                        budget: Some(budget),
                        nested: Some(nested),
                    })
                    .await
                    .map_err(|source| InvocationError::Runner {
                        name: name.to_string(),
                        source,
                    })
            })
            .await
    }

    pub fn list(&self, domain: Domain) -> Listing {
        let version = self.registry.current();
        Listing {
            version_id: version.version_id,
            domain,
            items: version.domain(domain).values().map(|d| d.summary()).collect(),
            quarantined: version
                .quarantined
                .iter()
                .filter(|((d, _), _)| *d == domain)
                .map(|((_, name), q)| QuarantineEntry {
                    name: name.clone(),
                    code: q.code.clone(),
                    reason: q.reason.clone(),
                    file: q.file.clone(),
                })
                .collect(),
        }
    }

    pub fn diagnostics(&self, limit: usize, offset: usize, include_resolved: bool) -> DiagnosticPage {
        self.store.list(!include_resolved, limit, offset)
    }

    /// Explicitly resolve diagnostics by code and/or file; returns how many changed
    pub fn resolve_diagnostics(&self, code: Option<&str>, file: Option<&str>) -> usize {
        self.store.mark_resolved(|d| {
            code.map_or(true, |c| d.code == c) && file.map_or(true, |f| d.location.path == Path::new(f))
        })
    }

    pub fn status(&self) -> RuntimeStatus {
        let version = self.registry.current();
        RuntimeStatus {
            root: self.root().to_path_buf(),
            version_id: version.version_id,
            counts: version.counts(),
            quarantined: version.quarantined.len(),
            unresolved_diagnostics: self.store.unresolved_count(),
            dispatcher: self.dispatcher.stats(),
            started_at: self.started_at,
            last_reload: self.last_reload.lock().clone(),
        }
    }

    /// Close the dispatcher and drain in-flight calls
    pub async fn shutdown(&self) -> bool {
        self.dispatcher.shutdown().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::OverflowPolicy;
    use crate::runner::testing::EchoRunner;
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;

    fn runtime(dir: &TempDir) -> Runtime {
        let options = RuntimeOptions {
            root: dir.path().to_path_buf(),
            dispatcher: DispatcherConfig {
                workers: 2,
                queue_capacity: 2,
                overflow: OverflowPolicy::Reject,
                timeout: Duration::from_secs(2),
                drain: Duration::from_millis(100),
            },
            ..Default::default()
        };
        Runtime::new(options, RunnerSet::new().with(Arc::new(EchoRunner::new())), None)
    }

    #[tokio::test]
    async fn test_boot_refuses_errors() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("bad.lua"), "--- @function\nfunction bad(\n").unwrap();
        let rt = runtime(&dir);
        let err = rt.boot().await.unwrap_err();
        assert!(matches!(err, RuntimeError::StartupBlocked { ref diagnostics } if diagnostics.len() == 1));
        assert_eq!(rt.current().version_id, 0);
        assert_eq!(rt.diagnostics(10, 0, false).total, 1);
    }

    #[tokio::test]
    async fn test_invoke_resolves_arguments() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("greet.lua"),
            "--- @function\n-- @param name string\n-- @param times int?\nfunction greet(name, times) end\n",
        )
        .unwrap();
        let rt = runtime(&dir);
        rt.boot().await.unwrap();

        let mut input = Map::new();
        input.insert("name".into(), "Ada".into());
        input.insert("times".into(), "3".into());
        let value = rt.invoke("greet", input).await.unwrap();
        assert_eq!(value["arguments"]["times"], 3);

        let err = rt.invoke("greet", Map::new()).await.unwrap_err();
        assert!(matches!(err, InvocationError::InvalidArguments { .. }));
        let err = rt.invoke("nope", Map::new()).await.unwrap_err();
        assert!(matches!(err, InvocationError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_concurrent_reloads_serialize() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.lua"), "--- @function\nfunction a() end\n").unwrap();
        let rt = Arc::new(runtime(&dir));
        rt.boot().await.unwrap();
        fs::write(dir.path().join("b.lua"), "--- @function\nfunction b() end\n").unwrap();

        let (first, second) = tokio::join!(rt.reload(), rt.reload());
        let ids = [first.unwrap().version_id, second.unwrap().version_id];
        // exactly one of the two cycles saw the change
        assert_eq!(ids, [2, 2]);
        assert_eq!(rt.current().version_id, 2);
        assert_eq!(rt.list(Domain::Functions).items.len(), 2);
    }

    #[tokio::test]
    async fn test_resolve_by_code() {
        let dir = TempDir::new().unwrap();
        let rt = runtime(&dir);
        rt.diagnostics_store().record(Diagnostic::warning(
            SourceLocation::file("<transport>"),
            codes::CLIENT_ACTION_REQUIRED,
            "reinit",
        ));
        assert_eq!(rt.resolve_diagnostics(Some(codes::SYNTAX), None), 0);
        assert_eq!(rt.resolve_diagnostics(Some(codes::CLIENT_ACTION_REQUIRED), None), 1);
        assert_eq!(rt.status().unresolved_diagnostics, 0);
    }
}
