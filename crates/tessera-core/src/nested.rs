//! Unit-to-unit calls made from inside a running unit
//!
//! A [`NestedCalls`] handle travels with each [`RunRequest`]. It pins the
//! registry version the outer call started against, so a reload that lands
//! mid-call never changes what a nested lookup sees. Nested calls resolve
//! arguments like top-level ones and run inside the caller's dispatcher slot
//! under whatever remains of its time budget.

use crate::arguments::ArgumentResolver;
use crate::descriptor::Descriptor;
use crate::error::InvocationError;
use crate::registry::{Domain, RegistryVersion};
use crate::runner::{RunRequest, RunnerFailure, RunnerSet};
use serde_json::{Map, Value as JsonValue};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tracing::debug;

/// Deepest chain of unit-to-unit calls before the innermost one fails
pub const MAX_NESTING: usize = 8;

/// Find a callable function, reporting quarantined units as such
pub fn lookup(version: &RegistryVersion, name: &str) -> Result<Arc<Descriptor>, InvocationError> {
    match version.function(name) {
        Some(descriptor) => Ok(descriptor.clone()),
        None => Err(match version.quarantine(Domain::Functions, name) {
            Some(q) => InvocationError::Quarantined {
                name: name.to_string(),
                reason: q.reason.clone(),
            },
            None => InvocationError::NotFound(name.to_string()),
        }),
    }
}

#[derive(Clone)]
pub struct NestedCalls {
    version: Arc<RegistryVersion>,
    arguments: Arc<ArgumentResolver>,
    runners: Arc<RunnerSet>,
    deadline: Instant,
    depth: usize,
    handle: Handle,
}

impl NestedCalls {
    /// Handle for calls made by a unit that started with `budget` left
    ///
    /// Must be created inside a tokio runtime.
    pub fn new(
        version: Arc<RegistryVersion>,
        arguments: Arc<ArgumentResolver>,
        runners: Arc<RunnerSet>,
        budget: Duration,
    ) -> Self {
        Self {
            version,
            arguments,
            runners,
            deadline: Instant::now() + budget,
            depth: 0,
            handle: Handle::current(),
        }
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn version_id(&self) -> u64 {
        self.version.version_id
    }

    pub async fn invoke(
        &self,
        name: &str,
        input: Map<String, JsonValue>,
    ) -> Result<JsonValue, InvocationError> {
        if self.depth >= MAX_NESTING {
            return Err(InvocationError::Runner {
                name: name.to_string(),
                source: RunnerFailure::Execution(format!(
                    "call depth exceeds {} nested invocations",
                    MAX_NESTING
                )),
            });
        }

        let descriptor = lookup(&self.version, name)?;
        let arguments = self
            .arguments
            .resolve(&descriptor.signature, &input)
            .map_err(|e| InvocationError::InvalidArguments {
                name: name.to_string(),
                reason: e.to_string(),
            })?;

        let budget = self.deadline.saturating_duration_since(Instant::now());
        let timed_out = || InvocationError::Timeout {
            name: name.to_string(),
            timeout_ms: budget.as_millis() as u64,
        };
        if budget.is_zero() {
            return Err(timed_out());
        }

        debug!(name, depth = self.depth + 1, "Nested invocation");
        let request = RunRequest {
            descriptor,
            arguments,
            budget: Some(budget),
            nested: Some(Self {
                depth: self.depth + 1,
                ..self.clone()
            }),
        };
        match tokio::time::timeout(budget, self.runners.run(request)).await {
            Ok(result) => result.map_err(|source| InvocationError::Runner {
                name: name.to_string(),
                source,
            }),
            Err(_) => Err(timed_out()),
        }
    }

    /// [`NestedCalls::invoke`] for runners executing on a blocking thread
    ///
    /// Panics when called from an async task; runners reach this from
    /// `spawn_blocking`.
    pub fn invoke_blocking(
        &self,
        name: &str,
        input: Map<String, JsonValue>,
    ) -> Result<JsonValue, InvocationError> {
        self.handle.block_on(self.invoke(name, input))
    }
}

impl fmt::Debug for NestedCalls {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NestedCalls")
            .field("version_id", &self.version.version_id)
            .field("depth", &self.depth)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{fixtures, SourceKind};
    use crate::runner::Runner;
    use async_trait::async_trait;
    use serde_json::json;

    /// `outer` calls the unit named in its body; every other unit echoes its depth
    struct Relay;

    #[async_trait]
    impl Runner for Relay {
        fn source_kind(&self) -> SourceKind {
            SourceKind::NativeCode
        }

        async fn run(&self, request: RunRequest) -> Result<JsonValue, RunnerFailure> {
            let nested = request.nested.expect("nested handle");
            if request.descriptor.body.is_empty() {
                return Ok(json!({ "depth": nested.depth() }));
            }
            nested
                .invoke(&request.descriptor.body, Map::new())
                .await
                .map_err(|e| RunnerFailure::Execution(e.to_string()))
        }
    }

    fn function(name: &str, body: &str) -> Arc<Descriptor> {
        let mut desc = fixtures::function(name, &format!("{}.lua", name));
        desc.body = body.to_string();
        Arc::new(desc)
    }

    fn calls(units: &[(&str, &str)]) -> NestedCalls {
        let mut version = RegistryVersion::empty();
        version.version_id = 3;
        for (name, body) in units {
            version.functions.insert(name.to_string(), function(name, body));
        }
        NestedCalls::new(
            Arc::new(version),
            Arc::new(ArgumentResolver::default()),
            Arc::new(RunnerSet::new().with(Arc::new(Relay))),
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn test_nested_call_runs_one_level_deeper() {
        let nested = calls(&[("outer", "inner"), ("inner", "")]);
        let out = nested.invoke("outer", Map::new()).await.unwrap();
        assert_eq!(out, json!({ "depth": 2 }));
    }

    #[tokio::test]
    async fn test_missing_and_bad_arguments() {
        let nested = calls(&[("inner", "")]);
        assert!(matches!(
            nested.invoke("ghost", Map::new()).await,
            Err(InvocationError::NotFound(_))
        ));
        let mut input = Map::new();
        input.insert("who".into(), json!("ada"));
        assert!(matches!(
            nested.invoke("inner", input).await,
            Err(InvocationError::InvalidArguments { .. })
        ));
    }

    #[tokio::test]
    async fn test_runaway_recursion_is_cut_off() {
        let nested = calls(&[("loop", "loop")]);
        let err = nested.invoke("loop", Map::new()).await.unwrap_err();
        assert!(err.to_string().contains("call depth"), "{}", err);
    }

    #[tokio::test]
    async fn test_spent_budget_times_out() {
        let mut nested = calls(&[("inner", "")]);
        nested.deadline = Instant::now();
        assert!(matches!(
            nested.invoke("inner", Map::new()).await,
            Err(InvocationError::Timeout { .. })
        ));
    }
}
