//! Runner seam: one executor per source kind
//!
//! The runtime never executes unit source itself. It resolves arguments,
//! picks the [`Runner`] registered for the descriptor's [`SourceKind`] and
//! hands over a [`RunRequest`]. The same set doubles as the
//! [`HandlerResolver`] the reload engine consults at promotion time.

use crate::descriptor::{Descriptor, SourceKind};
use crate::nested::NestedCalls;
use async_trait::async_trait;
use serde_json::{Map, Value as JsonValue};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RunnerFailure {
    #[error("no runner registered for {0} units")]
    NoRunner(SourceKind),

    #[error("handler '{0}' is not defined")]
    MissingHandler(String),

    #[error("unknown connection '{0}'")]
    UnknownConnection(String),

    #[error("execution error: {0}")]
    Execution(String),

    #[error("result cannot be represented as JSON: {0}")]
    InvalidReturn(String),

    #[error("aborted after exceeding its time budget")]
    Interrupted,
}

/// Everything a runner needs for one call
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub descriptor: Arc<Descriptor>,
    /// Fully resolved and cast arguments, keyed by name
    pub arguments: Map<String, JsonValue>,
    /// Remaining time budget, for runners that can interrupt themselves
    pub budget: Option<Duration>,
    /// Calls back into other units, pinned to the caller's registry version
    pub nested: Option<NestedCalls>,
}

#[async_trait]
pub trait Runner: Send + Sync {
    fn source_kind(&self) -> SourceKind;

    /// Execute one unit
    async fn run(&self, request: RunRequest) -> Result<JsonValue, RunnerFailure>;

    /// Confirm the descriptor's handler can be located; may load but not call it
    fn check(&self, _descriptor: &Descriptor) -> Result<(), String> {
        Ok(())
    }
}

/// Promotion-time check that a unit's handler resolves
pub trait HandlerResolver: Send + Sync {
    fn check(&self, descriptor: &Descriptor) -> Result<(), String>;
}

/// Accepts every handler
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAll;

impl HandlerResolver for AcceptAll {
    fn check(&self, _descriptor: &Descriptor) -> Result<(), String> {
        Ok(())
    }
}

/// Runners keyed by the source kind they execute
#[derive(Clone, Default)]
pub struct RunnerSet {
    runners: HashMap<SourceKind, Arc<dyn Runner>>,
}

impl RunnerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, runner: Arc<dyn Runner>) -> Self {
        self.register(runner);
        self
    }

    pub fn register(&mut self, runner: Arc<dyn Runner>) {
        self.runners.insert(runner.source_kind(), runner);
    }

    pub fn get(&self, kind: SourceKind) -> Option<Arc<dyn Runner>> {
        self.runners.get(&kind).cloned()
    }

    pub async fn run(&self, request: RunRequest) -> Result<JsonValue, RunnerFailure> {
        let kind = request.descriptor.source_kind;
        let runner = self.get(kind).ok_or(RunnerFailure::NoRunner(kind))?;
        runner.run(request).await
    }
}

impl HandlerResolver for RunnerSet {
    fn check(&self, descriptor: &Descriptor) -> Result<(), String> {
        match self.runners.get(&descriptor.source_kind) {
            Some(runner) => runner.check(descriptor),
            None => Err(RunnerFailure::NoRunner(descriptor.source_kind).to_string()),
        }
    }
}

impl std::fmt::Debug for RunnerSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<&SourceKind> = self.runners.keys().collect();
        kinds.sort();
        f.debug_struct("RunnerSet").field("kinds", &kinds).finish()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use parking_lot::Mutex;

    /// Scripted runner for runtime tests: returns the body, or sleeps first
    pub struct EchoRunner {
        pub delay: Option<Duration>,
        pub rejected: Mutex<Vec<String>>,
        pub calls: Mutex<Vec<String>>,
    }

    impl EchoRunner {
        pub fn new() -> Self {
            Self {
                delay: None,
                rejected: Mutex::new(Vec::new()),
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn slow(delay: Duration) -> Self {
            Self {
                delay: Some(delay),
                ..Self::new()
            }
        }
    }

    #[async_trait]
    impl Runner for EchoRunner {
        fn source_kind(&self) -> SourceKind {
            SourceKind::NativeCode
        }

        async fn run(&self, request: RunRequest) -> Result<JsonValue, RunnerFailure> {
            self.calls.lock().push(request.descriptor.name.clone());
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            Ok(serde_json::json!({
                "name": request.descriptor.name,
                "arguments": request.arguments,
            }))
        }

        fn check(&self, descriptor: &Descriptor) -> Result<(), String> {
            if self.rejected.lock().contains(&descriptor.handler.symbol) {
                return Err(format!("global '{}' is not a function", descriptor.handler.symbol));
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::EchoRunner;
    use super::*;
    use crate::descriptor::fixtures;

    #[tokio::test]
    async fn test_dispatches_by_source_kind() {
        let set = RunnerSet::new().with(Arc::new(EchoRunner::new()));
        let request = RunRequest {
            descriptor: Arc::new(fixtures::function("ping", "ping.lua")),
            arguments: Map::new(),
            budget: None,
            nested: None,
        };
        let value = set.run(request).await.unwrap();
        assert_eq!(value["name"], "ping");
    }

    #[tokio::test]
    async fn test_missing_runner_is_reported() {
        let set = RunnerSet::new();
        let mut desc = fixtures::function("q", "q.sql");
        desc.source_kind = SourceKind::Query;
        let request = RunRequest {
            descriptor: Arc::new(desc.clone()),
            arguments: Map::new(),
            budget: None,
            nested: None,
        };
        assert!(matches!(set.run(request).await, Err(RunnerFailure::NoRunner(SourceKind::Query))));
        assert!(HandlerResolver::check(&set, &desc).is_err());
    }
}
