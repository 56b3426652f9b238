//! Tessera core
//!
//! Discovery, versioned registry and reload engine for a hot-reloadable
//! function runtime:
//!
//! ```text
//! project tree ──scan──▶ ScanResult ──ReloadEngine──▶ RegistryVersion ──publish──▶ Registry
//!       ▲                    │                              │
//!       │                    ▼                              ▼
//!    watcher          DiagnosticStore               Dispatcher ──▶ Runner
//! ```
//!
//! Runners, configuration, the watcher and the daemon live in sibling crates
//! and plug in through [`runner::Runner`] and [`transport::OutboundTransport`].

pub mod arguments;
pub mod descriptor;
pub mod diagnostics;
pub mod error;
pub mod execution;
pub mod naming;
pub mod nested;
pub mod registry;
pub mod reload;
pub mod runner;
pub mod runtime;
pub mod scanner;
pub mod transport;
pub mod types;

pub use arguments::{ArgumentError, ArgumentResolver};
pub use descriptor::{
    ArgumentSpec, Descriptor, Exposure, HandlerRef, MessageRole, ReloadPolicy, Signature,
    SourceKind, SourceLocation, TemplateMessage, UnitKind,
};
pub use diagnostics::{codes, Diagnostic, DiagnosticEntry, DiagnosticPage, DiagnosticStore, Severity};
pub use error::{ErrorKind, InvocationError, Result, RuntimeError, TopologyError};
pub use execution::{Dispatcher, DispatcherConfig, DispatcherStats, OverflowPolicy};
pub use nested::NestedCalls;
pub use registry::{Domain, Quarantine, Registry, RegistryError, RegistryVersion};
pub use reload::{ChangeClass, ReloadEngine, ReloadSummary, ToolChange};
pub use runner::{AcceptAll, HandlerResolver, RunRequest, Runner, RunnerFailure, RunnerSet};
pub use runtime::{Listing, Runtime, RuntimeOptions, RuntimeStatus};
pub use scanner::{ScanError, ScanResult, Scanner};
pub use transport::{ManifestTransport, OutboundTransport, RefreshOutcome, TransportError};
pub use types::{TypeError, TypeExpr};
