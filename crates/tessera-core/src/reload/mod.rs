//! Reload engine: turn a scan into the next registry version
//!
//! Domains are processed in [`Domain::ORDER`]. Inside a domain every item is
//! promoted or quarantined on its own; a quarantine anywhere in a domain
//! blocks every downstream domain for the cycle, and a blocked domain is
//! copied from the previous version untouched.
//!
//! The engine is synchronous and pure apart from the [`HandlerResolver`]
//! callback. Publication is left to the caller.

mod signature;

pub use signature::{classify, ChangeClass, ToolChange};

use crate::descriptor::{Descriptor, SourceLocation};
use crate::diagnostics::{codes, Diagnostic, Severity};
use crate::registry::{Domain, DomainMap, Quarantine, RegistryVersion};
use crate::runner::HandlerResolver;
use crate::scanner::ScanResult;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

/// Per-domain item movement for one cycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainChanges {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub changed: Vec<String>,
    pub unchanged: usize,
}

impl DomainChanges {
    fn between(previous: &DomainMap, next: &DomainMap) -> Self {
        let mut changes = DomainChanges::default();
        for (name, item) in next {
            match previous.get(name) {
                None => changes.added.push(name.clone()),
                Some(before) if Arc::ptr_eq(before, item) || before.same_unit(item) => {
                    changes.unchanged += 1
                }
                Some(_) => changes.changed.push(name.clone()),
            }
        }
        changes.removed = previous
            .keys()
            .filter(|name| !next.contains_key(*name))
            .cloned()
            .collect();
        changes
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuarantinedItem {
    pub domain: Domain,
    pub name: String,
    pub code: String,
    pub reason: String,
    pub file: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockedDomain {
    pub domain: Domain,
    /// Upstream domain whose quarantines caused the block
    pub cause: Domain,
}

/// What one reload cycle did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReloadSummary {
    /// Version current after the cycle
    pub version_id: u64,
    pub published: bool,
    pub changes: BTreeMap<Domain, DomainChanges>,
    /// Quarantines first observed in this cycle
    pub quarantined: Vec<QuarantinedItem>,
    pub blocked_domains: Vec<BlockedDomain>,
    /// Exposed-tool changes other than `unchanged`
    pub tool_changes: Vec<ToolChange>,
    pub client_action_required: Vec<String>,
    pub errors: usize,
    pub warnings: usize,
}

/// Engine output: candidate version (if anything changed) plus the cycle's findings
#[derive(Debug, Clone)]
pub struct ReloadOutcome {
    pub candidate: Option<RegistryVersion>,
    pub summary: ReloadSummary,
    /// Scan diagnostics followed by those the engine raised
    pub diagnostics: Vec<Diagnostic>,
}

pub struct ReloadEngine<'a> {
    resolver: &'a dyn HandlerResolver,
}

/// Mutable state threaded through one cycle
struct Cycle<'p> {
    previous: &'p RegistryVersion,
    next: RegistryVersion,
    summary: ReloadSummary,
    diagnostics: Vec<Diagnostic>,
}

impl Cycle<'_> {
    fn quarantine(&mut self, domain: Domain, name: String, quarantine: Quarantine) {
        let key = (domain, name);
        let already_known = self.previous.quarantined.get(&key) == Some(&quarantine);
        if !already_known {
            debug!(domain = %domain, name = %key.1, code = %quarantine.code, "Quarantined");
            self.summary.quarantined.push(QuarantinedItem {
                domain,
                name: key.1.clone(),
                code: quarantine.code.clone(),
                reason: quarantine.reason.clone(),
                file: quarantine.file.clone(),
            });
        }
        self.next.quarantined.insert(key, quarantine);
    }
}

fn domain_of(diagnostic: &Diagnostic) -> Domain {
    diagnostic.domain.unwrap_or(Domain::Functions)
}

impl<'a> ReloadEngine<'a> {
    pub fn new(resolver: &'a dyn HandlerResolver) -> Self {
        Self { resolver }
    }

    /// Compute the version that follows `previous` for this scan
    pub fn reload(&self, scan: &ScanResult, previous: &RegistryVersion) -> ReloadOutcome {
        let mut cycle = Cycle {
            previous,
            next: RegistryVersion {
                version_id: previous.version_id,
                ..RegistryVersion::empty()
            },
            summary: ReloadSummary::default(),
            diagnostics: scan.diagnostics.clone(),
        };

        let mut blocked_by: Option<Domain> = None;
        for domain in Domain::ORDER {
            if let Some(cause) = blocked_by {
                Self::retain_blocked(&mut cycle, domain, cause);
                continue;
            }

            let quarantines = match domain {
                Domain::Entities => self.promote_scanned(&mut cycle, domain, &scan.entities),
                Domain::Functions => self.promote_scanned(&mut cycle, domain, &scan.functions),
                Domain::ExposedTools => {
                    Self::derive_tools(&mut cycle);
                    0
                }
            };

            let changes = DomainChanges::between(previous.domain(domain), cycle.next.domain(domain));
            cycle.summary.changes.insert(domain, changes);
            if quarantines > 0 {
                blocked_by = Some(domain);
            }
        }

        let Cycle {
            mut next,
            mut summary,
            diagnostics,
            ..
        } = cycle;

        let candidate = if next.same_contents(previous) {
            summary.version_id = previous.version_id;
            None
        } else {
            next.version_id = previous.version_id + 1;
            summary.version_id = next.version_id;
            summary.published = true;
            Some(next)
        };
        summary.errors = diagnostics.iter().filter(|d| d.is_error()).count();
        summary.warnings = diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Warning)
            .count();

        ReloadOutcome {
            candidate,
            summary,
            diagnostics,
        }
    }

    /// Promote or quarantine each scanned item of one domain; returns the quarantine count
    fn promote_scanned(&self, cycle: &mut Cycle<'_>, domain: Domain, scanned: &[Descriptor]) -> usize {
        let mut held: BTreeMap<String, Quarantine> = BTreeMap::new();
        let scanned_names: BTreeSet<&str> = scanned.iter().map(|d| d.name.as_str()).collect();

        let errors: Vec<&Diagnostic> = cycle
            .diagnostics
            .iter()
            .filter(|d| d.is_error() && domain_of(d) == domain)
            .collect();

        for diagnostic in &errors {
            let quarantine = Quarantine {
                code: diagnostic.code.clone(),
                reason: diagnostic.message.clone(),
                file: diagnostic.location.path.clone(),
            };
            match &diagnostic.unit {
                Some(name) => {
                    held.entry(name.clone()).or_insert(quarantine);
                }
                None => {
                    // a broken file takes down whatever it used to declare
                    let file = &diagnostic.location.path;
                    let from_registry = cycle
                        .previous
                        .domain(domain)
                        .values()
                        .filter(|d| &d.source.path == file)
                        .map(|d| d.name.clone());
                    let from_quarantine = cycle
                        .previous
                        .quarantined
                        .iter()
                        .filter(|((d, _), q)| *d == domain && &q.file == file)
                        .map(|((_, name), _)| name.clone());
                    let names: Vec<String> = from_registry.chain(from_quarantine).collect();
                    for name in names {
                        if !scanned_names.contains(name.as_str()) {
                            held.entry(name).or_insert_with(|| quarantine.clone());
                        }
                    }
                }
            }
        }

        let mut engine_findings = Vec::new();
        for unit in scanned {
            if held.contains_key(&unit.name) {
                continue;
            }

            if domain == Domain::Functions {
                let missing: Vec<&str> = unit
                    .entity_references()
                    .into_iter()
                    .filter(|e| !cycle.next.entities.contains_key(*e))
                    .collect();
                if !missing.is_empty() {
                    let diagnostic = Diagnostic::error(
                        unit.source.clone(),
                        codes::UNKNOWN_ENTITY,
                        format!("'{}' references unknown entity {}", unit.name, missing.join(", ")),
                    )
                    .with_suggestion("Declare the entity or fix the type name.")
                    .in_domain(domain)
                    .for_unit(&unit.name);
                    held.insert(unit.name.clone(), quarantine_for(&diagnostic));
                    engine_findings.push(diagnostic);
                    continue;
                }
            }

            let previous = cycle.previous.domain(domain).get(&unit.name);
            if let Some(previous) = previous {
                if previous.reload_policy == crate::descriptor::ReloadPolicy::Pinned
                    || previous.as_ref() == unit
                {
                    cycle
                        .next
                        .domain_mut(domain)
                        .insert(unit.name.clone(), previous.clone());
                    continue;
                }
            }

            if domain == Domain::Functions {
                if let Err(reason) = self.resolver.check(unit) {
                    let diagnostic = Diagnostic::error(
                        unit.source.clone(),
                        codes::HANDLER_UNRESOLVED,
                        format!("handler for '{}' did not resolve: {}", unit.name, reason),
                    )
                    .in_domain(domain)
                    .for_unit(&unit.name);
                    held.insert(unit.name.clone(), quarantine_for(&diagnostic));
                    engine_findings.push(diagnostic);
                    continue;
                }
            }

            cycle
                .next
                .domain_mut(domain)
                .insert(unit.name.clone(), Arc::new(unit.clone()));
        }
        cycle.diagnostics.extend(engine_findings);

        let count = held.len();
        for (name, quarantine) in held {
            cycle.quarantine(domain, name, quarantine);
        }
        count
    }

    /// Exposed tools are the promoted functions flagged for exposure
    fn derive_tools(cycle: &mut Cycle<'_>) {
        let tools: DomainMap = cycle
            .next
            .functions
            .iter()
            .filter(|(_, d)| d.is_exposed())
            .map(|(name, d)| (name.clone(), d.clone()))
            .collect();

        let names: BTreeSet<&String> = tools.keys().chain(cycle.previous.exposed_tools.keys()).collect();
        for name in names {
            let before = cycle.previous.exposed_tools.get(name).map(|d| d.as_ref());
            let after = tools.get(name).map(|d| d.as_ref());
            let Some(class) = classify(before, after) else {
                continue;
            };
            if class == ChangeClass::Unchanged {
                continue;
            }
            if class == ChangeClass::SchemaShapeChange {
                let location = after
                    .map(|d| d.source.clone())
                    .unwrap_or_else(|| SourceLocation::file("<transport>"));
                cycle.summary.client_action_required.push(name.clone());
                cycle.diagnostics.push(client_action_required(location, name));
            }
            cycle.summary.tool_changes.push(ToolChange {
                name: name.clone(),
                class,
            });
        }

        cycle.next.exposed_tools = tools;
    }

    fn retain_blocked(cycle: &mut Cycle<'_>, domain: Domain, cause: Domain) {
        *cycle.next.domain_mut(domain) = cycle.previous.domain(domain).clone();
        for (key, quarantine) in &cycle.previous.quarantined {
            if key.0 == domain {
                cycle.next.quarantined.insert(key.clone(), quarantine.clone());
            }
        }
        cycle.summary.blocked_domains.push(BlockedDomain { domain, cause });
        cycle.diagnostics.push(
            Diagnostic::warning(
                SourceLocation::file(format!("<{}>", domain)),
                codes::DOMAIN_BLOCKED,
                format!(
                    "{} kept at version {} because {} has quarantined items",
                    domain, cycle.previous.version_id, cause
                ),
            )
            .with_suggestion(format!("Fix the {} diagnostics and reload.", cause))
            .in_domain(domain),
        );
    }
}

fn quarantine_for(diagnostic: &Diagnostic) -> Quarantine {
    Quarantine {
        code: diagnostic.code.clone(),
        reason: diagnostic.message.clone(),
        file: diagnostic.location.path.clone(),
    }
}

/// Warning raised when connected clients must re-read a tool's input schema
pub fn client_action_required(location: SourceLocation, tool: &str) -> Diagnostic {
    Diagnostic::warning(
        location,
        codes::CLIENT_ACTION_REQUIRED,
        format!("input schema of tool '{}' changed; connected clients must re-initialize", tool),
    )
    .with_suggestion("Reconnect clients, then run `tess resolve --code ERR_CLIENT_ACTION_REQUIRED`.")
    .in_domain(Domain::ExposedTools)
    .for_unit(tool)
}
