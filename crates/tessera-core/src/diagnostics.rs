//! Structured findings and the store that tracks their resolution
//!
//! A [`Diagnostic`] never changes after construction. The [`DiagnosticStore`]
//! keeps its own bookkeeping next to each one (when it was first recorded, when
//! a scan last reproduced it, when it stopped being reproduced).

use crate::descriptor::SourceLocation;
use crate::registry::Domain;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Stable diagnostic codes
pub mod codes {
    pub const PARSE_FAILURE: &str = "ERR_PARSE_FAILURE";
    pub const SYNTAX: &str = "ERR_SYNTAX";
    pub const INVALID_NAME: &str = "ERR_INVALID_NAME";
    pub const RESERVED_NAME: &str = "ERR_RESERVED_NAME";
    pub const DUPLICATE_NAME: &str = "ERR_DUPLICATE_NAME";
    pub const IDENTITY_COLLISION: &str = "ERR_IDENTITY_COLLISION";
    pub const NAME_PROXIMITY: &str = "ERR_NAME_PROXIMITY";
    pub const INVALID_TYPE: &str = "ERR_INVALID_TYPE";
    pub const SIGNATURE_MISMATCH: &str = "ERR_SIGNATURE_MISMATCH";
    pub const MISSING_DECLARATION: &str = "ERR_MISSING_DECLARATION";
    pub const RELOAD_HAZARD: &str = "ERR_RELOAD_HAZARD";
    pub const UNKNOWN_ENTITY: &str = "ERR_UNKNOWN_ENTITY";
    pub const HANDLER_UNRESOLVED: &str = "ERR_HANDLER_UNRESOLVED";
    pub const DOMAIN_BLOCKED: &str = "ERR_RELOAD_DOMAIN_BLOCKED";
    pub const CLIENT_ACTION_REQUIRED: &str = "ERR_CLIENT_ACTION_REQUIRED";
    pub const IO: &str = "ERR_IO";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Warning => f.write_str("warning"),
            Severity::Error => f.write_str("error"),
        }
    }
}

/// One finding from scanning, reloading or refreshing the transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub location: SourceLocation,
    pub code: String,
    pub severity: Severity,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<Domain>,
    /// Declared unit this finding is scoped to; `None` means the whole file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

impl Diagnostic {
    pub fn error(
        location: SourceLocation,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            location,
            code: code.into(),
            severity: Severity::Error,
            message: message.into(),
            suggestion: None,
            domain: None,
            unit: None,
        }
    }

    pub fn warning(
        location: SourceLocation,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::error(location, code, message)
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn in_domain(mut self, domain: Domain) -> Self {
        self.domain = Some(domain);
        self
    }

    pub fn for_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }

    pub fn file(&self) -> &PathBuf {
        &self.location.path
    }

    /// Two diagnostics with equal identity describe the same finding
    fn identity(&self) -> (&PathBuf, &str, Option<&str>, &str) {
        (
            &self.location.path,
            self.code.as_str(),
            self.unit.as_deref(),
            self.message.as_str(),
        )
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {} (at {})", self.code, self.message, self.location)
    }
}

/// A diagnostic plus the store's bookkeeping
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticEntry {
    pub id: u64,
    #[serde(flatten)]
    pub diagnostic: Diagnostic,
    pub first_recorded: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    update_seq: u64,
}

impl DiagnosticEntry {
    pub fn is_resolved(&self) -> bool {
        self.resolved_at.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticPage {
    pub items: Vec<DiagnosticEntry>,
    pub total: usize,
    pub offset: usize,
    pub limit: usize,
}

/// Outcome of reconciling one cycle's findings against the store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileStats {
    pub recorded: usize,
    pub reproduced: usize,
    pub resolved: usize,
}

#[derive(Default)]
struct StoreInner {
    entries: Vec<DiagnosticEntry>,
    next_id: u64,
    next_seq: u64,
}

impl StoreInner {
    fn bump(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    fn find_unresolved(&self, diagnostic: &Diagnostic) -> Option<usize> {
        let identity = diagnostic.identity();
        self.entries
            .iter()
            .position(|e| !e.is_resolved() && e.diagnostic.identity() == identity)
    }

    fn insert(&mut self, diagnostic: Diagnostic) -> u64 {
        self.next_id += 1;
        let id = self.next_id;
        let update_seq = self.bump();
        let now = Utc::now();
        self.entries.push(DiagnosticEntry {
            id,
            diagnostic,
            first_recorded: now,
            updated_at: now,
            resolved_at: None,
            update_seq,
        });
        id
    }

    fn touch(&mut self, index: usize) {
        let seq = self.bump();
        let entry = &mut self.entries[index];
        entry.update_seq = seq;
        entry.updated_at = Utc::now();
    }

    fn resolve(&mut self, index: usize) {
        let seq = self.bump();
        let now = Utc::now();
        let entry = &mut self.entries[index];
        entry.resolved_at = Some(now);
        entry.updated_at = now;
        entry.update_seq = seq;
    }
}

/// Append/update log of diagnostics, split into unresolved and resolved
#[derive(Default)]
pub struct DiagnosticStore {
    inner: Mutex<StoreInner>,
}

impl DiagnosticStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a finding; an identical unresolved finding is refreshed instead of duplicated
    pub fn record(&self, diagnostic: Diagnostic) -> u64 {
        let mut inner = self.inner.lock();
        match inner.find_unresolved(&diagnostic) {
            Some(index) => {
                inner.touch(index);
                inner.entries[index].id
            }
            None => inner.insert(diagnostic),
        }
    }

    /// Page through entries: severity descending, then most recently updated first
    pub fn list(&self, unresolved_only: bool, limit: usize, offset: usize) -> DiagnosticPage {
        let inner = self.inner.lock();
        let mut matching: Vec<&DiagnosticEntry> = inner
            .entries
            .iter()
            .filter(|e| !unresolved_only || !e.is_resolved())
            .collect();

        matching.sort_by(|a, b| {
            b.diagnostic
                .severity
                .cmp(&a.diagnostic.severity)
                .then(b.update_seq.cmp(&a.update_seq))
                .then(b.id.cmp(&a.id))
        });

        let total = matching.len();
        let items = matching
            .into_iter()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect();

        DiagnosticPage {
            items,
            total,
            offset,
            limit,
        }
    }

    /// Resolve every unresolved entry matching `predicate`; returns how many changed
    pub fn mark_resolved<F>(&self, predicate: F) -> usize
    where
        F: Fn(&Diagnostic) -> bool,
    {
        let mut inner = self.inner.lock();
        let targets: Vec<usize> = inner
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| !e.is_resolved() && predicate(&e.diagnostic))
            .map(|(i, _)| i)
            .collect();
        for index in &targets {
            inner.resolve(*index);
        }
        targets.len()
    }

    /// Fold one cycle's findings into the store
    ///
    /// Unseen findings are recorded, reproduced ones refreshed, and unresolved
    /// findings the cycle no longer produces are resolved. Client-action findings
    /// only resolve through [`mark_resolved`](Self::mark_resolved).
    pub fn reconcile(&self, cycle: &[Diagnostic]) -> ReconcileStats {
        let mut stats = ReconcileStats::default();
        let mut inner = self.inner.lock();
        let mut seen: Vec<usize> = Vec::with_capacity(cycle.len());

        for diagnostic in cycle {
            match inner.find_unresolved(diagnostic) {
                Some(index) => {
                    if !seen.contains(&index) {
                        inner.touch(index);
                        stats.reproduced += 1;
                        seen.push(index);
                    }
                }
                None => {
                    inner.insert(diagnostic.clone());
                    seen.push(inner.entries.len() - 1);
                    stats.recorded += 1;
                }
            }
        }

        let stale: Vec<usize> = inner
            .entries
            .iter()
            .enumerate()
            .filter(|(i, e)| {
                !e.is_resolved()
                    && !seen.contains(i)
                    && e.diagnostic.code != codes::CLIENT_ACTION_REQUIRED
            })
            .map(|(i, _)| i)
            .collect();
        for index in &stale {
            inner.resolve(*index);
        }
        stats.resolved = stale.len();
        stats
    }

    pub fn unresolved_count(&self) -> usize {
        self.inner
            .lock()
            .entries
            .iter()
            .filter(|e| !e.is_resolved())
            .count()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn err(file: &str, code: &str, msg: &str) -> Diagnostic {
        Diagnostic::error(SourceLocation::file(file), code, msg)
    }

    fn warn(file: &str, code: &str, msg: &str) -> Diagnostic {
        Diagnostic::warning(SourceLocation::file(file), code, msg)
    }

    #[test]
    fn test_errors_sort_before_warnings_then_most_recent() {
        let store = DiagnosticStore::new();
        store.record(warn("a.lua", codes::NAME_PROXIMITY, "close"));
        store.record(err("b.lua", codes::SYNTAX, "first"));
        store.record(err("c.lua", codes::SYNTAX, "second"));

        let page = store.list(true, 10, 0);
        let messages: Vec<&str> = page
            .items
            .iter()
            .map(|e| e.diagnostic.message.as_str())
            .collect();
        assert_eq!(messages, vec!["second", "first", "close"]);
        assert_eq!(page.total, 3);
    }

    #[test]
    fn test_pagination_is_stable_without_mutation() {
        let store = DiagnosticStore::new();
        for i in 0..7 {
            store.record(err("x.lua", codes::SYNTAX, &format!("m{}", i)));
        }
        let first: Vec<u64> = store.list(false, 3, 0).items.iter().map(|e| e.id).collect();
        let again: Vec<u64> = store.list(false, 3, 0).items.iter().map(|e| e.id).collect();
        let second: Vec<u64> = store.list(false, 3, 3).items.iter().map(|e| e.id).collect();
        assert_eq!(first, again);
        assert!(first.iter().all(|id| !second.contains(id)));
        assert_eq!(store.list(false, 3, 6).items.len(), 1);
    }

    #[test]
    fn test_recording_same_finding_refreshes_instead_of_duplicating() {
        let store = DiagnosticStore::new();
        let a = store.record(err("a.lua", codes::SYNTAX, "boom"));
        store.record(err("b.lua", codes::SYNTAX, "other"));
        let b = store.record(err("a.lua", codes::SYNTAX, "boom"));
        assert_eq!(a, b);
        assert_eq!(store.len(), 2);
        // refreshed entry is now the most recently updated
        assert_eq!(store.list(true, 1, 0).items[0].id, a);
    }

    #[test]
    fn test_reconcile_resolves_findings_that_disappear() {
        let store = DiagnosticStore::new();
        let stats = store.reconcile(&[err("ping.lua", codes::SYNTAX, "bad")]);
        assert_eq!(stats.recorded, 1);
        assert_eq!(store.unresolved_count(), 1);

        let stats = store.reconcile(&[err("ping.lua", codes::SYNTAX, "bad")]);
        assert_eq!(stats.reproduced, 1);
        assert_eq!(stats.recorded, 0);

        let stats = store.reconcile(&[]);
        assert_eq!(stats.resolved, 1);
        assert_eq!(store.unresolved_count(), 0);

        let all = store.list(false, 10, 0);
        assert_eq!(all.total, 1);
        assert!(all.items[0].is_resolved());
        assert_eq!(all.items[0].diagnostic.message, "bad");
    }

    #[test]
    fn test_client_action_findings_need_explicit_resolution() {
        let store = DiagnosticStore::new();
        store.reconcile(&[warn("<transport>", codes::CLIENT_ACTION_REQUIRED, "search")]);
        store.reconcile(&[]);
        assert_eq!(store.unresolved_count(), 1);

        let n = store.mark_resolved(|d| d.code == codes::CLIENT_ACTION_REQUIRED);
        assert_eq!(n, 1);
        assert_eq!(store.unresolved_count(), 0);
        assert_eq!(store.mark_resolved(|_| true), 0);
    }
}
