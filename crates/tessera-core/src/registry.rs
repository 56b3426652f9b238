//! Versioned, immutable registry snapshots behind an atomic pointer
//!
//! Readers call [`Registry::current`] once and keep the returned `Arc` for the
//! whole operation. The reload path builds a complete [`RegistryVersion`] off to
//! the side and [`Registry::publish`]es it with a single pointer swap.

use crate::descriptor::Descriptor;
use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

/// Registry partitions, listed in reload dependency order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Entities,
    Functions,
    ExposedTools,
}

impl Domain {
    /// Fixed processing order; later domains derive from earlier ones
    pub const ORDER: [Domain; 3] = [Domain::Entities, Domain::Functions, Domain::ExposedTools];

    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Entities => "entities",
            Domain::Functions => "functions",
            Domain::ExposedTools => "exposed_tools",
        }
    }

    /// Domains that must be blocked when this one quarantines anything
    pub fn downstream(&self) -> &'static [Domain] {
        match self {
            Domain::Entities => &[Domain::Functions, Domain::ExposedTools],
            Domain::Functions => &[Domain::ExposedTools],
            Domain::ExposedTools => &[],
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Domain {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "entities" => Ok(Domain::Entities),
            "functions" => Ok(Domain::Functions),
            "exposed_tools" | "tools" => Ok(Domain::ExposedTools),
            other => Err(RegistryError::UnknownDomain(other.to_string())),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("unknown domain: {0}")]
    UnknownDomain(String),

    #[error("version {candidate} is not newer than current version {current}")]
    StaleVersion { current: u64, candidate: u64 },
}

pub type DomainMap = BTreeMap<String, Arc<Descriptor>>;

/// Why a unit was held out of a version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quarantine {
    pub code: String,
    pub reason: String,
    /// Source file the unit was last seen in
    pub file: PathBuf,
}

pub type QuarantineSet = BTreeMap<(Domain, String), Quarantine>;

/// Immutable snapshot of all three domains
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegistryVersion {
    pub version_id: u64,
    pub entities: DomainMap,
    pub functions: DomainMap,
    pub exposed_tools: DomainMap,
    /// Units held out of this version, keyed by domain and name
    pub quarantined: QuarantineSet,
}

impl RegistryVersion {
    /// Version zero: nothing registered yet
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn domain(&self, domain: Domain) -> &DomainMap {
        match domain {
            Domain::Entities => &self.entities,
            Domain::Functions => &self.functions,
            Domain::ExposedTools => &self.exposed_tools,
        }
    }

    pub fn domain_mut(&mut self, domain: Domain) -> &mut DomainMap {
        match domain {
            Domain::Entities => &mut self.entities,
            Domain::Functions => &mut self.functions,
            Domain::ExposedTools => &mut self.exposed_tools,
        }
    }

    pub fn function(&self, name: &str) -> Option<&Arc<Descriptor>> {
        self.functions.get(name)
    }

    pub fn quarantine(&self, domain: Domain, name: &str) -> Option<&Quarantine> {
        self.quarantined.get(&(domain, name.to_string()))
    }

    /// Same registered descriptors and quarantine set, ignoring the version id
    pub fn same_contents(&self, other: &RegistryVersion) -> bool {
        self.entities == other.entities
            && self.functions == other.functions
            && self.exposed_tools == other.exposed_tools
            && self.quarantined == other.quarantined
    }

    pub fn counts(&self) -> BTreeMap<Domain, usize> {
        Domain::ORDER
            .iter()
            .map(|d| (*d, self.domain(*d).len()))
            .collect()
    }
}

/// Holder of the current version pointer
pub struct Registry {
    current: ArcSwap<RegistryVersion>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(RegistryVersion::empty()),
        }
    }

    /// Snapshot of the current version; never blocks
    pub fn current(&self) -> Arc<RegistryVersion> {
        self.current.load_full()
    }

    /// Swap in a complete candidate version
    ///
    /// Callers must serialize publication (the runtime holds its reload lock);
    /// the id check keeps observed versions monotonic regardless.
    pub fn publish(&self, candidate: RegistryVersion) -> Result<Arc<RegistryVersion>, RegistryError> {
        let current = self.current.load();
        if candidate.version_id <= current.version_id {
            return Err(RegistryError::StaleVersion {
                current: current.version_id,
                candidate: candidate.version_id,
            });
        }
        let next = Arc::new(candidate);
        self.current.store(next.clone());
        tracing::debug!(version = next.version_id, "Published registry version");
        Ok(next)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::fixtures;

    fn version_with(id: u64, names: &[&str]) -> RegistryVersion {
        let mut version = RegistryVersion {
            version_id: id,
            ..Default::default()
        };
        for name in names {
            version.functions.insert(
                name.to_string(),
                Arc::new(fixtures::function(name, "f.lua")),
            );
        }
        version
    }

    #[test]
    fn test_publish_swaps_whole_version() {
        let registry = Registry::new();
        let before = registry.current();
        assert_eq!(before.version_id, 0);

        registry.publish(version_with(1, &["ping", "pong"])).unwrap();

        // A reader holding the old snapshot still sees the old contents
        assert!(before.functions.is_empty());
        let now = registry.current();
        assert_eq!(now.version_id, 1);
        assert_eq!(now.functions.len(), 2);
    }

    #[test]
    fn test_publish_rejects_non_monotonic_versions() {
        let registry = Registry::new();
        registry.publish(version_with(2, &["ping"])).unwrap();
        let err = registry.publish(version_with(2, &["pong"])).unwrap_err();
        assert_eq!(
            err,
            RegistryError::StaleVersion {
                current: 2,
                candidate: 2
            }
        );
        assert!(registry.current().function("ping").is_some());
    }

    #[test]
    fn test_same_contents_ignores_version_id() {
        assert!(version_with(1, &["a"]).same_contents(&version_with(5, &["a"])));
        assert!(!version_with(1, &["a"]).same_contents(&version_with(1, &["b"])));
    }

    #[test]
    fn test_quarantine_changes_contents() {
        let mut a = version_with(1, &["ping"]);
        let b = a.clone();
        a.quarantined.insert(
            (Domain::Functions, "pong".into()),
            Quarantine {
                code: "ERR_SYNTAX".into(),
                reason: "bad".into(),
                file: PathBuf::from("pong.lua"),
            },
        );
        assert!(!a.same_contents(&b));
        assert!(a.quarantine(Domain::Functions, "pong").is_some());
        assert!(a.quarantine(Domain::Entities, "pong").is_none());
    }

    #[test]
    fn test_domain_parsing_and_order() {
        assert_eq!("tools".parse::<Domain>().unwrap(), Domain::ExposedTools);
        assert!("widgets".parse::<Domain>().is_err());
        assert_eq!(Domain::ORDER[0], Domain::Entities);
        assert_eq!(Domain::Entities.downstream().len(), 2);
    }
}
