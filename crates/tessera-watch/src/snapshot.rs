//! Tracked-file snapshots and the include/exclude filter.

use crate::error::{Result, WatchError};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::trace;
use walkdir::{DirEntry, WalkDir};

/// Include/exclude globs. A pattern matches either the path relative to
/// the root or the bare file name, so `*.lua` tracks nested files too.
#[derive(Debug, Clone)]
pub struct WatchFilter {
    include: GlobSet,
    exclude: GlobSet,
}

impl WatchFilter {
    pub fn new<S: AsRef<str>>(include: &[S], exclude: &[S]) -> Result<Self> {
        if include.is_empty() {
            return Err(WatchError::NoIncludes);
        }
        Ok(Self {
            include: build_set(include)?,
            exclude: build_set(exclude)?,
        })
    }

    /// `relative` is the path below the watch root
    pub fn is_tracked(&self, relative: &Path) -> bool {
        let name = relative.file_name().map(Path::new);
        let hit = |set: &GlobSet| set.is_match(relative) || name.is_some_and(|n| set.is_match(n));
        hit(&self.include) && !hit(&self.exclude)
    }
}

fn build_set<S: AsRef<str>>(patterns: &[S]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let pattern = pattern.as_ref();
        let glob = Glob::new(pattern).map_err(|source| WatchError::Pattern {
            pattern: pattern.to_string(),
            source,
        })?;
        builder.add(glob);
    }
    builder.build().map_err(|source| WatchError::Pattern {
        pattern: patterns
            .iter()
            .map(|p| p.as_ref())
            .collect::<Vec<_>>()
            .join(", "),
        source,
    })
}

/// Cheap change signature: modification time in nanoseconds plus length
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fingerprint {
    pub mtime_ns: u128,
    pub len: u64,
}

impl Fingerprint {
    fn of(entry: &DirEntry) -> Option<Self> {
        let meta = entry.metadata().ok()?;
        let mtime_ns = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        Some(Self {
            mtime_ns,
            len: meta.len(),
        })
    }
}

/// Paths that differ between two snapshots
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub added: Vec<PathBuf>,
    pub removed: Vec<PathBuf>,
    pub modified: Vec<PathBuf>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.modified.is_empty()
    }

    pub fn len(&self) -> usize {
        self.added.len() + self.removed.len() + self.modified.len()
    }

    /// Fold a later change set into this one
    pub fn merge(&mut self, later: ChangeSet) {
        for path in later.added {
            if let Some(pos) = self.removed.iter().position(|p| *p == path) {
                // removed then re-created within one window
                self.removed.remove(pos);
                push_unique(&mut self.modified, path);
            } else {
                push_unique(&mut self.added, path);
            }
        }
        for path in later.removed {
            if let Some(pos) = self.added.iter().position(|p| *p == path) {
                self.added.remove(pos);
            } else {
                self.modified.retain(|p| *p != path);
                push_unique(&mut self.removed, path);
            }
        }
        for path in later.modified {
            if !self.added.contains(&path) {
                push_unique(&mut self.modified, path);
            }
        }
    }
}

fn push_unique(list: &mut Vec<PathBuf>, path: PathBuf) {
    if !list.contains(&path) {
        list.push(path);
    }
}

/// Fingerprints of every tracked file, keyed by relative path
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    files: BTreeMap<PathBuf, Fingerprint>,
}

impl Snapshot {
    pub fn capture(root: &Path, filter: &WatchFilter) -> Self {
        let mut files = BTreeMap::new();
        let walker = WalkDir::new(root)
            .into_iter()
            .filter_entry(|e| !is_hidden_dir(e));

        for entry in walker.filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(root) else {
                continue;
            };
            if !filter.is_tracked(relative) {
                continue;
            }
            if let Some(fingerprint) = Fingerprint::of(&entry) {
                files.insert(relative.to_path_buf(), fingerprint);
            }
        }
        trace!(root = %root.display(), files = files.len(), "Captured snapshot");
        Self { files }
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn contains(&self, relative: &Path) -> bool {
        self.files.contains_key(relative)
    }

    /// What changed going from `self` to `next`
    pub fn diff(&self, next: &Snapshot) -> ChangeSet {
        let mut changes = ChangeSet::default();
        for (path, fingerprint) in &next.files {
            match self.files.get(path) {
                None => changes.added.push(path.clone()),
                Some(prev) if prev != fingerprint => changes.modified.push(path.clone()),
                Some(_) => {}
            }
        }
        changes.removed = self
            .files
            .keys()
            .filter(|p| !next.files.contains_key(*p))
            .cloned()
            .collect();
        changes
    }
}

fn is_hidden_dir(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && entry.file_name().to_str().is_some_and(|n| n.starts_with('.'))
}
