//! Discovery: walk a project tree and turn marked source files into descriptors
//!
//! Each file is classified by extension and marker. Lua files need an
//! `@function`/`@entity` annotation block; `.sql` and `.md` files need
//! frontmatter with a `type:` line. Anything else is ignored silently.
//!
//! Every problem becomes a [`Diagnostic`]; scanning itself never fails except
//! when the root directory is unusable.

mod frontmatter;
mod lua;

use crate::descriptor::{Descriptor, SourceLocation, UnitKind};
use crate::diagnostics::{codes, Diagnostic};
use crate::naming;
use crate::registry::Domain;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("scan root does not exist: {0}")]
    MissingRoot(PathBuf),

    #[error("scan root is not a directory: {0}")]
    NotADirectory(PathBuf),
}

/// Units and findings from one file
#[derive(Debug, Default)]
pub(crate) struct FileOutcome {
    pub units: Vec<Descriptor>,
    pub diagnostics: Vec<Diagnostic>,
}

impl FileOutcome {
    pub(crate) fn diagnostics(diagnostics: Vec<Diagnostic>) -> Self {
        Self {
            units: Vec::new(),
            diagnostics,
        }
    }
}

/// Everything one pass over the tree found
#[derive(Debug, Default, Clone)]
pub struct ScanResult {
    pub entities: Vec<Descriptor>,
    pub functions: Vec<Descriptor>,
    pub diagnostics: Vec<Diagnostic>,
    /// Files that were recognized as candidates, relative to the root
    pub candidate_files: Vec<PathBuf>,
}

impl ScanResult {
    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(Diagnostic::is_error)
    }

    pub fn error_count(&self) -> usize {
        self.diagnostics.iter().filter(|d| d.is_error()).count()
    }

    pub fn units(&self) -> impl Iterator<Item = &Descriptor> {
        self.entities.iter().chain(self.functions.iter())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileKind {
    Lua,
    Sql,
    Markdown,
}

impl FileKind {
    fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()? {
            "lua" => Some(FileKind::Lua),
            "sql" => Some(FileKind::Sql),
            "md" => Some(FileKind::Markdown),
            _ => None,
        }
    }

    fn is_candidate(&self, content: &str) -> bool {
        match self {
            FileKind::Lua => lua::has_unit_marker(content),
            FileKind::Sql => frontmatter::has_type_marker(content, frontmatter::Style::SqlComment),
            FileKind::Markdown => frontmatter::has_type_marker(content, frontmatter::Style::Markdown),
        }
    }

    fn parse(&self, content: &str, relative: &str) -> FileOutcome {
        match self {
            FileKind::Lua => lua::parse(content, relative),
            FileKind::Sql => frontmatter::parse(content, relative, frontmatter::Style::SqlComment),
            FileKind::Markdown => frontmatter::parse(content, relative, frontmatter::Style::Markdown),
        }
    }
}

/// Hidden directories (including the runtime's own `.tessera/`) are skipped
fn is_ignored(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && entry.file_name().to_str().is_some_and(|n| n.starts_with('.'))
}

fn domain_of(kind: UnitKind) -> Domain {
    match kind {
        UnitKind::Entity => Domain::Entities,
        UnitKind::Function => Domain::Functions,
    }
}

/// Walks one project root
#[derive(Debug, Clone)]
pub struct Scanner {
    root: PathBuf,
}

impl Scanner {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Scan the whole tree
    pub fn scan(&self) -> Result<ScanResult, ScanError> {
        if !self.root.exists() {
            return Err(ScanError::MissingRoot(self.root.clone()));
        }
        if !self.root.is_dir() {
            return Err(ScanError::NotADirectory(self.root.clone()));
        }

        let mut result = ScanResult::default();
        let mut units: Vec<Descriptor> = Vec::new();

        let walker = WalkDir::new(&self.root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| !is_ignored(e));

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    let path = e
                        .path()
                        .map(|p| naming::relative_path(&self.root, p))
                        .unwrap_or_default();
                    warn!(path = %path, error = %e, "Skipping unreadable entry");
                    result.diagnostics.push(Diagnostic::warning(
                        SourceLocation::file(path),
                        codes::IO,
                        e.to_string(),
                    ));
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(kind) = FileKind::from_path(entry.path()) else {
                continue;
            };

            let relative = naming::relative_path(&self.root, entry.path());
            let content = match std::fs::read(entry.path()) {
                Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                Err(e) => {
                    result.diagnostics.push(Diagnostic::warning(
                        SourceLocation::file(&relative),
                        codes::IO,
                        format!("failed to read file: {}", e),
                    ));
                    continue;
                }
            };
            if !kind.is_candidate(&content) {
                continue;
            }

            debug!(path = %relative, "Scanning candidate");
            result.candidate_files.push(PathBuf::from(&relative));
            let outcome = kind.parse(&content, &relative);
            result.diagnostics.extend(outcome.diagnostics);
            for unit in outcome.units {
                match validate_name(&unit) {
                    Some(diagnostic) => result.diagnostics.push(diagnostic),
                    None => units.push(unit),
                }
            }
        }

        let units = drop_duplicates(units, &mut result.diagnostics);
        let units = drop_identity_collisions(units, &mut result.diagnostics);
        warn_on_proximity(&units, &mut result.diagnostics);

        for unit in units {
            match unit.kind {
                UnitKind::Entity => result.entities.push(unit),
                UnitKind::Function => result.functions.push(unit),
            }
        }

        debug!(
            entities = result.entities.len(),
            functions = result.functions.len(),
            diagnostics = result.diagnostics.len(),
            "Scan complete"
        );
        Ok(result)
    }
}

fn validate_name(unit: &Descriptor) -> Option<Diagnostic> {
    let domain = domain_of(unit.kind);
    if !naming::is_valid_name(&unit.name) {
        return Some(
            Diagnostic::error(
                unit.source.clone(),
                codes::INVALID_NAME,
                format!("'{}' is not a valid {} name", unit.name, unit.kind.as_str()),
            )
            .with_suggestion("Names start with a letter and use letters, digits, '_' or '-' (max 64).")
            .in_domain(domain)
            .for_unit(&unit.name),
        );
    }
    if unit.kind == UnitKind::Function && naming::is_reserved_function_name(&unit.name) {
        return Some(
            Diagnostic::error(
                unit.source.clone(),
                codes::RESERVED_NAME,
                format!("'{}' is reserved", unit.name),
            )
            .with_suggestion("Pick a different name; this one is used by a built-in command.")
            .in_domain(domain)
            .for_unit(&unit.name),
        );
    }
    None
}

/// A name declared more than once registers under none of its declarations
fn drop_duplicates(units: Vec<Descriptor>, diagnostics: &mut Vec<Diagnostic>) -> Vec<Descriptor> {
    let mut occurrences: HashMap<(UnitKind, String), Vec<SourceLocation>> = HashMap::new();
    for unit in &units {
        occurrences
            .entry((unit.kind, unit.name.clone()))
            .or_default()
            .push(unit.source.clone());
    }

    let duplicated: BTreeMap<(&str, &str), &Vec<SourceLocation>> = occurrences
        .iter()
        .filter(|(_, locations)| locations.len() > 1)
        .map(|((kind, name), locations)| ((kind.as_str(), name.as_str()), locations))
        .collect();

    for ((kind, name), locations) in &duplicated {
        let places = locations
            .iter()
            .map(|l| l.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        let domain = if *kind == UnitKind::Entity.as_str() {
            Domain::Entities
        } else {
            Domain::Functions
        };
        diagnostics.push(
            Diagnostic::error(
                locations[1].clone(),
                codes::DUPLICATE_NAME,
                format!("{} '{}' is declared {} times: {}", kind, name, locations.len(), places),
            )
            .with_suggestion("Rename or remove all but one declaration.")
            .in_domain(domain)
            .for_unit(*name),
        );
    }

    units
        .into_iter()
        .filter(|u| {
            occurrences
                .get(&(u.kind, u.name.clone()))
                .map_or(true, |l| l.len() == 1)
        })
        .collect()
}

/// Canonical ids must be unique even when paths differ only by case
fn drop_identity_collisions(
    units: Vec<Descriptor>,
    diagnostics: &mut Vec<Diagnostic>,
) -> Vec<Descriptor> {
    let mut seen: HashMap<String, SourceLocation> = HashMap::new();
    let mut kept = Vec::with_capacity(units.len());
    for unit in units {
        if let Some(first) = seen.get(&unit.canonical_id) {
            diagnostics.push(
                Diagnostic::error(
                    unit.source.clone(),
                    codes::IDENTITY_COLLISION,
                    format!(
                        "'{}' has the same identity ({}) as the unit at {}",
                        unit.name, unit.canonical_id, first
                    ),
                )
                .in_domain(domain_of(unit.kind))
                .for_unit(&unit.name),
            );
            continue;
        }
        seen.insert(unit.canonical_id.clone(), unit.source.clone());
        kept.push(unit);
    }
    kept
}

fn warn_on_proximity(units: &[Descriptor], diagnostics: &mut Vec<Diagnostic>) {
    let mut seen: HashMap<(UnitKind, String), &str> = HashMap::new();
    for unit in units {
        let key = (unit.kind, naming::proximity_key(&unit.name));
        match seen.get(&key).copied() {
            Some(other) if other != unit.name => diagnostics.push(
                Diagnostic::warning(
                    unit.source.clone(),
                    codes::NAME_PROXIMITY,
                    format!("'{}' differs from '{}' only by case or separators", unit.name, other),
                )
                .in_domain(domain_of(unit.kind))
                .for_unit(&unit.name),
            ),
            Some(_) => {}
            None => {
                seen.insert(key, &unit.name);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &TempDir, rel: &str, content: &str) {
        let path = dir.path().join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    fn lua_fn(name: &str) -> String {
        format!("--- @function\nfunction {}()\n  return '{}'\nend\n", name, name)
    }

    #[test]
    fn test_missing_root_is_an_error() {
        let dir = TempDir::new().unwrap();
        let err = Scanner::new(dir.path().join("nope")).scan().unwrap_err();
        assert!(matches!(err, ScanError::MissingRoot(_)));
    }

    #[test]
    fn test_only_marked_files_are_candidates() {
        let dir = TempDir::new().unwrap();
        write(&dir, "ping.lua", &lua_fn("ping"));
        write(&dir, "lib/util.lua", "local M = {}\nreturn M\n");
        write(&dir, "README.md", "# Project\n");
        write(&dir, "schema.sql", "CREATE TABLE t (id INTEGER);\n");
        write(&dir, "notes.txt", "--- @function\n");

        let result = Scanner::new(dir.path()).scan().unwrap();
        assert_eq!(result.functions.len(), 1);
        assert_eq!(result.candidate_files, vec![PathBuf::from("ping.lua")]);
        assert!(result.diagnostics.is_empty());
    }

    #[test]
    fn test_hidden_directories_are_skipped() {
        let dir = TempDir::new().unwrap();
        write(&dir, ".tessera/cache.lua", &lua_fn("cached"));
        write(&dir, "tools/ping.lua", &lua_fn("ping"));
        let result = Scanner::new(dir.path()).scan().unwrap();
        let names: Vec<&str> = result.functions.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["ping"]);
    }

    #[test]
    fn test_duplicate_names_register_neither_unit() {
        let dir = TempDir::new().unwrap();
        write(&dir, "a.lua", &lua_fn("ping"));
        write(&dir, "b.lua", &lua_fn("ping"));
        write(&dir, "c.lua", &lua_fn("pong"));

        let result = Scanner::new(dir.path()).scan().unwrap();
        let names: Vec<&str> = result.functions.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["pong"]);
        let dups: Vec<&Diagnostic> = result
            .diagnostics
            .iter()
            .filter(|d| d.code == codes::DUPLICATE_NAME)
            .collect();
        assert_eq!(dups.len(), 1);
        assert_eq!(dups[0].unit.as_deref(), Some("ping"));
        assert!(dups[0].message.contains("a.lua"));
        assert!(dups[0].message.contains("b.lua"));
    }

    #[test]
    fn test_one_diagnostic_per_invalid_candidate() {
        let dir = TempDir::new().unwrap();
        write(&dir, "ok.lua", &lua_fn("fine"));
        write(&dir, "bad_syntax.lua", "--- @function\nfunction oops(\n");
        write(&dir, "reserved.lua", &lua_fn("reload"));
        write(
            &dir,
            "bad_name.lua",
            "--- @function name=\"9lives\"\nfunction cat() end\n",
        );

        let result = Scanner::new(dir.path()).scan().unwrap();
        assert_eq!(result.functions.len(), 1);
        assert_eq!(result.error_count(), 3);
        let codes_seen: Vec<&str> = result.diagnostics.iter().map(|d| d.code.as_str()).collect();
        assert!(codes_seen.contains(&codes::SYNTAX));
        assert!(codes_seen.contains(&codes::RESERVED_NAME));
        assert!(codes_seen.contains(&codes::INVALID_NAME));
    }

    #[test]
    fn test_close_names_warn_but_register() {
        let dir = TempDir::new().unwrap();
        write(&dir, "a.lua", "--- @function name=\"get-user\"\nfunction a() end\n");
        write(&dir, "b.lua", "--- @function name=\"get_user\"\nfunction b() end\n");

        let result = Scanner::new(dir.path()).scan().unwrap();
        assert_eq!(result.functions.len(), 2);
        assert!(!result.has_errors());
        assert_eq!(result.diagnostics[0].code, codes::NAME_PROXIMITY);
    }

    #[test]
    fn test_mixed_sources_in_one_tree() {
        let dir = TempDir::new().unwrap();
        write(&dir, "models.lua", "--- @entity\n-- @field id int\nUser = {}\n");
        write(
            &dir,
            "queries/count.sql",
            "/*\n---\nname: count_users\ntype: sql_function\nreturn_shape: int\n---\n*/\nSELECT COUNT(*) FROM users\n",
        );
        write(
            &dir,
            "prompts/hello.md",
            "---\nname: hello\ntype: template_function\n---\nHello!\n",
        );

        let result = Scanner::new(dir.path()).scan().unwrap();
        assert_eq!(result.entities.len(), 1);
        assert_eq!(result.functions.len(), 2);
        assert_eq!(result.units().count(), 3);
    }
}
