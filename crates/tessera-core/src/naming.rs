//! Identifier rules shared by the scanner and the control plane

use crate::descriptor::UnitKind;
use std::path::Path;

pub const MAX_NAME_LEN: usize = 64;

/// Names that collide with interactive/admin commands
pub const RESERVED_FUNCTION_NAMES: &[&str] = &[
    "help",
    "quit",
    "exit",
    "reset",
    "reload",
    "settings",
    "config",
    "state",
    "functions",
    "entities",
    "databases",
    "errors",
];

/// `^[a-zA-Z][a-zA-Z0-9_-]{0,63}$`
pub fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    first.is_ascii_alphabetic()
        && name.len() <= MAX_NAME_LEN
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

pub fn is_reserved_function_name(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    RESERVED_FUNCTION_NAMES.contains(&lower.as_str())
}

/// Fold case and separators so `get-user` and `Get_User` compare equal
pub fn proximity_key(name: &str) -> String {
    name.chars()
        .filter(|c| *c != '-' && *c != '_')
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Path relative to `root`, `/`-separated, or the path itself when outside the root
pub fn relative_path(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    let joined = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");
    joined.trim_start_matches("./").to_string()
}

/// `<kind>:<lowercased relative path>:<symbol>`
pub fn canonical_id(kind: UnitKind, relative: &str, symbol: &str) -> String {
    format!("{}:{}:{}", kind.as_str(), relative.to_lowercase(), symbol)
}
