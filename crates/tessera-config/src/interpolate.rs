//! `${VAR}` / `${VAR:default}` substitution on raw config text

use crate::ConfigError;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

static VAR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::([^}]*))?\}").expect("interpolation regex")
});

/// Substitute from the process environment
pub fn interpolate(text: &str) -> Result<String, ConfigError> {
    interpolate_with(text, |name| std::env::var(name).ok())
}

/// Substitute using `lookup`; a variable with no value and no default is an error
pub fn interpolate_with<F>(text: &str, lookup: F) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut missing: Option<String> = None;
    let replaced = VAR_RE.replace_all(text, |caps: &Captures| {
        let name = &caps[1];
        match (lookup(name), caps.get(2)) {
            (Some(value), _) => value,
            (None, Some(default)) => default.as_str().to_string(),
            (None, None) => {
                missing.get_or_insert_with(|| name.to_string());
                String::new()
            }
        }
    });

    match missing {
        Some(var) => Err(ConfigError::MissingEnv { var }),
        None => Ok(replaced.into_owned()),
    }
}
