//! # Tessera configuration
//!
//! Loads `tessera.toml` (or `tessera.yaml` / `tessera.yml`) from a project
//! root. Environment placeholders (`${VAR}`, `${VAR:default}`) are expanded
//! before parsing; every section has defaults, so an absent file is a valid,
//! default configuration.
//!
//! ```toml
//! [runtime]
//! app_name = "billing"
//! log_level = "debug"
//!
//! [auto_reload]
//! enabled = true
//! interval_ms = 500
//!
//! [execution]
//! workers = 8
//! overflow = "block"
//!
//! [databases.default]
//! path = "${DATA_DIR:data}/app.db"
//!
//! [config]
//! tenant = "acme"
//! ```

pub mod components;
mod interpolate;

pub use components::*;
pub use interpolate::{interpolate, interpolate_with};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// Per-project runtime state directory
pub const STATE_DIR: &str = ".tessera";

/// Recognized config file names, in lookup order
pub const CONFIG_FILES: &[&str] = &["tessera.toml", "tessera.yaml", "tessera.yml"];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("environment variable '{var}' is not set and has no default")]
    MissingEnv { var: String },

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: String, reason: String },

    #[error("unsupported config format: {0}")]
    UnsupportedFormat(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Toml,
    Yaml,
}

impl Format {
    fn from_path(path: &Path) -> Result<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Ok(Format::Toml),
            Some("yaml") | Some("yml") => Ok(Format::Yaml),
            other => Err(ConfigError::UnsupportedFormat(
                other.unwrap_or_default().to_string(),
            )),
        }
    }
}

/// `<root>/.tessera`
pub fn state_dir(root: &Path) -> PathBuf {
    root.join(STATE_DIR)
}

/// Log directory used when the project state directory cannot be created
pub fn fallback_log_dir() -> Option<PathBuf> {
    dirs::state_dir()
        .or_else(dirs::data_local_dir)
        .map(|d| d.join("tessera"))
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProjectConfig {
    pub runtime: RuntimeSection,
    pub auto_reload: AutoReloadSection,
    pub execution: ExecutionSection,
    pub transport: TransportSection,
    pub databases: BTreeMap<String, DatabaseSection>,
    /// Free-form values injected as `config.*`
    pub config: Map<String, JsonValue>,
    /// Free-form values injected as `app.*`
    pub app: Map<String, JsonValue>,
}

impl ProjectConfig {
    /// Config file present in `root`, if any
    pub fn locate(root: &Path) -> Option<PathBuf> {
        let found: Vec<PathBuf> = CONFIG_FILES
            .iter()
            .map(|name| root.join(name))
            .filter(|p| p.is_file())
            .collect();
        if found.len() > 1 {
            warn!(using = %found[0].display(), "Multiple config files found");
        }
        found.into_iter().next()
    }

    /// Load and validate the project config; defaults when no file exists
    pub fn load(root: &Path) -> Result<Self> {
        let Some(path) = Self::locate(root) else {
            debug!(root = %root.display(), "No config file, using defaults");
            return Ok(Self::default());
        };
        Self::load_file(&path)
    }

    pub fn load_file(path: &Path) -> Result<Self> {
        let format = Format::from_path(path)?;
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::parse(&interpolate(&raw)?, format).map_err(|e| match e {
            ConfigError::Parse { message, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                message,
            },
            other => other,
        })?;
        debug!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    /// Parse already-interpolated text and validate it
    pub fn parse(text: &str, format: Format) -> Result<Self> {
        let parse_error = |message: String| ConfigError::Parse {
            path: PathBuf::new(),
            message,
        };
        let config: Self = match format {
            #[cfg(feature = "toml")]
            Format::Toml => toml::from_str(text).map_err(|e| parse_error(e.to_string()))?,
            #[cfg(feature = "yaml")]
            Format::Yaml => serde_yaml::from_str(text).map_err(|e| parse_error(e.to_string()))?,
            #[allow(unreachable_patterns)]
            other => return Err(ConfigError::UnsupportedFormat(format!("{:?}", other))),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |field: &str, reason: &str| {
            Err(ConfigError::Invalid {
                field: field.to_string(),
                reason: reason.to_string(),
            })
        };

        if self.execution.workers == 0 {
            return invalid("execution.workers", "must be at least 1");
        }
        if self.execution.timeout_ms == 0 {
            return invalid("execution.timeout_ms", "must be at least 1");
        }
        if self.auto_reload.interval_ms < MIN_INTERVAL_MS {
            return invalid(
                "auto_reload.interval_ms",
                &format!("must be at least {}", MIN_INTERVAL_MS),
            );
        }
        if self.auto_reload.include.is_empty() {
            return invalid("auto_reload.include", "must list at least one pattern");
        }
        for (field, patterns) in [
            ("auto_reload.include", &self.auto_reload.include),
            ("auto_reload.exclude", &self.auto_reload.exclude),
        ] {
            for pattern in patterns {
                if let Err(e) = globset::Glob::new(pattern) {
                    return invalid(field, &format!("bad glob '{}': {}", pattern, e));
                }
            }
        }
        for (name, db) in &self.databases {
            if db.path.as_os_str().is_empty() {
                return invalid(&format!("databases.{}.path", name), "must not be empty");
            }
        }
        if let Some(level) = &self.runtime.log_level {
            if level.trim().is_empty() {
                return invalid("runtime.log_level", "must not be empty");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_means_defaults() {
        let dir = TempDir::new().unwrap();
        let config = ProjectConfig::load(dir.path()).unwrap();
        assert_eq!(config, ProjectConfig::default());
        assert_eq!(config.execution.workers, 4);
        assert_eq!(config.auto_reload.include.len(), 3);
        assert!(config.transport.enabled);
    }

    #[test]
    fn test_toml_sections() {
        let text = r#"
[runtime]
app_name = "billing"

[auto_reload]
enabled = true
interval_ms = 250

[execution]
workers = 2
overflow = "block"

[databases.default]
path = "data/app.db"

[config]
tenant = "acme"
"#;
        let config = ProjectConfig::parse(text, Format::Toml).unwrap();
        assert_eq!(config.runtime.app_name.as_deref(), Some("billing"));
        assert!(config.auto_reload.enabled);
        assert_eq!(config.auto_reload.debounce_ms, 300);
        assert_eq!(config.execution.overflow, Overflow::Block);
        assert_eq!(
            config.databases["default"].resolve(Path::new("/srv/p")),
            PathBuf::from("/srv/p/data/app.db")
        );
        assert_eq!(config.config["tenant"], "acme");
    }

    #[test]
    fn test_yaml_file_is_found() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("tessera.yaml"),
            "execution:\n  queue_capacity: 3\napp:\n  region: eu\n",
        )
        .unwrap();
        let config = ProjectConfig::load(dir.path()).unwrap();
        assert_eq!(config.execution.queue_capacity, 3);
        assert_eq!(config.app["region"], "eu");
    }

    #[test]
    fn test_zero_workers_is_invalid() {
        let err = ProjectConfig::parse("[execution]\nworkers = 0\n", Format::Toml).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref field, .. } if field == "execution.workers"));
    }

    #[test]
    fn test_interval_floor() {
        let err = ProjectConfig::parse("[auto_reload]\ninterval_ms = 20\n", Format::Toml).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn test_unknown_keys_are_parse_errors() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("tessera.toml"), "[execution]\nwrokers = 2\n").unwrap();
        let err = ProjectConfig::load(dir.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { ref path, .. } if path.ends_with("tessera.toml")));
    }

    #[test]
    fn test_manifest_path_defaults_into_state_dir() {
        let config = ProjectConfig::default();
        assert_eq!(
            config.transport.manifest_path(Path::new("/p")),
            PathBuf::from("/p/.tessera/tools.json")
        );
    }
}
