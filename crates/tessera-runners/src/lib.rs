//! # Tessera runners
//!
//! One [`tessera_core::Runner`] per source kind:
//!
//! | source kind | runner | executes |
//! |---|---|---|
//! | native-code | [`LuaRunner`] | global Lua 5.4 function, fresh VM per call |
//! | query | [`SqliteRunner`] | SQL against a named `[databases]` connection |
//! | template | [`TemplateRunner`] | `{{ placeholder }}` substitution |

pub mod error;
pub mod lua;
pub mod shape;
pub mod sqlite;
pub mod template;

pub use error::{Result, RunnerError};
pub use lua::LuaRunner;
pub use sqlite::{SqliteRunner, DEFAULT_CONNECTION};
pub use template::TemplateRunner;

use std::path::Path;
use std::sync::Arc;
use tessera_config::ProjectConfig;
use tessera_core::RunnerSet;

/// Runner set for a project: Lua, templates, and SQLite over its databases
pub fn default_runners(config: &ProjectConfig, root: &Path) -> Result<RunnerSet> {
    let sqlite = SqliteRunner::open(&config.databases, root)?;
    Ok(RunnerSet::new()
        .with(Arc::new(LuaRunner::new()))
        .with(Arc::new(TemplateRunner::new()))
        .with(Arc::new(sqlite)))
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;
    use tessera_core::{
        ArgumentSpec, Descriptor, Exposure, HandlerRef, ReloadPolicy, Signature, SourceKind,
        SourceLocation, TypeExpr, UnitKind,
    };

    /// Function descriptor whose handler symbol is `name`
    pub fn unit(
        source_kind: SourceKind,
        name: &str,
        body: &str,
        arguments: &[(&str, TypeExpr)],
        return_shape: TypeExpr,
    ) -> Arc<Descriptor> {
        Arc::new(Descriptor {
            name: name.to_string(),
            kind: UnitKind::Function,
            source_kind,
            signature: Signature {
                arguments: arguments
                    .iter()
                    .map(|(n, t)| ArgumentSpec::new(*n, t.clone()))
                    .collect(),
                return_shape,
            },
            exposure: Exposure::default(),
            reload_policy: ReloadPolicy::Eligible,
            source: SourceLocation::at(format!("{}.src", name), 1),
            handler: HandlerRef {
                symbol: name.to_string(),
                connection: None,
            },
            canonical_id: format!("function:{}.src:{}", name, name),
            description: None,
            body: body.to_string(),
            unit_source: None,
            messages: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tessera_core::SourceKind;

    #[test]
    fn test_default_runners_cover_every_callable_kind() {
        let dir = TempDir::new().unwrap();
        let set = default_runners(&ProjectConfig::default(), dir.path()).unwrap();
        for kind in [SourceKind::NativeCode, SourceKind::Query, SourceKind::Template] {
            assert!(set.get(kind).is_some(), "{}", kind);
        }
        assert!(set.get(SourceKind::Entity).is_none());
    }
}
