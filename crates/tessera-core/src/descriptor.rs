//! Descriptors: normalized metadata for one discovered unit

use crate::types::TypeExpr;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::path::PathBuf;

/// Whether a unit is callable or describes a data shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitKind {
    Function,
    Entity,
}

impl UnitKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitKind::Function => "function",
            UnitKind::Entity => "entity",
        }
    }
}

/// Source format a unit was discovered in; selects its runner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    /// Lua function
    NativeCode,
    /// SQL statement against a named connection
    Query,
    /// Markdown template
    Template,
    /// Data-model declaration
    Entity,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::NativeCode => "native-code",
            SourceKind::Query => "query",
            SourceKind::Template => "template",
            SourceKind::Entity => "entity",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One declared argument (or entity field)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArgumentSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub arg_type: TypeExpr,
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<JsonValue>,
    /// Dotted path into the injection context (`config.tenant`, `app.user.id`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_context: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ArgumentSpec {
    pub fn new(name: impl Into<String>, arg_type: TypeExpr) -> Self {
        Self {
            name: name.into(),
            arg_type,
            required: true,
            default: None,
            from_context: None,
            description: None,
        }
    }

    /// Arguments filled from context are invisible to callers
    pub fn is_caller_visible(&self) -> bool {
        self.from_context.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signature {
    pub arguments: Vec<ArgumentSpec>,
    pub return_shape: TypeExpr,
}

impl Signature {
    pub fn argument(&self, name: &str) -> Option<&ArgumentSpec> {
        self.arguments.iter().find(|a| a.name == name)
    }

    /// JSON Schema for the caller-visible arguments
    pub fn input_schema(&self) -> JsonValue {
        let visible: Vec<&ArgumentSpec> = self
            .arguments
            .iter()
            .filter(|a| a.is_caller_visible())
            .collect();

        let properties: serde_json::Map<String, JsonValue> = visible
            .iter()
            .map(|a| {
                let mut schema = a.arg_type.json_schema();
                if let (Some(obj), Some(desc)) = (schema.as_object_mut(), &a.description) {
                    obj.insert("description".into(), JsonValue::String(desc.clone()));
                }
                (a.name.clone(), schema)
            })
            .collect();

        let required: Vec<&str> = visible
            .iter()
            .filter(|a| a.required)
            .map(|a| a.name.as_str())
            .collect();

        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": required
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exposure {
    pub externally_exposed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Whether a reload may replace an already-registered descriptor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReloadPolicy {
    #[default]
    Eligible,
    Pinned,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceLocation {
    /// Path relative to the project root, `/`-separated
    pub path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
}

impl SourceLocation {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            line: None,
        }
    }

    pub fn at(path: impl Into<PathBuf>, line: usize) -> Self {
        Self {
            path: path.into(),
            line: Some(line),
        }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => write!(f, "{}:{}", self.path.display(), line),
            None => write!(f, "{}", self.path.display()),
        }
    }
}

/// What a runner needs to locate the executable part of a unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlerRef {
    /// Global function name for Lua units, unit name otherwise
    pub symbol: String,
    /// Named database connection for query units
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection: Option<String>,
}

/// A chat-style message rendered by template units
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TemplateMessage {
    pub role: MessageRole,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

/// Normalized metadata for one callable or data-model unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Descriptor {
    pub name: String,
    pub kind: UnitKind,
    pub source_kind: SourceKind,
    pub signature: Signature,
    #[serde(default)]
    pub exposure: Exposure,
    #[serde(default)]
    pub reload_policy: ReloadPolicy,
    pub source: SourceLocation,
    pub handler: HandlerRef,
    pub canonical_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Source text captured at scan time: Lua chunk, SQL statement or template
    #[serde(default)]
    pub body: String,
    /// The unit's own declaration when `body` is a file shared with sibling units
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_source: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<TemplateMessage>,
}

impl Descriptor {
    pub fn is_exposed(&self) -> bool {
        self.kind == UnitKind::Function && self.exposure.externally_exposed
    }

    /// Entity names referenced from arguments and the return shape
    pub fn entity_references(&self) -> Vec<&str> {
        let mut refs: Vec<&str> = self
            .signature
            .arguments
            .iter()
            .filter_map(|a| a.arg_type.entity_name())
            .collect();
        if let Some(ret) = self.signature.return_shape.entity_name() {
            refs.push(ret);
        }
        refs.sort_unstable();
        refs.dedup();
        refs
    }

    /// Equal apart from a shared body, which changes whenever any sibling
    /// in the same file is edited
    pub fn same_unit(&self, other: &Descriptor) -> bool {
        match (&self.unit_source, &other.unit_source) {
            (Some(mine), Some(theirs)) => {
                mine == theirs
                    && Descriptor { body: String::new(), ..self.clone() }
                        == Descriptor { body: String::new(), ..other.clone() }
            }
            _ => self == other,
        }
    }

    /// Listing view without the captured body
    pub fn summary(&self) -> JsonValue {
        serde_json::json!({
            "name": self.name,
            "kind": self.kind,
            "source_kind": self.source_kind,
            "description": self.description,
            "arguments": self.signature.arguments,
            "return_shape": self.signature.return_shape,
            "exposed": self.exposure.externally_exposed,
            "reload_policy": self.reload_policy,
            "source": self.source.to_string(),
            "canonical_id": self.canonical_id,
        })
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn test_input_schema_hides_context_arguments() {
        let mut desc = function("greet", "greet.lua");
        let mut tenant = ArgumentSpec::new("tenant", TypeExpr::String);
        tenant.from_context = Some("config.tenant".into());
        let mut excited = ArgumentSpec::new("excited", TypeExpr::Bool);
        excited.required = false;
        desc.signature.arguments = vec![ArgumentSpec::new("name", TypeExpr::String), excited, tenant];

        let schema = desc.signature.input_schema();
        assert!(schema["properties"]["name"].is_object());
        assert!(schema["properties"]["excited"].is_object());
        assert!(schema["properties"].get("tenant").is_none());
        assert_eq!(schema["required"], serde_json::json!(["name"]));
    }

    #[test]
    fn test_entity_references_are_deduplicated() {
        let mut desc = function("users", "users.lua");
        desc.signature.arguments = vec![ArgumentSpec::new(
            "filter",
            TypeExpr::Entity("User".into()),
        )];
        desc.signature.return_shape = TypeExpr::Array(Box::new(TypeExpr::Entity("User".into())));
        assert_eq!(desc.entity_references(), vec!["User"]);
    }

    #[test]
    fn test_entities_are_never_exposed() {
        let mut desc = entity("User", "models.lua");
        desc.exposure.externally_exposed = true;
        assert!(!desc.is_exposed());
    }
}
