//! Type expressions used by argument specs, return shapes and entity fields
//!
//! Authors write types as short strings (`int`, `string[]`, `User`). They are
//! normalized here so descriptors compare structurally regardless of alias.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use thiserror::Error;

/// Error produced when a type expression cannot be understood
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unsupported type expression '{expr}': {reason}")]
pub struct TypeError {
    pub expr: String,
    pub reason: String,
}

/// Normalized type of an argument, field or return value
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TypeExpr {
    String,
    Int,
    Float,
    Bool,
    Decimal,
    Date,
    DateTime,
    Dict,
    List,
    Any,
    Void,
    /// `T[]`
    Array(Box<TypeExpr>),
    /// Reference to a declared entity, by name
    Entity(String),
}

impl TypeExpr {
    /// Parse and normalize a type expression
    ///
    /// Aliases (`str`, `integer`, `number`, `boolean`, `object`, `array`) collapse
    /// onto their canonical form. CapitalCase identifiers are entity references.
    pub fn parse(raw: &str) -> Result<Self, TypeError> {
        let expr = raw.trim();
        if expr.is_empty() {
            return Err(TypeError {
                expr: raw.to_string(),
                reason: "empty type".to_string(),
            });
        }

        if let Some(inner) = expr.strip_suffix("[]") {
            let inner = TypeExpr::parse(inner).map_err(|e| TypeError {
                expr: raw.to_string(),
                reason: e.reason,
            })?;
            if inner == TypeExpr::Void {
                return Err(TypeError {
                    expr: raw.to_string(),
                    reason: "void cannot be used as a list element".to_string(),
                });
            }
            return Ok(TypeExpr::Array(Box::new(inner)));
        }

        let primitive = match expr.to_ascii_lowercase().as_str() {
            "string" | "str" => Some(TypeExpr::String),
            "int" | "integer" => Some(TypeExpr::Int),
            "float" | "number" => Some(TypeExpr::Float),
            "bool" | "boolean" => Some(TypeExpr::Bool),
            "decimal" => Some(TypeExpr::Decimal),
            "date" => Some(TypeExpr::Date),
            "datetime" => Some(TypeExpr::DateTime),
            "dict" | "object" => Some(TypeExpr::Dict),
            "list" | "array" => Some(TypeExpr::List),
            "any" => Some(TypeExpr::Any),
            "void" | "none" | "nil" => Some(TypeExpr::Void),
            _ => None,
        };
        if let Some(ty) = primitive {
            return Ok(ty);
        }

        let mut chars = expr.chars();
        let starts_upper = chars.next().is_some_and(|c| c.is_ascii_uppercase());
        let rest_ok = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
        if starts_upper && rest_ok {
            return Ok(TypeExpr::Entity(expr.to_string()));
        }

        Err(TypeError {
            expr: raw.to_string(),
            reason: "expected a primitive type, an entity name or T[]".to_string(),
        })
    }

    /// Entity this type refers to, looking through list wrappers
    pub fn entity_name(&self) -> Option<&str> {
        match self {
            TypeExpr::Entity(name) => Some(name),
            TypeExpr::Array(inner) => inner.entity_name(),
            _ => None,
        }
    }

    /// JSON Schema fragment describing values of this type
    pub fn json_schema(&self) -> JsonValue {
        match self {
            TypeExpr::String => serde_json::json!({ "type": "string" }),
            TypeExpr::Int => serde_json::json!({ "type": "integer" }),
            TypeExpr::Float | TypeExpr::Decimal => serde_json::json!({ "type": "number" }),
            TypeExpr::Bool => serde_json::json!({ "type": "boolean" }),
            TypeExpr::Date => serde_json::json!({ "type": "string", "format": "date" }),
            TypeExpr::DateTime => serde_json::json!({ "type": "string", "format": "date-time" }),
            TypeExpr::Dict | TypeExpr::Entity(_) => serde_json::json!({ "type": "object" }),
            TypeExpr::List => serde_json::json!({ "type": "array" }),
            TypeExpr::Array(inner) => serde_json::json!({
                "type": "array",
                "items": inner.json_schema()
            }),
            TypeExpr::Void => serde_json::json!({ "type": "null" }),
            TypeExpr::Any => serde_json::json!({}),
        }
    }
}

impl fmt::Display for TypeExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeExpr::String => f.write_str("string"),
            TypeExpr::Int => f.write_str("int"),
            TypeExpr::Float => f.write_str("float"),
            TypeExpr::Bool => f.write_str("bool"),
            TypeExpr::Decimal => f.write_str("decimal"),
            TypeExpr::Date => f.write_str("date"),
            TypeExpr::DateTime => f.write_str("datetime"),
            TypeExpr::Dict => f.write_str("dict"),
            TypeExpr::List => f.write_str("list"),
            TypeExpr::Any => f.write_str("any"),
            TypeExpr::Void => f.write_str("void"),
            TypeExpr::Array(inner) => write!(f, "{}[]", inner),
            TypeExpr::Entity(name) => f.write_str(name),
        }
    }
}

impl TryFrom<String> for TypeExpr {
    type Error = TypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        TypeExpr::parse(&value)
    }
}

impl From<TypeExpr> for String {
    fn from(value: TypeExpr) -> Self {
        value.to_string()
    }
}
