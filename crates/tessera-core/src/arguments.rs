//! Argument resolution and casting ahead of a runner call
//!
//! Each declared argument is filled from, in order: the injection context
//! (`from_context`), the caller's input, the declared default. What remains
//! unfilled is an error only when the argument is required.

use crate::descriptor::Signature;
use crate::types::TypeExpr;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::{Map, Value as JsonValue};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ArgumentError {
    #[error("missing required argument '{0}'")]
    Missing(String),

    #[error("unknown argument '{0}'")]
    Unknown(String),

    #[error("argument '{name}' expects {expected}: {reason}")]
    Cast {
        name: String,
        expected: TypeExpr,
        reason: String,
    },
}

/// Resolves caller input against a signature, with `app`/`config` context injection
#[derive(Debug, Clone, Default)]
pub struct ArgumentResolver {
    context: JsonValue,
}

impl ArgumentResolver {
    pub fn new(app: Map<String, JsonValue>, config: Map<String, JsonValue>) -> Self {
        Self {
            context: serde_json::json!({ "app": app, "config": config }),
        }
    }

    /// Look up a dotted path such as `config.tenant` or `app.user.id`
    pub fn context_value(&self, path: &str) -> Option<&JsonValue> {
        path.split('.')
            .try_fold(&self.context, |value, key| value.get(key))
            .filter(|v| !v.is_null())
    }

    pub fn resolve(
        &self,
        signature: &Signature,
        input: &Map<String, JsonValue>,
    ) -> Result<Map<String, JsonValue>, ArgumentError> {
        if let Some(unknown) = input.keys().find(|k| signature.argument(k).is_none()) {
            return Err(ArgumentError::Unknown(unknown.clone()));
        }

        let mut resolved = Map::new();
        for spec in &signature.arguments {
            let raw = spec
                .from_context
                .as_deref()
                .and_then(|path| self.context_value(path))
                .or_else(|| input.get(&spec.name).filter(|v| !v.is_null()))
                .or(spec.default.as_ref());

            match raw {
                Some(value) => {
                    let value = cast(value, &spec.arg_type).map_err(|reason| ArgumentError::Cast {
                        name: spec.name.clone(),
                        expected: spec.arg_type.clone(),
                        reason,
                    })?;
                    resolved.insert(spec.name.clone(), value);
                }
                None if spec.required => return Err(ArgumentError::Missing(spec.name.clone())),
                None => {}
            }
        }
        Ok(resolved)
    }
}

/// Convert `value` to the representation `ty` expects
pub fn cast(value: &JsonValue, ty: &TypeExpr) -> Result<JsonValue, String> {
    let mismatch = || format!("got {}", kind_of(value));
    match ty {
        TypeExpr::Any => Ok(value.clone()),
        TypeExpr::Void => match value {
            JsonValue::Null => Ok(JsonValue::Null),
            _ => Err(mismatch()),
        },
        TypeExpr::String => match value {
            JsonValue::String(_) => Ok(value.clone()),
            JsonValue::Number(n) => Ok(JsonValue::String(n.to_string())),
            JsonValue::Bool(b) => Ok(JsonValue::String(b.to_string())),
            _ => Err(mismatch()),
        },
        TypeExpr::Int => match value {
            JsonValue::Number(n) if n.is_i64() || n.is_u64() => Ok(value.clone()),
            JsonValue::Number(n) => match n.as_f64() {
                Some(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
                    Ok(JsonValue::from(f as i64))
                }
                _ => Err(format!("{} is not a whole number", n)),
            },
            JsonValue::String(s) => s
                .trim()
                .parse::<i64>()
                .map(JsonValue::from)
                .map_err(|_| format!("'{}' is not an integer", s)),
            _ => Err(mismatch()),
        },
        TypeExpr::Float | TypeExpr::Decimal => match value {
            JsonValue::Number(_) => Ok(value.clone()),
            JsonValue::String(s) => s
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(JsonValue::Number)
                .ok_or_else(|| format!("'{}' is not a number", s)),
            _ => Err(mismatch()),
        },
        TypeExpr::Bool => match value {
            JsonValue::Bool(_) => Ok(value.clone()),
            JsonValue::Number(n) if n.as_i64() == Some(1) => Ok(JsonValue::Bool(true)),
            JsonValue::Number(n) if n.as_i64() == Some(0) => Ok(JsonValue::Bool(false)),
            JsonValue::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => Ok(JsonValue::Bool(true)),
                "false" | "0" | "no" => Ok(JsonValue::Bool(false)),
                _ => Err(format!("'{}' is not a boolean", s)),
            },
            _ => Err(mismatch()),
        },
        TypeExpr::Date => match value {
            JsonValue::String(s) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
                .map(|_| JsonValue::String(s.trim().to_string()))
                .map_err(|_| format!("'{}' is not an ISO date (YYYY-MM-DD)", s)),
            _ => Err(mismatch()),
        },
        TypeExpr::DateTime => match value {
            JsonValue::String(s) => {
                let s = s.trim();
                let valid = DateTime::parse_from_rfc3339(s).is_ok()
                    || NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S").is_ok()
                    || NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").is_ok();
                if valid {
                    Ok(JsonValue::String(s.to_string()))
                } else {
                    Err(format!("'{}' is not an ISO datetime", s))
                }
            }
            _ => Err(mismatch()),
        },
        TypeExpr::Dict | TypeExpr::Entity(_) => match value {
            JsonValue::Object(_) => Ok(value.clone()),
            _ => Err(mismatch()),
        },
        TypeExpr::List => match value {
            JsonValue::Array(_) => Ok(value.clone()),
            _ => Err(mismatch()),
        },
        TypeExpr::Array(inner) => match value {
            JsonValue::Array(items) => items
                .iter()
                .enumerate()
                .map(|(i, item)| cast(item, inner).map_err(|e| format!("element {}: {}", i, e)))
                .collect::<Result<Vec<_>, _>>()
                .map(JsonValue::Array),
            _ => Err(mismatch()),
        },
    }
}

fn kind_of(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "a boolean",
        JsonValue::Number(_) => "a number",
        JsonValue::String(_) => "a string",
        JsonValue::Array(_) => "a list",
        JsonValue::Object(_) => "an object",
    }
}
