//! Template runner: `{{ name }}` / `{{ name.field }}` substitution
//!
//! Placeholders resolve against the call's arguments; an `args.` prefix is
//! accepted as well. Unresolved placeholders render as empty text. When the
//! unit declares `messages`, each message body is rendered and the result is
//! a list of `{role, content}` objects instead of a single string. The
//! rendered value must fit the declared return shape.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::{json, Map, Value as JsonValue};
use tessera_core::{RunRequest, Runner, RunnerFailure, SourceKind};

use crate::shape::shape_value;

static PLACEHOLDER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z0-9_]+)*)\s*\}\}")
        .expect("placeholder regex")
});

#[derive(Debug, Default, Clone, Copy)]
pub struct TemplateRunner;

impl TemplateRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Runner for TemplateRunner {
    fn source_kind(&self) -> SourceKind {
        SourceKind::Template
    }

    async fn run(&self, request: RunRequest) -> Result<JsonValue, RunnerFailure> {
        let descriptor = &request.descriptor;
        let rendered = if descriptor.messages.is_empty() {
            JsonValue::String(render(&descriptor.body, &request.arguments))
        } else {
            JsonValue::Array(
                descriptor
                    .messages
                    .iter()
                    .map(|m| json!({ "role": m.role, "content": render(&m.content, &request.arguments) }))
                    .collect(),
            )
        };
        shape_value(rendered, &descriptor.signature.return_shape)
    }
}

/// Substitute every placeholder in `template`
pub fn render(template: &str, arguments: &Map<String, JsonValue>) -> String {
    PLACEHOLDER_RE
        .replace_all(template, |caps: &Captures| {
            let path = &caps[1];
            let path = path.strip_prefix("args.").unwrap_or(path);
            lookup(arguments, path).map(display).unwrap_or_default()
        })
        .into_owned()
}

fn lookup<'a>(arguments: &'a Map<String, JsonValue>, path: &str) -> Option<&'a JsonValue> {
    let mut parts = path.split('.');
    let first = arguments.get(parts.next()?)?;
    parts.try_fold(first, |value, key| match value {
        JsonValue::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => value.get(key),
    })
}

fn display(value: &JsonValue) -> String {
    match value {
        JsonValue::Null => String::new(),
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}
