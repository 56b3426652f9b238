//! Query (`.sql`) and template (`.md`) units declared through YAML frontmatter
//!
//! ```sql
//! /*
//! ---
//! name: active_users
//! type: sql_function
//! arguments:
//!   inline:
//!     since: date
//! return_shape: User[]
//! ---
//! */
//! SELECT id, email FROM users WHERE created_at >= :since
//! ```

use super::FileOutcome;
use crate::descriptor::{
    ArgumentSpec, Descriptor, Exposure, HandlerRef, ReloadPolicy, Signature, SourceKind,
    SourceLocation, TemplateMessage, UnitKind,
};
use crate::diagnostics::{codes, Diagnostic};
use crate::naming;
use crate::registry::Domain;
use crate::types::TypeExpr;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value as JsonValue;

static SQL_BLOCK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^/\*[ \t]*\r?\n---[ \t]*\r?\n([\s\S]*?)\r?\n---[ \t]*\r?\n?[ \t]*\*/")
        .expect("sql frontmatter regex")
});

static MD_FENCE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^---[ \t]*\r?$").expect("markdown fence regex"));

static TYPE_LINE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^type[ \t]*:").expect("type marker regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Style {
    /// YAML wrapped in a leading `/* --- ... --- */` comment
    SqlComment,
    /// YAML between leading `---` fences
    Markdown,
}

impl Style {
    fn expected_type(&self) -> &'static str {
        match self {
            Style::SqlComment => "sql_function",
            Style::Markdown => "template_function",
        }
    }

    fn source_kind(&self) -> SourceKind {
        match self {
            Style::SqlComment => SourceKind::Query,
            Style::Markdown => SourceKind::Template,
        }
    }
}

/// Split leading frontmatter into `(yaml, body)`
pub(crate) fn split(content: &str, style: Style) -> Option<(String, String)> {
    let content = content.trim_start_matches('\u{feff}').trim();
    match style {
        Style::SqlComment => {
            let caps = SQL_BLOCK_RE.captures(content)?;
            let yaml = caps.get(1)?.as_str().to_string();
            let body = content[caps.get(0)?.end()..].trim().to_string();
            Some((yaml, body))
        }
        Style::Markdown => {
            if !content.starts_with("---") {
                return None;
            }
            let mut fences = MD_FENCE_RE.find_iter(content);
            let open = fences.next()?;
            if open.start() != 0 {
                return None;
            }
            let close = fences.next()?;
            let yaml = content[open.end()..close.start()].trim().to_string();
            let body = content[close.end()..].trim().to_string();
            Some((yaml, body))
        }
    }
}

/// A file is a candidate only when its frontmatter carries a `type:` line
pub(crate) fn has_type_marker(content: &str, style: Style) -> bool {
    split(content, style).is_some_and(|(yaml, _)| TYPE_LINE_RE.is_match(&yaml))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Meta {
    name: Option<String>,
    #[serde(rename = "type")]
    unit_type: String,
    description: Option<String>,
    connection: Option<String>,
    arguments: Option<ArgumentsBlock>,
    return_shape: Option<String>,
    mcp: Option<McpBlock>,
    reload: Option<bool>,
    template_engine: Option<String>,
    messages: Option<Vec<TemplateMessage>>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ArgumentsBlock {
    #[serde(default)]
    inline: serde_yaml::Mapping,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct McpBlock {
    #[serde(rename = "type")]
    kind: String,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ComplexArgument {
    #[serde(rename = "type", default = "default_arg_type")]
    arg_type: String,
    default: Option<serde_yaml::Value>,
    from_context: Option<String>,
    description: Option<String>,
}

fn default_arg_type() -> String {
    "string".to_string()
}

/// Parse one frontmatter file into its single unit
pub(crate) fn parse(content: &str, relative: &str, style: Style) -> FileOutcome {
    let location = SourceLocation::at(relative, 1);
    let parse_failure = |message: String| FileOutcome {
        units: Vec::new(),
        diagnostics: vec![Diagnostic::error(location.clone(), codes::PARSE_FAILURE, message)
            .with_suggestion("Check YAML syntax and required fields.")
            .in_domain(Domain::Functions)],
    };

    let Some((yaml, body)) = split(content, style) else {
        return parse_failure("frontmatter block is not terminated".to_string());
    };

    let meta: Meta = match serde_yaml::from_str(&yaml) {
        Ok(meta) => meta,
        Err(e) => return parse_failure(format!("invalid frontmatter: {}", e)),
    };

    if meta.unit_type != style.expected_type() {
        return parse_failure(format!(
            "expected type '{}', found '{}'",
            style.expected_type(),
            meta.unit_type
        ));
    }

    let Some(name) = meta.name.clone() else {
        return parse_failure("missing required field 'name'".to_string());
    };

    let mut diagnostics = Vec::new();
    let unit_error = |code: &str, message: String| {
        Diagnostic::error(location.clone(), code, message)
            .in_domain(Domain::Functions)
            .for_unit(name.clone())
    };

    let return_shape = match (&meta.return_shape, style) {
        (Some(raw), _) => TypeExpr::parse(raw),
        (None, Style::Markdown) if meta.messages.as_ref().is_some_and(|m| !m.is_empty()) => {
            Ok(TypeExpr::Array(Box::new(TypeExpr::Dict)))
        }
        (None, Style::Markdown) => Ok(TypeExpr::String),
        (None, Style::SqlComment) => {
            diagnostics.push(unit_error(
                codes::PARSE_FAILURE,
                "missing required field 'return_shape'".to_string(),
            ));
            return FileOutcome::diagnostics(diagnostics);
        }
    };
    let return_shape = match return_shape {
        Ok(ty) => ty,
        Err(e) => {
            diagnostics.push(unit_error(codes::INVALID_TYPE, e.to_string()));
            return FileOutcome::diagnostics(diagnostics);
        }
    };

    let arguments = match meta.arguments.as_ref().map(|a| inline_arguments(&a.inline)) {
        None => Vec::new(),
        Some(Ok(args)) => args,
        Some(Err((code, message))) => {
            diagnostics.push(unit_error(code, message));
            return FileOutcome::diagnostics(diagnostics);
        }
    };

    let exposure = match &meta.mcp {
        Some(mcp) if mcp.kind != "tool" => {
            diagnostics.push(unit_error(
                codes::PARSE_FAILURE,
                format!("unsupported mcp type '{}'", mcp.kind),
            ));
            return FileOutcome::diagnostics(diagnostics);
        }
        Some(mcp) => Exposure {
            externally_exposed: true,
            description: mcp.description.clone().or_else(|| meta.description.clone()),
        },
        None => Exposure::default(),
    };

    let messages = meta.messages.clone().unwrap_or_default();
    if style == Style::Markdown && body.is_empty() && messages.is_empty() {
        diagnostics.push(unit_error(
            codes::PARSE_FAILURE,
            "template has neither a body nor messages".to_string(),
        ));
        return FileOutcome::diagnostics(diagnostics);
    }
    if let Some(engine) = &meta.template_engine {
        if engine != "mustache" && engine != "jinja2" {
            diagnostics.push(unit_error(
                codes::PARSE_FAILURE,
                format!("unsupported template engine '{}'", engine),
            ));
            return FileOutcome::diagnostics(diagnostics);
        }
    }

    let connection = match style {
        Style::SqlComment => Some(meta.connection.clone().unwrap_or_else(|| "default".into())),
        Style::Markdown => None,
    };

    let descriptor = Descriptor {
        canonical_id: naming::canonical_id(UnitKind::Function, relative, &name),
        handler: HandlerRef {
            symbol: name.clone(),
            connection,
        },
        name,
        kind: UnitKind::Function,
        source_kind: style.source_kind(),
        signature: Signature {
            arguments,
            return_shape,
        },
        exposure,
        reload_policy: match meta.reload {
            Some(false) => ReloadPolicy::Pinned,
            _ => ReloadPolicy::Eligible,
        },
        source: location,
        description: meta.description,
        body,
        unit_source: None,
        messages,
    };

    FileOutcome {
        units: vec![descriptor],
        diagnostics,
    }
}

/// `name: type` shorthand or `name: {type, default, from_context}`
fn inline_arguments(
    inline: &serde_yaml::Mapping,
) -> Result<Vec<ArgumentSpec>, (&'static str, String)> {
    let mut specs = Vec::with_capacity(inline.len());
    for (key, value) in inline {
        let Some(name) = key.as_str() else {
            return Err((codes::PARSE_FAILURE, "argument names must be strings".into()));
        };

        let spec = match value {
            serde_yaml::Value::String(raw) => {
                let arg_type = TypeExpr::parse(raw).map_err(|e| {
                    (
                        codes::INVALID_TYPE,
                        format!("argument '{}': {}", name, e),
                    )
                })?;
                ArgumentSpec::new(name, arg_type)
            }
            serde_yaml::Value::Mapping(_) => {
                let complex: ComplexArgument = serde_yaml::from_value(value.clone())
                    .map_err(|e| (codes::PARSE_FAILURE, format!("argument '{}': {}", name, e)))?;
                let arg_type = TypeExpr::parse(&complex.arg_type).map_err(|e| {
                    (
                        codes::INVALID_TYPE,
                        format!("argument '{}': {}", name, e),
                    )
                })?;
                let default = complex
                    .default
                    .map(serde_json::to_value)
                    .transpose()
                    .map_err(|e| (codes::PARSE_FAILURE, format!("argument '{}': {}", name, e)))?
                    .filter(|v: &JsonValue| !v.is_null());
                ArgumentSpec {
                    name: name.to_string(),
                    arg_type,
                    required: default.is_none() && complex.from_context.is_none(),
                    default,
                    from_context: complex.from_context,
                    description: complex.description,
                }
            }
            _ => {
                return Err((
                    codes::PARSE_FAILURE,
                    format!("argument '{}' must be a type name or a mapping", name),
                ))
            }
        };
        specs.push(spec);
    }
    Ok(specs)
}

#[cfg(test)]
mod tests {
    use super::*;

    const QUERY: &str = "/*\n---\nname: active_users\ntype: sql_function\narguments:\n  inline:\n    since: date\n    limit:\n      type: int\n      default: 10\n    tenant:\n      type: string\n      from_context: config.tenant\nreturn_shape: dict[]\nmcp:\n  type: tool\n---\n*/\nSELECT * FROM users WHERE created_at >= :since LIMIT :limit\n";

    #[test]
    fn test_sql_frontmatter_split() {
        let (yaml, body) = split(QUERY, Style::SqlComment).unwrap();
        assert!(yaml.starts_with("name: active_users"));
        assert!(body.starts_with("SELECT"));
        assert!(has_type_marker(QUERY, Style::SqlComment));
    }

    #[test]
    fn test_plain_sql_is_not_a_candidate() {
        assert!(!has_type_marker("SELECT 1;", Style::SqlComment));
        assert!(!has_type_marker("/* just a comment */\nSELECT 1;", Style::SqlComment));
    }

    #[test]
    fn test_markdown_without_type_line_is_not_a_candidate() {
        let readme = "---\ntitle: Notes\n---\n# Hello\n";
        assert!(!has_type_marker(readme, Style::Markdown));
        assert!(!has_type_marker("# Just markdown\n", Style::Markdown));
    }

    #[test]
    fn test_query_unit_arguments_in_declaration_order() {
        let outcome = parse(QUERY, "queries/users.sql", Style::SqlComment);
        assert!(outcome.diagnostics.is_empty(), "{:?}", outcome.diagnostics);
        let unit = &outcome.units[0];
        assert_eq!(unit.name, "active_users");
        assert_eq!(unit.source_kind, SourceKind::Query);
        assert_eq!(unit.handler.connection.as_deref(), Some("default"));
        assert!(unit.exposure.externally_exposed);

        let names: Vec<&str> = unit
            .signature
            .arguments
            .iter()
            .map(|a| a.name.as_str())
            .collect();
        assert_eq!(names, vec!["since", "limit", "tenant"]);
        let limit = unit.signature.argument("limit").unwrap();
        assert!(!limit.required);
        assert_eq!(limit.default, Some(serde_json::json!(10)));
        let tenant = unit.signature.argument("tenant").unwrap();
        assert!(!tenant.required);
        assert_eq!(tenant.from_context.as_deref(), Some("config.tenant"));
        assert_eq!(unit.canonical_id, "function:queries/users.sql:active_users");
    }

    #[test]
    fn test_template_defaults_to_string_return() {
        let md = "---\nname: welcome\ntype: template_function\narguments:\n  inline:\n    user: string\n---\nHello {{ user }}!\n";
        let outcome = parse(md, "welcome.md", Style::Markdown);
        assert!(outcome.diagnostics.is_empty());
        let unit = &outcome.units[0];
        assert_eq!(unit.signature.return_shape, TypeExpr::String);
        assert_eq!(unit.body, "Hello {{ user }}!");
        assert_eq!(unit.handler.connection, None);
    }

    #[test]
    fn test_message_template_defaults_to_records() {
        let md = "---\nname: explain\ntype: template_function\nmessages:\n  - role: user\n    content: Explain {{ topic }}\n---\n";
        let outcome = parse(md, "explain.md", Style::Markdown);
        assert!(outcome.diagnostics.is_empty(), "{:?}", outcome.diagnostics);
        assert_eq!(
            outcome.units[0].signature.return_shape,
            TypeExpr::Array(Box::new(TypeExpr::Dict))
        );
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        let md = "---\nname: welcome\ntype: template_function\ncolour: blue\n---\nHi\n";
        let outcome = parse(md, "welcome.md", Style::Markdown);
        assert!(outcome.units.is_empty());
        assert_eq!(outcome.diagnostics.len(), 1);
        assert_eq!(outcome.diagnostics[0].code, codes::PARSE_FAILURE);
        assert!(outcome.diagnostics[0].unit.is_none());
    }

    #[test]
    fn test_bad_argument_type_is_scoped_to_unit() {
        let md = "---\nname: welcome\ntype: template_function\narguments:\n  inline:\n    user: strnig\n---\nHi\n";
        let outcome = parse(md, "welcome.md", Style::Markdown);
        assert!(outcome.units.is_empty());
        assert_eq!(outcome.diagnostics[0].code, codes::INVALID_TYPE);
        assert_eq!(outcome.diagnostics[0].unit.as_deref(), Some("welcome"));
    }

    #[test]
    fn test_wrong_type_for_extension() {
        let sql = "/*\n---\nname: q\ntype: template_function\nreturn_shape: void\n---\n*/\nDELETE FROM t\n";
        let outcome = parse(sql, "q.sql", Style::SqlComment);
        assert!(outcome.units.is_empty());
        assert!(outcome.diagnostics[0].message.contains("sql_function"));
    }
}
