//! Lua units declared through LDoc-style annotations
//!
//! ```lua
//! --- Reply to a health check
//! -- @function
//! -- @tool description="Liveness probe"
//! -- @param message string? Text to echo back
//! -- @default message "pong"
//! -- @return string
//! function ping(message)
//!     return message
//! end
//!
//! --- A registered account
//! -- @entity
//! -- @field id int
//! -- @field email string
//! User = {}
//! ```
//!
//! Only blocks carrying `@function` or `@entity` make a file a candidate. The
//! whole file is checked with `full_moon`, which also supplies the declared
//! parameter list for each annotated function.

use super::FileOutcome;
use crate::descriptor::{
    ArgumentSpec, Descriptor, Exposure, HandlerRef, ReloadPolicy, Signature, SourceKind,
    SourceLocation, UnitKind,
};
use crate::diagnostics::{codes, Diagnostic};
use crate::naming;
use crate::registry::Domain;
use crate::types::TypeExpr;
use full_moon::ast::{Parameter, Stmt};
use full_moon::node::Node;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value as JsonValue;
use std::collections::HashMap;

static FUNCTION_DECL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[ \t]*(local\s+)?function\s+([A-Za-z_][\w.:]*)\s*\(").expect("function regex")
});

static TABLE_DECL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[ \t]*(?:local\s+)?([A-Za-z_]\w*)\s*=").expect("table regex")
});

static ATTRIBUTE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"\b([A-Za-z_][\w-]*)=(?:"([^"]*)"|(\S+))"#).expect("attribute regex")
});

static HAZARD_CALL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(open|connect|start|run|popen|execute)\s*\(").expect("hazard regex")
});

/// Which kind of unit an annotation block declares
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Marker {
    Function,
    Entity,
}

/// A `---` doc comment, its `@` annotations and the line that follows it
#[derive(Debug)]
struct AnnotatedBlock {
    description: Option<String>,
    annotations: Vec<String>,
    /// 1-based line of the first code line after the comment
    line: usize,
    declaration: Option<String>,
}

impl AnnotatedBlock {
    fn marker(&self) -> Option<(Marker, &str)> {
        self.annotations.iter().find_map(|a| {
            if let Some(rest) = strip_tag(a, "@function") {
                Some((Marker::Function, rest))
            } else {
                strip_tag(a, "@entity").map(|rest| (Marker::Entity, rest))
            }
        })
    }

    fn tagged<'a>(&'a self, tag: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.annotations.iter().filter_map(move |a| strip_tag(a, tag))
    }
}

/// `@tag rest` → `rest`, requiring a word boundary after the tag
fn strip_tag<'a>(annotation: &'a str, tag: &str) -> Option<&'a str> {
    let rest = annotation.strip_prefix(tag)?;
    if rest.is_empty() || rest.starts_with(char::is_whitespace) {
        Some(rest.trim())
    } else {
        None
    }
}

/// `key="value"` or `key=value` inside an annotation
fn attribute(text: &str, key: &str) -> Option<String> {
    ATTRIBUTE_RE
        .captures_iter(text)
        .find(|caps| &caps[1] == key)
        .and_then(|caps| caps.get(2).or_else(|| caps.get(3)))
        .map(|m| m.as_str().to_string())
}

fn find_annotated_blocks(source: &str) -> Vec<AnnotatedBlock> {
    let lines: Vec<&str> = source.lines().collect();
    let mut blocks = Vec::new();

    let mut i = 0;
    while i < lines.len() {
        let trimmed = lines[i].trim();
        if !trimmed.starts_with("---") || trimmed.starts_with("----") {
            i += 1;
            continue;
        }

        let mut description = None;
        let mut annotations = Vec::new();
        let first = trimmed.trim_start_matches("---").trim();
        if first.starts_with('@') {
            annotations.push(first.to_string());
        } else if !first.is_empty() {
            description = Some(first.to_string());
        }
        i += 1;

        while i < lines.len() {
            let line = lines[i].trim();
            if !line.starts_with("--") || line.starts_with("---") {
                break;
            }
            let text = line.trim_start_matches("--").trim();
            if text.starts_with('@') {
                annotations.push(text.to_string());
            } else if !text.is_empty() && description.is_none() {
                description = Some(text.to_string());
            }
            i += 1;
        }

        while i < lines.len() && lines[i].trim().is_empty() {
            i += 1;
        }

        blocks.push(AnnotatedBlock {
            description,
            annotations,
            line: i + 1,
            declaration: lines.get(i).map(|l| l.to_string()),
        });
    }

    blocks
}

/// Cheap pre-check used during classification
pub(crate) fn has_unit_marker(source: &str) -> bool {
    find_annotated_blocks(source)
        .iter()
        .any(|b| b.marker().is_some())
}

/// Top-level global function declarations with their parameter names
/// A top-level global function found by the parser
struct Declared {
    params: Vec<String>,
    /// Declaration text from `function` through `end`
    text: String,
}

struct Declarations {
    functions: HashMap<String, Declared>,
    hazard_lines: Vec<usize>,
}

fn collect_declarations(ast: &full_moon::ast::Ast) -> Declarations {
    let mut functions = HashMap::new();
    let mut hazard_lines = Vec::new();

    for stmt in ast.nodes().stmts() {
        match stmt {
            Stmt::FunctionDeclaration(decl) => {
                let name = decl.name();
                if name.method_name().is_some() || name.names().len() != 1 {
                    continue;
                }
                let Some(token) = name.names().iter().next() else {
                    continue;
                };
                let params = decl
                    .body()
                    .parameters()
                    .iter()
                    .filter_map(|p| match p {
                        Parameter::Name(tok) => Some(tok.token().to_string()),
                        _ => None,
                    })
                    .collect();
                let text = decl.to_string().trim().to_string();
                functions.insert(token.token().to_string(), Declared { params, text });
            }
            Stmt::LocalFunction(_) => {}
            other => {
                if HAZARD_CALL_RE.is_match(&other.to_string()) {
                    let line = other.start_position().map(|p| p.line()).unwrap_or(1);
                    hazard_lines.push(line);
                }
            }
        }
    }

    Declarations {
        functions,
        hazard_lines,
    }
}

/// Parse every annotated unit in one Lua file
pub(crate) fn parse(source: &str, relative: &str) -> FileOutcome {
    let blocks: Vec<AnnotatedBlock> = find_annotated_blocks(source)
        .into_iter()
        .filter(|b| b.marker().is_some())
        .collect();
    if blocks.is_empty() {
        return FileOutcome::default();
    }

    let ast = match full_moon::parse(source) {
        Ok(ast) => ast,
        Err(errors) => {
            let has_entities = blocks
                .iter()
                .any(|b| matches!(b.marker(), Some((Marker::Entity, _))));
            let domain = if has_entities {
                Domain::Entities
            } else {
                Domain::Functions
            };
            let message = errors
                .first()
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unparseable Lua chunk".to_string());
            let diagnostic = Diagnostic::error(SourceLocation::file(relative), codes::SYNTAX, message)
                .with_suggestion("Fix the Lua syntax error; every unit in this file is held back until it parses.")
                .in_domain(domain);
            return FileOutcome::diagnostics(vec![diagnostic]);
        }
    };
    let declarations = collect_declarations(&ast);

    let mut outcome = FileOutcome::default();
    for block in &blocks {
        let result = match block.marker() {
            Some((Marker::Function, attrs)) => function_unit(block, attrs, source, relative, &declarations),
            Some((Marker::Entity, attrs)) => entity_unit(block, attrs, relative),
            None => continue,
        };
        match result {
            Ok(descriptor) => outcome.units.push(descriptor),
            Err(diagnostic) => outcome.diagnostics.push(*diagnostic),
        }
    }

    let reloadable = outcome
        .units
        .iter()
        .any(|u| u.kind == UnitKind::Function && u.reload_policy == ReloadPolicy::Eligible);
    if reloadable {
        if let Some(line) = declarations.hazard_lines.first() {
            outcome.diagnostics.push(
                Diagnostic::warning(
                    SourceLocation::at(relative, *line),
                    codes::RELOAD_HAZARD,
                    "top-level code performs I/O and runs again on every reload",
                )
                .with_suggestion("Move side effects into a function or mark units reload=false.")
                .in_domain(Domain::Functions),
            );
        }
    }

    outcome
}

fn unit_error(relative: &str, line: usize, domain: Domain, unit: Option<&str>, code: &str, message: String) -> Box<Diagnostic> {
    let mut diagnostic = Diagnostic::error(SourceLocation::at(relative, line), code, message).in_domain(domain);
    if let Some(unit) = unit {
        diagnostic = diagnostic.for_unit(unit);
    }
    Box::new(diagnostic)
}

/// `string?` → (`string`, optional)
fn parse_param_type(raw: &str) -> Result<(TypeExpr, bool), crate::types::TypeError> {
    match raw.strip_suffix('?') {
        Some(inner) => TypeExpr::parse(inner).map(|t| (t, true)),
        None => TypeExpr::parse(raw).map(|t| (t, false)),
    }
}

/// `name type rest...`
fn split_typed(text: &str) -> Option<(&str, &str, Option<String>)> {
    let mut parts = text.splitn(3, char::is_whitespace);
    let name = parts.next().filter(|s| !s.is_empty())?;
    let ty = parts.next().map(str::trim).filter(|s| !s.is_empty())?;
    let description = parts
        .next()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    Some((name, ty, description))
}

fn function_unit(
    block: &AnnotatedBlock,
    attrs: &str,
    source: &str,
    relative: &str,
    declarations: &Declarations,
) -> Result<Descriptor, Box<Diagnostic>> {
    let declared_name = attribute(attrs, "name");
    let err = |unit: Option<&str>, code: &str, message: String| {
        unit_error(relative, block.line, Domain::Functions, unit, code, message)
    };

    let decl = block
        .declaration
        .as_deref()
        .and_then(|line| FUNCTION_DECL_RE.captures(line));
    let Some(decl) = decl else {
        return Err(err(
            declared_name.as_deref(),
            codes::MISSING_DECLARATION,
            "@function annotation is not followed by a function declaration".to_string(),
        ));
    };
    let symbol = decl.get(2).map(|m| m.as_str()).unwrap_or_default();
    let name = declared_name.unwrap_or_else(|| symbol.to_string());

    if decl.get(1).is_some() {
        return Err(err(
            Some(&name),
            codes::MISSING_DECLARATION,
            format!("'{}' is local; annotated functions must be global", symbol),
        ));
    }
    let Some(declared) = declarations.functions.get(symbol) else {
        return Err(err(
            Some(&name),
            codes::MISSING_DECLARATION,
            format!("no top-level global function '{}' found", symbol),
        ));
    };

    let params = &declared.params;
    let mut arguments: Vec<ArgumentSpec> = params
        .iter()
        .map(|p| ArgumentSpec::new(p.clone(), TypeExpr::Any))
        .collect();

    for text in block.tagged("@param") {
        let Some((param, raw_type, description)) = split_typed(text) else {
            return Err(err(Some(&name), codes::PARSE_FAILURE, format!("malformed @param '{}'", text)));
        };
        let (arg_type, optional) = parse_param_type(raw_type)
            .map_err(|e| err(Some(&name), codes::INVALID_TYPE, format!("parameter '{}': {}", param, e)))?;
        let Some(spec) = arguments.iter_mut().find(|a| a.name == param) else {
            return Err(err(
                Some(&name),
                codes::SIGNATURE_MISMATCH,
                format!("@param '{}' is not a parameter of {}({})", param, symbol, params.join(", ")),
            ));
        };
        spec.arg_type = arg_type;
        spec.required = !optional;
        spec.description = description;
    }

    for text in block.tagged("@default") {
        let Some((param, value)) = text.split_once(char::is_whitespace) else {
            return Err(err(Some(&name), codes::PARSE_FAILURE, format!("malformed @default '{}'", text)));
        };
        let value: JsonValue = serde_yaml::from_str(value.trim())
            .map_err(|e| err(Some(&name), codes::PARSE_FAILURE, format!("default for '{}': {}", param, e)))?;
        let Some(spec) = arguments.iter_mut().find(|a| a.name == param) else {
            return Err(err(
                Some(&name),
                codes::SIGNATURE_MISMATCH,
                format!("@default names unknown parameter '{}'", param),
            ));
        };
        spec.default = Some(value);
        spec.required = false;
    }

    for text in block.tagged("@context") {
        let Some((param, path)) = text.split_once(char::is_whitespace) else {
            return Err(err(Some(&name), codes::PARSE_FAILURE, format!("malformed @context '{}'", text)));
        };
        let Some(spec) = arguments.iter_mut().find(|a| a.name == param) else {
            return Err(err(
                Some(&name),
                codes::SIGNATURE_MISMATCH,
                format!("@context names unknown parameter '{}'", param),
            ));
        };
        spec.from_context = Some(path.trim().to_string());
        spec.required = false;
    }

    let return_shape = match block.tagged("@return").next() {
        Some(raw) => {
            let raw = raw.split_whitespace().next().unwrap_or(raw);
            TypeExpr::parse(raw).map_err(|e| err(Some(&name), codes::INVALID_TYPE, format!("return type: {}", e)))?
        }
        None => TypeExpr::Any,
    };

    let exposure = match block.tagged("@tool").next() {
        Some(tool) => Exposure {
            externally_exposed: true,
            description: attribute(tool, "description")
                .or_else(|| attribute(tool, "desc"))
                .or_else(|| block.description.clone()),
        },
        None => Exposure::default(),
    };

    let reload_policy = match attribute(attrs, "reload").as_deref() {
        Some("false") => ReloadPolicy::Pinned,
        _ => ReloadPolicy::Eligible,
    };

    Ok(Descriptor {
        canonical_id: naming::canonical_id(UnitKind::Function, relative, symbol),
        name,
        kind: UnitKind::Function,
        source_kind: SourceKind::NativeCode,
        signature: Signature {
            arguments,
            return_shape,
        },
        exposure,
        reload_policy,
        source: SourceLocation::at(relative, block.line),
        handler: HandlerRef {
            symbol: symbol.to_string(),
            connection: None,
        },
        description: block.description.clone(),
        body: source.to_string(),
        unit_source: Some(declared.text.clone()),
        messages: Vec::new(),
    })
}

fn entity_unit(block: &AnnotatedBlock, attrs: &str, relative: &str) -> Result<Descriptor, Box<Diagnostic>> {
    let declared_name = attribute(attrs, "name");
    let err = |unit: Option<&str>, code: &str, message: String| {
        unit_error(relative, block.line, Domain::Entities, unit, code, message)
    };

    let variable = block
        .declaration
        .as_deref()
        .and_then(|line| TABLE_DECL_RE.captures(line))
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string());
    let Some(variable) = variable else {
        return Err(err(
            declared_name.as_deref(),
            codes::MISSING_DECLARATION,
            "@entity annotation is not followed by a table assignment".to_string(),
        ));
    };
    let name = declared_name.unwrap_or_else(|| variable.clone());

    let mut fields: Vec<ArgumentSpec> = Vec::new();
    for text in block.tagged("@field") {
        let Some((field, raw_type, description)) = split_typed(text) else {
            return Err(err(Some(&name), codes::PARSE_FAILURE, format!("malformed @field '{}'", text)));
        };
        let (field_type, optional) = parse_param_type(raw_type)
            .map_err(|e| err(Some(&name), codes::INVALID_TYPE, format!("field '{}': {}", field, e)))?;
        if fields.iter().any(|f| f.name == field) {
            return Err(err(Some(&name), codes::SIGNATURE_MISMATCH, format!("field '{}' declared twice", field)));
        }
        let mut spec = ArgumentSpec::new(field, field_type);
        spec.required = !optional;
        spec.description = description;
        fields.push(spec);
    }

    Ok(Descriptor {
        canonical_id: naming::canonical_id(UnitKind::Entity, relative, &variable),
        name,
        kind: UnitKind::Entity,
        source_kind: SourceKind::Entity,
        signature: Signature {
            arguments: fields,
            return_shape: TypeExpr::Dict,
        },
        exposure: Exposure::default(),
        reload_policy: ReloadPolicy::Eligible,
        source: SourceLocation::at(relative, block.line),
        handler: HandlerRef {
            symbol: variable,
            connection: None,
        },
        description: block.description.clone(),
        body: String::new(),
        unit_source: None,
        messages: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const PING: &str = r#"--- Reply to a health check
-- @function
-- @tool description="Liveness probe"
-- @param message string? Text to echo back
-- @default message "pong"
-- @return string
function ping(message)
    return message
end
"#;

    #[test]
    fn test_unannotated_file_is_not_a_candidate() {
        let src = "local M = {}\nfunction M.helper() end\nreturn M\n";
        assert!(!has_unit_marker(src));
        let outcome = parse(src, "lib/helpers.lua");
        assert!(outcome.units.is_empty());
        assert!(outcome.diagnostics.is_empty());
    }

    #[test]
    fn test_function_unit_from_annotations() {
        let outcome = parse(PING, "ping.lua");
        assert!(outcome.diagnostics.is_empty(), "{:?}", outcome.diagnostics);
        let unit = &outcome.units[0];
        assert_eq!(unit.name, "ping");
        assert_eq!(unit.handler.symbol, "ping");
        assert_eq!(unit.source.line, Some(7));
        assert_eq!(unit.description.as_deref(), Some("Reply to a health check"));
        assert_eq!(unit.exposure.description.as_deref(), Some("Liveness probe"));
        assert_eq!(unit.signature.return_shape, TypeExpr::String);

        let message = unit.signature.argument("message").unwrap();
        assert_eq!(message.arg_type, TypeExpr::String);
        assert!(!message.required);
        assert_eq!(message.default, Some(serde_json::json!("pong")));
    }

    #[test]
    fn test_unannotated_parameters_are_required_any() {
        let src = "--- @function\nfunction add(a, b)\n  return a + b\nend\n";
        let outcome = parse(src, "add.lua");
        let unit = &outcome.units[0];
        assert_eq!(unit.signature.arguments.len(), 2);
        assert!(unit.signature.arguments.iter().all(|a| a.required && a.arg_type == TypeExpr::Any));
        assert!(!unit.is_exposed());
    }

    #[test]
    fn test_syntax_error_is_one_file_level_diagnostic() {
        let src = "--- @function\nfunction broken(\n  return 1\nend\n\n--- @function\nfunction fine() end\n";
        let outcome = parse(src, "broken.lua");
        assert!(outcome.units.is_empty());
        assert_eq!(outcome.diagnostics.len(), 1);
        let diag = &outcome.diagnostics[0];
        assert_eq!(diag.code, codes::SYNTAX);
        assert!(diag.unit.is_none());
        assert_eq!(diag.domain, Some(Domain::Functions));
    }

    #[test]
    fn test_param_not_in_declaration_is_a_signature_mismatch() {
        let src = "--- @function\n-- @param count int\nfunction ping() return 'pong' end\n\n--- @function\nfunction pong() return 'ping' end\n";
        let outcome = parse(src, "pp.lua");
        assert_eq!(outcome.units.len(), 1);
        assert_eq!(outcome.units[0].name, "pong");
        assert_eq!(outcome.diagnostics[0].code, codes::SIGNATURE_MISMATCH);
        assert_eq!(outcome.diagnostics[0].unit.as_deref(), Some("ping"));
    }

    #[test]
    fn test_unknown_type_only_affects_its_unit() {
        let src = "--- @function\n-- @param n integr\nfunction a(n) end\n\n--- @function\nfunction b() end\n";
        let outcome = parse(src, "ab.lua");
        assert_eq!(outcome.units.len(), 1);
        assert_eq!(outcome.diagnostics[0].code, codes::INVALID_TYPE);
        assert_eq!(outcome.diagnostics[0].unit.as_deref(), Some("a"));
    }

    #[test]
    fn test_each_unit_keeps_its_own_declaration() {
        let src = "--- @function\nfunction a() return 1 end\n\n--- @function\nfunction b() return 2 end\n";
        let outcome = parse(src, "ab.lua");
        let a = outcome.units.iter().find(|u| u.name == "a").unwrap();
        let b = outcome.units.iter().find(|u| u.name == "b").unwrap();
        assert_eq!(a.body, src);
        assert_eq!(a.body, b.body);
        let own = a.unit_source.as_deref().unwrap();
        assert!(own.ends_with("function a() return 1 end"), "{}", own);
        assert!(!own.contains("return 2"));
    }

    #[test]
    fn test_attributes_quoted_or_bare() {
        let text = r#"name="find user" reload=false description="see name=x""#;
        assert_eq!(attribute(text, "name").as_deref(), Some("find user"));
        assert_eq!(attribute(text, "reload").as_deref(), Some("false"));
        assert_eq!(attribute(text, "description").as_deref(), Some("see name=x"));
        assert_eq!(attribute(text, "desc"), None);
        assert_eq!(attribute("", "name"), None);
    }

    #[test]
    fn test_local_function_cannot_be_a_unit() {
        let src = "--- @function\nlocal function hidden() end\n";
        let outcome = parse(src, "hidden.lua");
        assert!(outcome.units.is_empty());
        assert_eq!(outcome.diagnostics[0].code, codes::MISSING_DECLARATION);
    }

    #[test]
    fn test_entity_fields_and_context_arguments() {
        let src = r#"--- A registered account
-- @entity
-- @field id int
-- @field email string
-- @field nickname string? Display name
User = {}

--- @function name="find-user" reload=false
-- @param id int
-- @context tenant config.tenant
-- @return User
function find_user(id, tenant)
  return { id = id }
end
"#;
        let outcome = parse(src, "users.lua");
        assert!(outcome.diagnostics.is_empty(), "{:?}", outcome.diagnostics);
        let entity = outcome.units.iter().find(|u| u.kind == UnitKind::Entity).unwrap();
        assert_eq!(entity.name, "User");
        assert_eq!(entity.signature.arguments.len(), 3);
        assert!(!entity.signature.argument("nickname").unwrap().required);

        let function = outcome.units.iter().find(|u| u.kind == UnitKind::Function).unwrap();
        assert_eq!(function.name, "find-user");
        assert_eq!(function.handler.symbol, "find_user");
        assert_eq!(function.reload_policy, ReloadPolicy::Pinned);
        assert_eq!(function.entity_references(), vec!["User"]);
        let tenant = function.signature.argument("tenant").unwrap();
        assert_eq!(tenant.from_context.as_deref(), Some("config.tenant"));
        assert!(!tenant.is_caller_visible());
    }

    #[test]
    fn test_top_level_io_warns_about_reload() {
        let src = "local conn = db.connect('main')\n\n--- @function\nfunction q() return conn end\n";
        let outcome = parse(src, "q.lua");
        assert_eq!(outcome.units.len(), 1);
        assert_eq!(outcome.diagnostics.len(), 1);
        assert_eq!(outcome.diagnostics[0].code, codes::RELOAD_HAZARD);
        assert!(!outcome.diagnostics[0].is_error());
    }
}
