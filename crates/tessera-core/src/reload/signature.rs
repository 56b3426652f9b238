//! Classification of exposed-tool changes between two versions

use crate::descriptor::Descriptor;
use crate::types::TypeExpr;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChangeClass {
    Added,
    Removed,
    /// Body, description or defaults changed; callers see the same input schema
    LogicOnly,
    /// Argument names, types or required-ness changed
    SchemaShapeChange,
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolChange {
    pub name: String,
    pub class: ChangeClass,
}

/// Caller-visible argument shape, without defaults
fn shape(descriptor: &Descriptor) -> Vec<(&str, &TypeExpr, bool)> {
    descriptor
        .signature
        .arguments
        .iter()
        .filter(|a| a.is_caller_visible())
        .map(|a| (a.name.as_str(), &a.arg_type, a.required))
        .collect()
}

pub fn classify(previous: Option<&Descriptor>, next: Option<&Descriptor>) -> Option<ChangeClass> {
    match (previous, next) {
        (None, None) => None,
        (None, Some(_)) => Some(ChangeClass::Added),
        (Some(_), None) => Some(ChangeClass::Removed),
        (Some(before), Some(after)) if before.same_unit(after) => Some(ChangeClass::Unchanged),
        (Some(before), Some(after)) if shape(before) == shape(after) => Some(ChangeClass::LogicOnly),
        (Some(_), Some(_)) => Some(ChangeClass::SchemaShapeChange),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{fixtures, ArgumentSpec};

    fn tool() -> Descriptor {
        let mut d = fixtures::function("search", "search.lua");
        d.exposure.externally_exposed = true;
        let mut limit = ArgumentSpec::new("limit", TypeExpr::Int);
        limit.required = false;
        limit.default = Some(serde_json::json!(10));
        d.signature.arguments = vec![ArgumentSpec::new("query", TypeExpr::String), limit];
        d
    }

    #[test]
    fn test_default_only_change_is_logic_only() {
        let before = tool();
        let mut after = tool();
        after.signature.arguments[1].default = Some(serde_json::json!(25));
        assert_eq!(classify(Some(&before), Some(&after)), Some(ChangeClass::LogicOnly));
    }

    #[test]
    fn test_body_change_is_logic_only() {
        let before = tool();
        let mut after = tool();
        after.body.push_str("\n-- tweak");
        assert_eq!(classify(Some(&before), Some(&after)), Some(ChangeClass::LogicOnly));
    }

    #[test]
    fn test_sibling_edit_in_shared_file_is_unchanged() {
        let mut before = tool();
        before.unit_source = Some("function search(query, limit) end".into());
        let mut after = before.clone();
        after.body.push_str("\nfunction other() return 2 end");
        assert_eq!(classify(Some(&before), Some(&after)), Some(ChangeClass::Unchanged));

        after.unit_source = Some("function search(query, limit) return {} end".into());
        assert_eq!(classify(Some(&before), Some(&after)), Some(ChangeClass::LogicOnly));
    }

    #[test]
    fn test_new_required_argument_changes_shape() {
        let before = tool();
        let mut after = tool();
        after
            .signature
            .arguments
            .push(ArgumentSpec::new("scope", TypeExpr::String));
        assert_eq!(
            classify(Some(&before), Some(&after)),
            Some(ChangeClass::SchemaShapeChange)
        );
    }

    #[test]
    fn test_required_flip_changes_shape() {
        let before = tool();
        let mut after = tool();
        after.signature.arguments[0].required = false;
        assert_eq!(
            classify(Some(&before), Some(&after)),
            Some(ChangeClass::SchemaShapeChange)
        );
    }

    #[test]
    fn test_presence_changes() {
        let t = tool();
        assert_eq!(classify(None, Some(&t)), Some(ChangeClass::Added));
        assert_eq!(classify(Some(&t), None), Some(ChangeClass::Removed));
        assert_eq!(classify(Some(&t), Some(&t)), Some(ChangeClass::Unchanged));
        assert_eq!(classify(None, None), None);
    }
}
