//! Fitting runner output to a unit's declared return shape

use serde_json::{Map, Value as JsonValue};
use tessera_core::arguments::cast;
use tessera_core::{RunnerFailure, TypeExpr};

/// Shape `rows` (one JSON object per row) as `shape` describes:
///
/// - `any`, `list`, `dict[]`, `Entity[]`: every row as an object
/// - `dict`, `Entity`: the single row, or null when there is none
/// - scalars: the single column of the single row, cast to the type
/// - `int[]` and other scalar lists: the single column of every row
pub fn shape_rows(rows: Vec<Map<String, JsonValue>>, shape: &TypeExpr) -> Result<JsonValue, RunnerFailure> {
    match shape {
        TypeExpr::Void => Ok(JsonValue::Null),
        TypeExpr::Any | TypeExpr::List => Ok(objects(rows)),
        TypeExpr::Array(inner) if is_record(inner) => Ok(objects(rows)),
        TypeExpr::Array(inner) => rows
            .into_iter()
            .map(|row| scalar(row, inner))
            .collect::<Result<Vec<_>, _>>()
            .map(JsonValue::Array),
        record if is_record(record) => Ok(single(rows, shape)?
            .map(JsonValue::Object)
            .unwrap_or(JsonValue::Null)),
        scalar_type => match single(rows, shape)? {
            Some(row) => scalar(row, scalar_type),
            None => Ok(JsonValue::Null),
        },
    }
}

/// Check a value returned by a script or template against `shape`
///
/// `void` discards the value and a null return stays null; anything else
/// is cast the way arguments are, and a mismatch fails the call.
pub fn shape_value(value: JsonValue, shape: &TypeExpr) -> Result<JsonValue, RunnerFailure> {
    match (shape, &value) {
        (TypeExpr::Void, _) | (_, JsonValue::Null) => Ok(JsonValue::Null),
        (TypeExpr::Any, _) => Ok(value),
        _ => cast(&value, shape).map_err(|reason| {
            RunnerFailure::InvalidReturn(format!("expected {}: {}", shape, reason))
        }),
    }
}

fn is_record(ty: &TypeExpr) -> bool {
    matches!(ty, TypeExpr::Dict | TypeExpr::Entity(_) | TypeExpr::Any | TypeExpr::List)
}

fn objects(rows: Vec<Map<String, JsonValue>>) -> JsonValue {
    JsonValue::Array(rows.into_iter().map(JsonValue::Object).collect())
}

fn single(
    rows: Vec<Map<String, JsonValue>>,
    shape: &TypeExpr,
) -> Result<Option<Map<String, JsonValue>>, RunnerFailure> {
    if rows.len() > 1 {
        return Err(RunnerFailure::InvalidReturn(format!(
            "return shape '{}' expects at most one row, got {}",
            shape,
            rows.len()
        )));
    }
    Ok(rows.into_iter().next())
}

fn scalar(row: Map<String, JsonValue>, ty: &TypeExpr) -> Result<JsonValue, RunnerFailure> {
    if row.len() != 1 {
        return Err(RunnerFailure::InvalidReturn(format!(
            "return shape '{}' expects one column, got {}",
            ty,
            row.len()
        )));
    }
    let value = row.into_iter().next().map(|(_, v)| v).unwrap_or(JsonValue::Null);
    if value.is_null() {
        return Ok(value);
    }
    cast(&value, ty).map_err(|reason| RunnerFailure::InvalidReturn(format!("{} ({})", reason, ty)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rows(value: JsonValue) -> Vec<Map<String, JsonValue>> {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_lists_keep_every_row() {
        let data = rows(json!([{"id": 1}, {"id": 2}]));
        assert_eq!(
            shape_rows(data.clone(), &TypeExpr::parse("User[]").unwrap()).unwrap(),
            json!([{"id": 1}, {"id": 2}])
        );
        assert_eq!(
            shape_rows(data, &TypeExpr::parse("int[]").unwrap()).unwrap(),
            json!([1, 2])
        );
    }

    #[test]
    fn test_single_record_or_null() {
        assert_eq!(
            shape_rows(rows(json!([{"id": 1}])), &TypeExpr::Dict).unwrap(),
            json!({"id": 1})
        );
        assert_eq!(shape_rows(Vec::new(), &TypeExpr::Entity("User".into())).unwrap(), JsonValue::Null);
        assert!(matches!(
            shape_rows(rows(json!([{"id": 1}, {"id": 2}])), &TypeExpr::Dict),
            Err(RunnerFailure::InvalidReturn(_))
        ));
    }

    #[test]
    fn test_values_follow_declared_shape() {
        assert_eq!(shape_value(json!("7"), &TypeExpr::Int).unwrap(), json!(7));
        assert_eq!(shape_value(json!({"a": 1}), &TypeExpr::Void).unwrap(), JsonValue::Null);
        assert_eq!(shape_value(JsonValue::Null, &TypeExpr::String).unwrap(), JsonValue::Null);
        assert!(matches!(
            shape_value(json!("not a number"), &TypeExpr::Int),
            Err(RunnerFailure::InvalidReturn(_))
        ));
        assert!(matches!(
            shape_value(json!([1, "x"]), &TypeExpr::parse("int[]").unwrap()),
            Err(RunnerFailure::InvalidReturn(_))
        ));
    }

    #[test]
    fn test_scalars_are_cast() {
        assert_eq!(
            shape_rows(rows(json!([{"n": "42"}])), &TypeExpr::Int).unwrap(),
            json!(42)
        );
        assert!(matches!(
            shape_rows(rows(json!([{"a": 1, "b": 2}])), &TypeExpr::Int),
            Err(RunnerFailure::InvalidReturn(_))
        ));
    }
}
