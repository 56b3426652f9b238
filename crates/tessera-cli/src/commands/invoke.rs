use crate::exit::UsageError;
use anyhow::Result;
use serde_json::{Map, Value};
use std::path::Path;

/// Merge `--args JSON` with repeated `--arg key=value`; later values win
pub fn parse_arguments(args_json: Option<&str>, pairs: &[String]) -> Result<Map<String, Value>> {
    let mut arguments = match args_json {
        None => Map::new(),
        Some(text) => match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(map)) => map,
            Ok(_) => return Err(UsageError("--args must be a JSON object".into()).into()),
            Err(e) => return Err(UsageError(format!("--args is not valid JSON: {}", e)).into()),
        },
    };
    for pair in pairs {
        let Some((key, raw)) = pair.split_once('=') else {
            return Err(UsageError(format!("--arg expects KEY=VALUE, got '{}'", pair)).into());
        };
        let key = key.trim();
        if key.is_empty() {
            return Err(UsageError(format!("--arg has an empty key: '{}'", pair)).into());
        }
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        arguments.insert(key.to_string(), value);
    }
    Ok(arguments)
}

pub async fn execute(
    root: &Path,
    name: &str,
    args_json: Option<&str>,
    pairs: &[String],
) -> Result<()> {
    let arguments = parse_arguments(args_json, pairs)?;
    let client = super::connect(root).await?;
    let result = client.invoke(name, arguments).await?;
    super::print_value(&result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_pairs_override_json() {
        let args = parse_arguments(
            Some(r#"{"limit": 5, "q": "a"}"#),
            &["limit=10".into(), "tag=rust".into(), "flags=[1,2]".into()],
        )
        .unwrap();
        assert_eq!(args["limit"], json!(10));
        assert_eq!(args["q"], json!("a"));
        assert_eq!(args["tag"], json!("rust"));
        assert_eq!(args["flags"], json!([1, 2]));
    }

    #[test]
    fn test_value_may_contain_equals() {
        let args = parse_arguments(None, &["expr=a=b".into()]).unwrap();
        assert_eq!(args["expr"], json!("a=b"));
    }

    #[test]
    fn test_bad_input_is_usage_error() {
        assert!(parse_arguments(Some("[1]"), &[]).is_err());
        assert!(parse_arguments(Some("{"), &[]).is_err());
        let err = parse_arguments(None, &["novalue".into()]).unwrap_err();
        assert!(err.is::<UsageError>());
    }
}
