//! Coercion of request parameters to the types a notebook declares.
//!
//! API clients frequently send every value as a string. Values are converted
//! before hashing so that `"42"` and `42` for an `int` parameter produce the
//! same execution fingerprint. Values that cannot be converted are kept as
//! sent; unknown parameters and undeclared types pass through untouched.

use serde_json::{Number, Value};
use tracing::{debug, warn};

use super::NotebookMetadata;
use crate::execution::Parameters;

/// Coerce every parameter to its declared type.
pub fn coerce_parameters(parameters: Parameters, metadata: &NotebookMetadata) -> Parameters {
    if parameters.is_empty() {
        return parameters;
    }
    if metadata.parameters.is_empty() {
        warn!("No parameter definitions found in notebook metadata");
        return parameters;
    }

    parameters
        .into_iter()
        .map(|(name, value)| {
            let coerced = match metadata.parameter_type(&name) {
                Some(type_name) => coerce_value(value, type_name),
                None => {
                    debug!(parameter = %name, "No declared type, leaving as-is");
                    value
                }
            };
            (name, coerced)
        })
        .collect()
}

/// Convert one value to `type_name`, returning it unchanged when it cannot be.
pub fn coerce_value(value: Value, type_name: &str) -> Value {
    if value.is_null() {
        return value;
    }
    let type_name = type_name.trim().to_lowercase();

    match type_name.as_str() {
        "int" | "integer" => to_int(value),
        "float" | "double" | "number" => to_float(value),
        "bool" | "boolean" => to_bool(value),
        t if t.starts_with("list") || t.starts_with("array") => to_list(value),
        t if t.starts_with("dict") || t.starts_with("object") || t.starts_with("map") => {
            to_object(value)
        }
        _ => value,
    }
}

fn to_int(value: Value) -> Value {
    match &value {
        Value::String(s) => s.trim().parse::<i64>().map(Value::from).unwrap_or(value),
        Value::Number(n) if n.is_f64() => n
            .as_f64()
            .filter(|f| f.is_finite())
            .map(|f| Value::from(f.trunc() as i64))
            .unwrap_or(value),
        Value::Bool(b) => Value::from(i64::from(*b)),
        _ => value,
    }
}

fn to_float(value: Value) -> Value {
    match &value {
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .unwrap_or(value),
        Value::Number(n) => n
            .as_f64()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .unwrap_or(value),
        _ => value,
    }
}

fn to_bool(value: Value) -> Value {
    let truthy = match &value {
        Value::String(s) if s.eq_ignore_ascii_case("true") => true,
        Value::String(s) if s.eq_ignore_ascii_case("false") => false,
        Value::String(s) => !s.is_empty(),
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
        Value::Null => false,
    };
    Value::Bool(truthy)
}

fn to_list(value: Value) -> Value {
    match value {
        Value::Array(_) => value,
        Value::String(s) => match serde_json::from_str::<Value>(&s.replace('\'', "\"")) {
            Ok(Value::Array(items)) => Value::Array(items),
            Ok(_) => Value::Array(vec![Value::String(s)]),
            Err(_) if s.contains(',') => Value::Array(
                s.split(',')
                    .map(|item| Value::String(item.trim().to_string()))
                    .collect(),
            ),
            Err(_) => Value::Array(vec![Value::String(s)]),
        },
        other => Value::Array(vec![other]),
    }
}

fn to_object(value: Value) -> Value {
    match &value {
        Value::String(s) => serde_json::from_str::<Value>(&s.replace('\'', "\"")).unwrap_or(value),
        _ => value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notebook::ParameterSpec;
    use serde_json::json;

    fn metadata(declared: &[(&str, &str)]) -> NotebookMetadata {
        NotebookMetadata {
            parameters: declared
                .iter()
                .map(|(name, type_name)| ParameterSpec {
                    name: name.to_string(),
                    type_name: type_name.to_string(),
                    default: String::new(),
                    extras: Default::default(),
                })
                .collect(),
            ..Default::default()
        }
    }

    fn params(value: Value) -> Parameters {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_converts_declared_types() {
        let metadata = metadata(&[
            ("int_param", "int"),
            ("float_param", "float"),
            ("bool_param", "bool"),
            ("str_param", "str"),
            ("list_param", "List[str]"),
            ("dict_param", "Dict"),
        ]);
        let coerced = coerce_parameters(
            params(json!({
                "int_param": "42",
                "float_param": "2.718",
                "bool_param": "true",
                "str_param": "world",
                "list_param": "[\"one\", \"two\", \"three\"]",
                "dict_param": "{\"name\": \"test\", \"value\": 123}"
            })),
            &metadata,
        );
        assert_eq!(coerced["int_param"], json!(42));
        assert_eq!(coerced["float_param"], json!(2.718));
        assert_eq!(coerced["bool_param"], json!(true));
        assert_eq!(coerced["str_param"], json!("world"));
        assert_eq!(coerced["list_param"], json!(["one", "two", "three"]));
        assert_eq!(coerced["dict_param"], json!({"name": "test", "value": 123}));
    }

    #[test]
    fn test_edge_cases_are_preserved() {
        let metadata = metadata(&[
            ("already_int", "int"),
            ("empty_string", "str"),
            ("none_value", "str"),
            ("comma_list", "List[str]"),
            ("unknown_param", "unknown"),
            ("invalid_json", "Dict"),
        ]);
        let coerced = coerce_parameters(
            params(json!({
                "already_int": 42,
                "empty_string": "",
                "none_value": null,
                "comma_list": "a,b,c",
                "unknown_param": "xyz",
                "invalid_json": "{not valid json}",
                "missing_type": "value"
            })),
            &metadata,
        );
        assert_eq!(coerced["already_int"], json!(42));
        assert_eq!(coerced["empty_string"], json!(""));
        assert_eq!(coerced["none_value"], Value::Null);
        assert_eq!(coerced["comma_list"], json!(["a", "b", "c"]));
        assert_eq!(coerced["unknown_param"], json!("xyz"));
        assert_eq!(coerced["invalid_json"], json!("{not valid json}"));
        assert_eq!(coerced["missing_type"], json!("value"));
    }

    #[test]
    fn test_no_declarations_returns_input() {
        let input = params(json!({"param1": "123", "param2": "abc"}));
        assert_eq!(coerce_parameters(input.clone(), &NotebookMetadata::default()), input);
    }

    #[test]
    fn test_unparseable_int_kept_as_sent() {
        assert_eq!(coerce_value(json!("3.5"), "int"), json!("3.5"));
        assert_eq!(coerce_value(json!(3.9), "int"), json!(3));
    }

    #[test]
    fn test_bool_truthiness() {
        assert_eq!(coerce_value(json!("FALSE"), "boolean"), json!(false));
        assert_eq!(coerce_value(json!("yes"), "bool"), json!(true));
        assert_eq!(coerce_value(json!(""), "bool"), json!(false));
        assert_eq!(coerce_value(json!(0), "bool"), json!(false));
    }

    #[test]
    fn test_list_wraps_scalars() {
        assert_eq!(coerce_value(json!("solo"), "list"), json!(["solo"]));
        assert_eq!(coerce_value(json!(5), "array"), json!([5]));
        assert_eq!(coerce_value(json!("['a', 'b']"), "list"), json!(["a", "b"]));
    }
}
