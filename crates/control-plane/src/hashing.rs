//! Content fingerprints for duplicate detection.
//!
//! Two runs are equivalent when the notebook's code and the coerced
//! parameters are identical. Outputs and execution counters of code cells are
//! volatile and ignored; object key order is normalized away.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::error::{AppError, AppResult};
use crate::execution::{ExecutionHashes, Parameters};

/// Hex encoded SHA-256 of `bytes`.
pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Fingerprint notebook content with volatile cell fields stripped.
pub fn hash_notebook(content: &[u8]) -> AppResult<String> {
    let mut notebook: Value = serde_json::from_slice(content)
        .map_err(|e| AppError::Validation(format!("Notebook is not valid JSON: {}", e)))?;
    if !notebook.is_object() {
        return Err(AppError::Validation(
            "Notebook must be a JSON object".to_string(),
        ));
    }
    strip_volatile_fields(&mut notebook);
    Ok(sha256_hex(canonical(&notebook).to_string().as_bytes()))
}

/// Fingerprint parameters independent of key order.
pub fn hash_parameters(parameters: &Parameters) -> String {
    let canonical = canonical(&Value::Object(parameters.clone()));
    sha256_hex(canonical.to_string().as_bytes())
}

pub fn hash_execution(notebook_hash: &str, parameters_hash: &str) -> String {
    sha256_hex(format!("{}:{}", notebook_hash, parameters_hash).as_bytes())
}

/// All three fingerprints for one run.
pub fn execution_hashes(notebook: &[u8], parameters: &Parameters) -> AppResult<ExecutionHashes> {
    let notebook_hash = hash_notebook(notebook)?;
    let parameters_hash = hash_parameters(parameters);
    let execution_hash = hash_execution(&notebook_hash, &parameters_hash);
    Ok(ExecutionHashes {
        notebook_hash,
        parameters_hash,
        execution_hash,
    })
}

fn strip_volatile_fields(notebook: &mut Value) {
    let Some(cells) = notebook.get_mut("cells").and_then(Value::as_array_mut) else {
        return;
    };
    for cell in cells {
        if cell.get("cell_type").and_then(Value::as_str) != Some("code") {
            continue;
        }
        if let Some(cell) = cell.as_object_mut() {
            cell.insert("outputs".to_string(), Value::Array(Vec::new()));
            cell.insert("execution_count".to_string(), Value::Null);
        }
    }
}

/// Copy of `value` with every object's keys in sorted order.
fn canonical(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::with_capacity(map.len());
            for key in keys {
                sorted.insert(key.clone(), canonical(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonical).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn notebook(source: &str, outputs: Value, count: Value) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "nbformat": 4,
            "nbformat_minor": 5,
            "metadata": {"kernelspec": {"name": "python3"}},
            "cells": [
                {"cell_type": "markdown", "metadata": {}, "source": ["# Report"]},
                {
                    "cell_type": "code",
                    "metadata": {},
                    "source": [source],
                    "outputs": outputs,
                    "execution_count": count
                }
            ]
        }))
        .unwrap()
    }

    fn params(raw: &str) -> Parameters {
        serde_json::from_str(raw).unwrap()
    }

    #[test]
    fn test_sha256_hex_known_vector() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_notebook_hash_ignores_outputs_and_counters() {
        let clean = notebook("print(1)", json!([]), Value::Null);
        let executed = notebook(
            "print(1)",
            json!([{"output_type": "stream", "name": "stdout", "text": ["1\n"]}]),
            json!(7),
        );
        assert_eq!(hash_notebook(&clean).unwrap(), hash_notebook(&executed).unwrap());
    }

    #[test]
    fn test_notebook_hash_tracks_source() {
        let a = notebook("print(1)", json!([]), Value::Null);
        let b = notebook("print(2)", json!([]), Value::Null);
        assert_ne!(hash_notebook(&a).unwrap(), hash_notebook(&b).unwrap());
    }

    #[test]
    fn test_notebook_hash_ignores_key_order() {
        let a = br#"{"nbformat": 4, "cells": [], "metadata": {"a": 1, "b": 2}}"#;
        let b = br#"{"metadata": {"b": 2, "a": 1}, "cells": [], "nbformat": 4}"#;
        assert_eq!(hash_notebook(a).unwrap(), hash_notebook(b).unwrap());
    }

    #[test]
    fn test_malformed_notebook_is_validation_error() {
        assert!(matches!(
            hash_notebook(b"{not json"),
            Err(AppError::Validation(_))
        ));
        assert!(matches!(hash_notebook(b"[1, 2]"), Err(AppError::Validation(_))));
    }

    #[test]
    fn test_parameter_hash_independent_of_order() {
        let a = params(r#"{"region": "eu", "limit": 10, "opts": {"x": true, "y": [1, 2]}}"#);
        let b = params(r#"{"opts": {"y": [1, 2], "x": true}, "limit": 10, "region": "eu"}"#);
        assert_eq!(hash_parameters(&a), hash_parameters(&b));
    }

    #[test]
    fn test_parameter_hash_distinguishes_types() {
        let int = params(r#"{"limit": 10}"#);
        let text = params(r#"{"limit": "10"}"#);
        assert_ne!(hash_parameters(&int), hash_parameters(&text));
    }

    #[test]
    fn test_execution_hash_combines_both_parts() {
        let combined = hash_execution("nh", "ph");
        assert_eq!(combined, sha256_hex(b"nh:ph"));
        assert_ne!(combined, hash_execution("ph", "nh"));
    }

    #[test]
    fn test_execution_hashes_are_deterministic() {
        let content = notebook("x = 1", json!([]), Value::Null);
        let parameters = params(r#"{"x": 1}"#);
        let first = execution_hashes(&content, &parameters).unwrap();
        let second = execution_hashes(&content, &parameters).unwrap();
        assert_eq!(first, second);
        assert_eq!(
            first.execution_hash,
            hash_execution(&first.notebook_hash, &first.parameters_hash)
        );
    }
}
