//! Notebook metadata reader.
//!
//! Declared parameters come from code cells tagged `parameters`, one
//! `name: type = default  # {"json": "extras"}` assignment per line.
//! Identity, requirements and resource hints come from the notebook-level
//! `metadata.notebook_spec` object.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{AppError, AppResult};

/// A parameter declared in the notebook's parameters cell.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParameterSpec {
    pub name: String,
    /// Declared type annotation, `Any` when absent.
    pub type_name: String,
    /// Default expression as written in the cell.
    pub default: String,
    /// JSON object found in the trailing comment, if any.
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub extras: Map<String, Value>,
}

/// Resource hints a notebook declares for itself.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResourceHints {
    pub cpu_milli: Option<i32>,
    pub memory_mib: Option<i32>,
    pub timeout_seconds: Option<i64>,
}

/// Everything the control plane reads from a notebook document.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NotebookMetadata {
    pub name: String,
    pub description: String,
    pub python_version: Option<String>,
    pub parameters: Vec<ParameterSpec>,
    pub requirements: Vec<String>,
    pub resources: ResourceHints,
}

impl NotebookMetadata {
    pub fn parse(content: &[u8]) -> AppResult<Self> {
        let notebook: Value = serde_json::from_slice(content)
            .map_err(|e| AppError::Validation(format!("Notebook is not valid JSON: {}", e)))?;

        if let Some(version) = notebook.get("nbformat").and_then(Value::as_i64) {
            if version != 4 && version != 3 {
                return Err(AppError::Validation(format!(
                    "Unsupported notebook version: {}",
                    version
                )));
            }
        }

        let empty = Map::new();
        let spec = notebook
            .pointer("/metadata/notebook_spec")
            .and_then(Value::as_object)
            .unwrap_or(&empty);

        Ok(Self {
            name: string_field(spec, "name").unwrap_or_default(),
            description: string_field(spec, "description").unwrap_or_default(),
            python_version: string_field(spec, "python_version"),
            parameters: parameter_cells(&notebook)
                .flat_map(|source| source.lines().filter_map(parse_parameter_line).collect::<Vec<_>>())
                .collect(),
            requirements: spec.get("requirements").map(requirement_list).unwrap_or_default(),
            resources: resource_hints(spec),
        })
    }

    /// Declared type for `name`, if the notebook declares it.
    pub fn parameter_type(&self, name: &str) -> Option<&str> {
        self.parameters
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.type_name.as_str())
    }
}

fn string_field(spec: &Map<String, Value>, key: &str) -> Option<String> {
    match spec.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Sources of code cells tagged `parameters`.
fn parameter_cells(notebook: &Value) -> impl Iterator<Item = String> + '_ {
    notebook
        .get("cells")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter(|cell| cell.get("cell_type").and_then(Value::as_str) == Some("code"))
        .filter(|cell| {
            cell.pointer("/metadata/tags")
                .and_then(Value::as_array)
                .is_some_and(|tags| tags.iter().any(|t| t.as_str() == Some("parameters")))
        })
        .map(|cell| cell_source(cell.get("source")))
}

fn cell_source(source: Option<&Value>) -> String {
    match source {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(lines)) => lines.iter().filter_map(Value::as_str).collect(),
        _ => String::new(),
    }
}

fn parse_parameter_line(line: &str) -> Option<ParameterSpec> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let (name_type, value_part) = line.split_once('=')?;

    let (name, type_name) = match name_type.split_once(':') {
        Some((name, type_name)) => (name.trim(), type_name.trim()),
        None => (name_type.trim(), "Any"),
    };
    if name.is_empty() {
        return None;
    }

    let (default, extras) = match value_part.split_once('#') {
        Some((value, comment)) => {
            let comment = comment.trim();
            let extras = if comment.starts_with('{') && comment.ends_with('}') {
                serde_json::from_str::<Map<String, Value>>(comment).unwrap_or_default()
            } else {
                Map::new()
            };
            (value.trim(), extras)
        }
        None => (value_part.trim(), Map::new()),
    };

    Some(ParameterSpec {
        name: name.to_string(),
        type_name: type_name.to_string(),
        default: default.to_string(),
        extras,
    })
}

/// Requirements may be a list of specifiers or a `{package: version}` map.
fn requirement_list(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        Value::Object(packages) => packages
            .iter()
            .map(|(package, version)| match version.as_str().map(str::trim) {
                None | Some("") | Some("*") => package.clone(),
                Some(v) if v.starts_with(['=', '<', '>', '!', '~']) => format!("{}{}", package, v),
                Some(v) => format!("{}=={}", package, v),
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn resource_hints(spec: &Map<String, Value>) -> ResourceHints {
    let as_i32 = |value: &Value| value.as_f64().map(|v| v as i32);

    if let Some(resources) = spec.get("resources").and_then(Value::as_object) {
        return ResourceHints {
            cpu_milli: resources.get("cpu_milli").and_then(as_i32),
            memory_mib: resources.get("memory_mib").and_then(as_i32),
            timeout_seconds: resources.get("timeout_seconds").and_then(Value::as_i64),
        };
    }

    let number = |key: &str| {
        spec.get(key).and_then(|v| match v {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        })
    };
    ResourceHints {
        cpu_milli: number("cpu").map(|cores| (cores * 1000.0) as i32),
        memory_mib: number("memory").map(|mib| mib as i32),
        timeout_seconds: number("timeout").map(|secs| secs as i64),
    }
}
