//! Reference substitution
//!
//! Task inputs may reference launch parameters and upstream outputs:
//! `${parameters.name}` and `${tasks.X.output.path.to.field}`. A string
//! that is exactly one reference splices the referenced JSON value; a
//! reference embedded in a longer string splices its text rendering.

use crate::{Result, WorkflowError};
use serde_json::Value;
use std::collections::HashMap;

/// A parsed `${...}` reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference {
    /// `${parameters.name[.path...]}`
    Parameter {
        /// Parameter name
        name: String,
        /// Path below the parameter value
        path: Vec<String>,
    },
    /// `${tasks.X.output[.path...]}`
    TaskOutput {
        /// Source task id
        task: String,
        /// Path below the task output
        path: Vec<String>,
    },
}

/// Parse the inside of a `${...}` expression
pub fn parse_ref(expr: &str) -> Option<Reference> {
    let parts: Vec<&str> = expr.split('.').collect();
    match parts.as_slice() {
        ["parameters", name, rest @ ..] if !name.is_empty() => Some(Reference::Parameter {
            name: name.to_string(),
            path: rest.iter().map(|s| s.to_string()).collect(),
        }),
        ["tasks", task, "output", rest @ ..] if !task.is_empty() => Some(Reference::TaskOutput {
            task: task.to_string(),
            path: rest.iter().map(|s| s.to_string()).collect(),
        }),
        _ => None,
    }
}

fn scan_refs(text: &str) -> Vec<(usize, usize, Reference)> {
    let mut found = Vec::new();
    let bytes = text.as_bytes();
    let mut i = 0;
    while i + 1 < bytes.len() {
        if bytes[i] == b'$' && bytes[i + 1] == b'{' {
            if let Some(end) = text[i + 2..].find('}') {
                let expr = &text[i + 2..i + 2 + end];
                if let Some(reference) = parse_ref(expr) {
                    found.push((i, i + 2 + end + 1, reference));
                }
                i += 2 + end + 1;
                continue;
            }
        }
        i += 1;
    }
    found
}

/// Collect every reference appearing anywhere in a value
pub fn collect_refs(value: &Value) -> Vec<Reference> {
    let mut refs = Vec::new();
    collect_into(value, &mut refs);
    refs
}

fn collect_into(value: &Value, refs: &mut Vec<Reference>) {
    match value {
        Value::String(text) => refs.extend(scan_refs(text).into_iter().map(|(_, _, r)| r)),
        Value::Array(items) => items.iter().for_each(|item| collect_into(item, refs)),
        Value::Object(map) => map.values().for_each(|item| collect_into(item, refs)),
        _ => {}
    }
}

fn walk<'v>(value: &'v Value, path: &[String]) -> Option<&'v Value> {
    let mut current = value;
    for key in path {
        current = match current {
            Value::Object(map) => map.get(key)?,
            Value::Array(items) => items.get(key.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

fn resolve(
    reference: &Reference,
    parameters: &Value,
    outputs: &HashMap<String, Value>,
) -> Result<Value> {
    match reference {
        Reference::Parameter { name, path } => {
            let base = parameters.get(name).ok_or_else(|| {
                WorkflowError::InvalidReference(format!("Unknown parameter {}", name))
            })?;
            walk(base, path).cloned().ok_or_else(|| {
                WorkflowError::InvalidReference(format!(
                    "Parameter {} has no path .{}",
                    name,
                    path.join(".")
                ))
            })
        }
        Reference::TaskOutput { task, path } => {
            let base = outputs.get(task).ok_or_else(|| {
                WorkflowError::InvalidReference(format!("No output recorded for task {}", task))
            })?;
            walk(base, path).cloned().ok_or_else(|| {
                WorkflowError::InvalidReference(format!(
                    "Output of {} has no path .{}",
                    task,
                    path.join(".")
                ))
            })
        }
    }
}

fn render_inline(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Substitute every reference in `input`
pub fn substitute(
    input: &Value,
    parameters: &Value,
    outputs: &HashMap<String, Value>,
) -> Result<Value> {
    match input {
        Value::String(text) => {
            let refs = scan_refs(text);
            if refs.is_empty() {
                return Ok(input.clone());
            }
            // A string that is exactly one reference splices the value.
            if refs.len() == 1 && refs[0].0 == 0 && refs[0].1 == text.len() {
                return resolve(&refs[0].2, parameters, outputs);
            }
            let mut rendered = String::new();
            let mut cursor = 0;
            for (start, end, reference) in refs {
                rendered.push_str(&text[cursor..start]);
                rendered.push_str(&render_inline(&resolve(&reference, parameters, outputs)?));
                cursor = end;
            }
            rendered.push_str(&text[cursor..]);
            Ok(Value::String(rendered))
        }
        Value::Array(items) => Ok(Value::Array(
            items
                .iter()
                .map(|item| substitute(item, parameters, outputs))
                .collect::<Result<Vec<_>>>()?,
        )),
        Value::Object(map) => {
            let mut rendered = serde_json::Map::new();
            for (key, item) in map {
                rendered.insert(key.clone(), substitute(item, parameters, outputs)?);
            }
            Ok(Value::Object(rendered))
        }
        other => Ok(other.clone()),
    }
}
