//! Workflow templates
//!
//! A template is a workflow definition with a typed parameter schema and
//! `${parameters.name}` substitutions in its task inputs. Instantiation
//! validates the supplied values against the schema and produces a
//! concrete definition.

use crate::definition::WorkflowDefinition;
use crate::substitution::substitute;
use crate::{Result, WorkflowError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

/// Parameter types a schema can declare
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterType {
    /// UTF-8 string
    String,
    /// Integer number
    Integer,
    /// Floating-point number
    Number,
    /// Boolean
    Boolean,
    /// JSON array
    Array,
    /// JSON object
    Object,
}

impl ParameterType {
    fn matches(self, value: &Value) -> bool {
        match self {
            ParameterType::String => value.is_string(),
            ParameterType::Integer => value.is_i64() || value.is_u64(),
            ParameterType::Number => value.is_number(),
            ParameterType::Boolean => value.is_boolean(),
            ParameterType::Array => value.is_array(),
            ParameterType::Object => value.is_object(),
        }
    }
}

/// One declared parameter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterSpec {
    /// Parameter type
    #[serde(rename = "type")]
    pub kind: ParameterType,
    /// Whether the value must be supplied
    #[serde(default)]
    pub required: bool,
    /// Default used when the value is omitted
    #[serde(default)]
    pub default: Option<Value>,
    /// Operator-facing description
    #[serde(default)]
    pub description: Option<String>,
}

/// Typed parameter schema
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParametersSchema {
    /// Declared parameters by name
    #[serde(flatten)]
    pub parameters: BTreeMap<String, ParameterSpec>,
}

impl ParametersSchema {
    /// Validate supplied values and fill defaults
    pub fn resolve(&self, values: &Value) -> Result<Value> {
        let supplied = values.as_object().cloned().unwrap_or_default();

        for name in supplied.keys() {
            if !self.parameters.contains_key(name) {
                return Err(WorkflowError::TemplateError(format!(
                    "Unknown parameter {}",
                    name
                )));
            }
        }

        let mut resolved = serde_json::Map::new();
        for (name, spec) in &self.parameters {
            match supplied.get(name) {
                Some(value) => {
                    if !spec.kind.matches(value) {
                        return Err(WorkflowError::TemplateError(format!(
                            "Parameter {} expects {:?}",
                            name, spec.kind
                        )));
                    }
                    resolved.insert(name.clone(), value.clone());
                }
                None => match (&spec.default, spec.required) {
                    (Some(default), _) => {
                        resolved.insert(name.clone(), default.clone());
                    }
                    (None, true) => {
                        return Err(WorkflowError::TemplateError(format!(
                            "Missing required parameter {}",
                            name
                        )))
                    }
                    (None, false) => {}
                },
            }
        }
        Ok(Value::Object(resolved))
    }
}

/// Instantiate a template into a concrete definition
///
/// Validates values against the schema and splices every
/// `${parameters.*}` reference. `${tasks.*}` references are left for the
/// engine to resolve at dispatch time.
pub fn instantiate(template: &WorkflowDefinition, values: &Value) -> Result<WorkflowDefinition> {
    let parameters = template.parameters_schema.resolve(values)?;
    let no_outputs: HashMap<String, Value> = HashMap::new();

    let mut concrete = template.clone();
    for task in concrete.tasks.values_mut() {
        task.input = substitute_parameters_only(&task.input, &parameters, &no_outputs)?;
    }
    concrete.parameters_schema = ParametersSchema::default();
    concrete.validate()?;
    Ok(concrete)
}

// Parameters substitute now; task-output references stay intact for the
// engine. Strings carrying only task references pass through unchanged.
fn substitute_parameters_only(
    input: &Value,
    parameters: &Value,
    outputs: &HashMap<String, Value>,
) -> Result<Value> {
    match input {
        Value::String(text) if text.contains("${tasks.") => Ok(input.clone()),
        Value::Array(items) => Ok(Value::Array(
            items
                .iter()
                .map(|item| substitute_parameters_only(item, parameters, outputs))
                .collect::<Result<Vec<_>>>()?,
        )),
        Value::Object(map) => {
            let mut rendered = serde_json::Map::new();
            for (key, item) in map {
                rendered.insert(key.clone(), substitute_parameters_only(item, parameters, outputs)?);
            }
            Ok(Value::Object(rendered))
        }
        other => substitute(other, parameters, outputs),
    }
}
