//! Declarative, JSON-encoded task parameters.
//!
//! A task type declares an ordered list of these; a task's configuration
//! stores matching values as a JSON array, validated against the schema on
//! load (see [`validate_parameters`]).

use std::collections::BTreeMap;

use serde_json::Value;

#[derive(Debug, Clone)]
pub enum ParameterType {
    String,
    Int,
    Choice(BTreeMap<String, String>),
    Collection(Vec<ParameterType>),
}

impl ParameterType {
    pub fn validate(&self, value: &Value) -> anyhow::Result<()> {
        match self {
            ParameterType::String => {
                if value.is_string() {
                    Ok(())
                } else {
                    Err(anyhow::anyhow!("expected a string, got {value}"))
                }
            }
            ParameterType::Int => {
                if value.is_i64() || value.is_u64() {
                    Ok(())
                } else {
                    Err(anyhow::anyhow!("expected an integer, got {value}"))
                }
            }
            ParameterType::Choice(choices) => {
                let key = value.as_str().ok_or_else(|| anyhow::anyhow!("expected a string key, got {value}"))?;
                if choices.contains_key(key) {
                    Ok(())
                } else {
                    Err(anyhow::anyhow!("{key} is not one of the allowed choices"))
                }
            }
            ParameterType::Collection(subparameters) => {
                let items = value.as_array().ok_or_else(|| anyhow::anyhow!("expected an array, got {value}"))?;
                if items.len() != subparameters.len() {
                    anyhow::bail!("expected {} elements, got {}", subparameters.len(), items.len());
                }
                for (item, sub) in items.iter().zip(subparameters) {
                    sub.validate(item)?;
                }
                Ok(())
            }
        }
    }

    pub fn parse_string(&self, s: &str) -> anyhow::Result<Value> {
        match self {
            ParameterType::String => Ok(Value::String(s.to_string())),
            ParameterType::Int => s.parse::<i64>().map(Value::from).map_err(|e| anyhow::anyhow!("not an integer: {e}")),
            ParameterType::Choice(choices) => {
                if choices.contains_key(s) {
                    Ok(Value::String(s.to_string()))
                } else {
                    Err(anyhow::anyhow!("{s} is not one of the allowed choices"))
                }
            }
            ParameterType::Collection(_) => Err(anyhow::anyhow!("collection parameters cannot be parsed from a single string")),
        }
    }
}

/// Validate a task's stored parameter array against a task type's declared
/// schema: must be a list of the schema's length, each element valid for
/// its corresponding parameter.
pub fn validate_parameters(schema: &[ParameterType], value: &Value) -> anyhow::Result<()> {
    let items = value.as_array().ok_or_else(|| anyhow::anyhow!("task parameters must be a JSON array"))?;
    if items.len() != schema.len() {
        anyhow::bail!("expected {} parameters, got {}", schema.len(), items.len());
    }
    for (item, param) in items.iter().zip(schema) {
        param.validate(item)?;
    }
    Ok(())
}
