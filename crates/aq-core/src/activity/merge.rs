//! Input merging shared by activities that collate upstream outputs.

use serde_json::Value;

use super::handler::ActivityError;
use crate::jobs::model::ActivityInputs;

/// Concatenate every input as text.
///
/// Inputs are separated by a blank line; the elements of an aggregated
/// (multi-run) input are separated by a single newline.
pub fn merge_text(inputs: &ActivityInputs) -> String {
    inputs
        .values()
        .map(|value| match value {
            Value::Array(items) => items.iter().map(as_text).collect::<Vec<_>>().join("\n"),
            other => as_text(other),
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Combine inputs into one pretty-printed JSON document.
///
/// Each input is parsed as JSON when possible and kept as a string
/// otherwise. A single input is emitted as-is; several inputs become an
/// object keyed by input name.
pub fn merge_json(inputs: &ActivityInputs) -> Result<String, ActivityError> {
    serde_json::to_string_pretty(&merged_document(inputs))
        .map_err(|e| ActivityError::Serialization(e.to_string()))
}

/// Same document as [`merge_json`], rendered as YAML.
pub fn merge_yaml(inputs: &ActivityInputs) -> Result<String, ActivityError> {
    serde_yaml_ng::to_string(&merged_document(inputs))
        .map_err(|e| ActivityError::Serialization(e.to_string()))
}

fn merged_document(inputs: &ActivityInputs) -> Value {
    let merged: serde_json::Map<String, Value> = inputs
        .iter()
        .map(|(name, value)| (name.clone(), parse_lenient(value)))
        .collect();

    if merged.len() == 1 {
        return merged.into_iter().next().map_or(Value::Null, |(_, only)| only);
    }
    Value::Object(merged)
}

fn parse_lenient(value: &Value) -> Value {
    match value {
        Value::String(text) => serde_json::from_str(text).unwrap_or_else(|_| value.clone()),
        // All elements parse, or the aggregate stays as produced.
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::String(text) => serde_json::from_str(text).ok(),
                other => Some(other.clone()),
            })
            .collect::<Option<Vec<_>>>()
            .map(Value::Array)
            .unwrap_or_else(|| value.clone()),
        other => other.clone(),
    }
}

fn as_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
