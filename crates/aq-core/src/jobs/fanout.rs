//! Fan-out (`map`) expression evaluation.
//!
//! An input declared with a `map` expression expands one aggregated upstream
//! output into a list of elements, producing one downstream run per element.
//! String outputs are parsed as JSON before evaluation; an array of outputs
//! is parsed element-wise.
//!
//! Expressions are JSONPath by default (`$`, `$.items`, `$.groups[*].items`).
//! Every match holding an array contributes its elements, in match order;
//! matches holding anything else are skipped. [`JexlFanOut`] evaluates JEXL
//! instead, with the parsed document bound as `input`.

use serde_json::{Value, json};
use serde_json_path::JsonPath;
use thiserror::Error;

/// Errors from evaluating a fan-out expression.
#[derive(Debug, Error)]
pub enum FanOutError {
    #[error("upstream output is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("failed to evaluate map expression '{expression}': {message}")]
    Evaluation { expression: String, message: String },

    #[error("map expression '{expression}' did not select an array (got {found})")]
    NotAnArray { expression: String, found: String },
}

/// Selects a list of elements from an aggregated upstream value.
pub trait FanOutEvaluator: Send + Sync {
    fn fan_out(&self, expression: &str, aggregated: &Value) -> Result<Vec<Value>, FanOutError>;
}

/// Fan-out evaluator backed by JSONPath queries.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonPathFanOut;

impl FanOutEvaluator for JsonPathFanOut {
    fn fan_out(&self, expression: &str, aggregated: &Value) -> Result<Vec<Value>, FanOutError> {
        let path = JsonPath::parse(expression).map_err(|e| FanOutError::Evaluation {
            expression: expression.to_string(),
            message: e.to_string(),
        })?;
        let document = parse_document(aggregated)?;

        let elements = path
            .query(&document)
            .all()
            .into_iter()
            .filter_map(Value::as_array)
            .flatten()
            .cloned()
            .collect();
        Ok(elements)
    }
}

/// Fan-out evaluator backed by JEXL expressions.
///
/// Unlike JSONPath, a selection that is not an array is an error.
#[derive(Debug, Clone, Copy, Default)]
pub struct JexlFanOut;

impl FanOutEvaluator for JexlFanOut {
    fn fan_out(&self, expression: &str, aggregated: &Value) -> Result<Vec<Value>, FanOutError> {
        let document = parse_document(aggregated)?;
        let context = json!({ "input": document });

        let evaluator = jexl_eval::Evaluator::new();
        let selected = evaluator
            .eval_in_context(expression, &context)
            .map_err(|e| FanOutError::Evaluation {
                expression: expression.to_string(),
                message: e.to_string(),
            })?;

        match selected {
            Value::Array(elements) => Ok(elements),
            other => Err(FanOutError::NotAnArray {
                expression: expression.to_string(),
                found: other.to_string(),
            }),
        }
    }
}

fn parse_document(value: &Value) -> Result<Value, FanOutError> {
    match value {
        Value::String(text) => {
            serde_json::from_str(text).map_err(|e| FanOutError::InvalidJson(e.to_string()))
        }
        Value::Array(items) => items
            .iter()
            .map(parse_document)
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        other => Ok(other.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_path_expands_bare_array() {
        let aggregated = Value::String("[1, 2]".to_string());
        let elements = JsonPathFanOut.fan_out("$", &aggregated).unwrap();
        assert_eq!(elements, vec![json!(1), json!(2)]);
    }

    #[test]
    fn test_member_path_selects_array() {
        let aggregated = Value::String(r#"{"items": [1, 2]}"#.to_string());
        let elements = JsonPathFanOut.fan_out("$.items", &aggregated).unwrap();
        assert_eq!(elements, vec![json!(1), json!(2)]);
    }

    #[test]
    fn test_multiple_matches_are_concatenated_in_order() {
        let aggregated = Value::String(
            r#"{"groups": [{"items": ["a", "b"]}, {"items": "skip"}, {"items": ["c"]}]}"#
                .to_string(),
        );
        let elements = JsonPathFanOut
            .fan_out("$.groups[*].items", &aggregated)
            .unwrap();
        assert_eq!(elements, vec![json!("a"), json!("b"), json!("c")]);
    }

    #[test]
    fn test_non_array_match_selects_nothing() {
        let aggregated = Value::String(r#"{"count": 4}"#.to_string());
        let elements = JsonPathFanOut.fan_out("$.count", &aggregated).unwrap();
        assert!(elements.is_empty());
        let elements = JsonPathFanOut.fan_out("$.missing", &aggregated).unwrap();
        assert!(elements.is_empty());
    }

    #[test]
    fn test_invalid_path_is_rejected() {
        let aggregated = Value::String("[1]".to_string());
        let err = JsonPathFanOut.fan_out("items[", &aggregated).unwrap_err();
        assert!(matches!(err, FanOutError::Evaluation { .. }), "got: {err}");
    }

    #[test]
    fn test_array_of_outputs_is_parsed_element_wise() {
        let aggregated = json!([r#"{"name": "x"}"#, r#"{"name": "y"}"#]);
        let elements = JsonPathFanOut.fan_out("$", &aggregated).unwrap();
        assert_eq!(elements.len(), 2);
        assert_eq!(elements[0]["name"], json!("x"));
    }

    #[test]
    fn test_invalid_json_is_rejected() {
        let aggregated = Value::String("not json at all".to_string());
        let err = JsonPathFanOut.fan_out("$", &aggregated).unwrap_err();
        assert!(matches!(err, FanOutError::InvalidJson(_)));
    }

    #[test]
    fn test_jexl_selects_array_from_json_string() {
        let aggregated = Value::String(r#"{"items": [1, 2, 3]}"#.to_string());
        let elements = JexlFanOut.fan_out("input.items", &aggregated).unwrap();
        let numbers: Vec<f64> = elements.iter().filter_map(Value::as_f64).collect();
        assert_eq!(numbers, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_jexl_empty_array_selects_nothing() {
        let aggregated = Value::String(r#"{"items": []}"#.to_string());
        let elements = JexlFanOut.fan_out("input.items", &aggregated).unwrap();
        assert!(elements.is_empty());
    }

    #[test]
    fn test_jexl_non_array_selection_is_rejected() {
        let aggregated = Value::String(r#"{"count": 4}"#.to_string());
        let err = JexlFanOut.fan_out("input.count", &aggregated).unwrap_err();
        assert!(matches!(err, FanOutError::NotAnArray { .. }), "got: {err}");
    }
}
