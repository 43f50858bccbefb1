//! App definition parsing, validation, and filesystem loading.
//!
//! Converts YAML documents into the canonical `App` and validates structural
//! constraints: inputs must name declared activities, resource references
//! must resolve, and `call` activities must name an existing function.

use std::path::Path;

use aq_types::app::{ActivityKind, App};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur while loading an app definition.
#[derive(Debug, Error)]
pub enum AppError {
    /// YAML parse failure.
    #[error("parse error: {0}")]
    Parse(String),

    /// Structural validation failure.
    #[error("validation error: {0}")]
    Validation(String),

    /// Filesystem I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse a YAML string into a validated `App`.
pub fn parse_app_yaml(yaml: &str) -> Result<App, AppError> {
    let app: App = serde_yaml_ng::from_str(yaml).map_err(|e| AppError::Parse(e.to_string()))?;
    validate_app(&app)?;
    Ok(app)
}

/// Serialize an `App` back to YAML.
pub fn serialize_app_yaml(app: &App) -> Result<String, AppError> {
    serde_yaml_ng::to_string(app).map_err(|e| AppError::Parse(e.to_string()))
}

/// Load and validate an app definition from a YAML file.
pub fn load_app_file(path: &Path) -> Result<App, AppError> {
    let content = std::fs::read_to_string(path)?;
    parse_app_yaml(&content)
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate structural constraints on an `App`.
///
/// Checks:
/// - At least one activity exists
/// - Every input names a declared activity
/// - Model, tool and memory references resolve to their resource tables
/// - `call` activities carry a `function` parameter naming a declared activity
///
/// Cycles and unbounded fan-out are not detected.
pub fn validate_app(app: &App) -> Result<(), AppError> {
    if app.activities.is_empty() {
        return Err(AppError::Validation(
            "app must declare at least one activity".to_string(),
        ));
    }

    for (name, activity) in app.activities.iter() {
        for input in &activity.inputs {
            if !app.contains(&input.activity) {
                return Err(AppError::Validation(format!(
                    "activity '{name}' takes input from unknown activity '{}'",
                    input.activity
                )));
            }
            if let Some(expr) = &input.fan_out {
                if expr.trim().is_empty() {
                    return Err(AppError::Validation(format!(
                        "activity '{name}' declares an empty map expression for input '{}'",
                        input.activity
                    )));
                }
            }
        }

        for model in &activity.models {
            if !app.models.contains_key(model) {
                return Err(AppError::Validation(format!(
                    "activity '{name}' references unknown model '{model}'"
                )));
            }
        }
        for tool in &activity.tools {
            if !app.tools.contains_key(tool) {
                return Err(AppError::Validation(format!(
                    "activity '{name}' references unknown tool '{tool}'"
                )));
            }
        }
        for memory in &activity.memory {
            if !app.memory.contains_key(memory) {
                return Err(AppError::Validation(format!(
                    "activity '{name}' references unknown memory '{memory}'"
                )));
            }
        }

        if activity.kind == ActivityKind::Call {
            match activity.parameter_str("function") {
                None | Some("") => {
                    return Err(AppError::Validation(format!(
                        "call activity '{name}' is missing its 'function' parameter"
                    )));
                }
                Some(target) if !app.contains(target) => {
                    return Err(AppError::Validation(format!(
                        "call activity '{name}' targets unknown activity '{target}'"
                    )));
                }
                Some(_) => {}
            }
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
