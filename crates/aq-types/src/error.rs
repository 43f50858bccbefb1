use thiserror::Error;

use crate::app::ActivityKind;

/// Errors caused by an invalid app definition or a caller passing names the
/// app does not declare.
///
/// These are not transient: retrying the same work cannot succeed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DefinitionError {
    #[error("activity '{0}' not found")]
    UnknownActivity(String),

    #[error("call activity '{activity}' is missing its 'function' parameter")]
    MissingCallTarget { activity: String },

    #[error("call activity '{activity}' targets unknown activity '{target}'")]
    UnknownCallTarget { activity: String, target: String },

    #[error("no handler registered for activity kind '{0}'")]
    NoHandler(ActivityKind),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_definition_error_display() {
        let err = DefinitionError::UnknownActivity("nonexistent".to_string());
        assert_eq!(err.to_string(), "activity 'nonexistent' not found");

        let err = DefinitionError::UnknownCallTarget {
            activity: "invoke".to_string(),
            target: "missing".to_string(),
        };
        assert!(err.to_string().contains("invoke"));
        assert!(err.to_string().contains("missing"));

        let err = DefinitionError::NoHandler(ActivityKind::Generate);
        assert_eq!(err.to_string(), "no handler registered for activity kind 'generate'");
    }
}
