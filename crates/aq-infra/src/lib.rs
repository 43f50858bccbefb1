//! Infrastructure layer for aq.
//!
//! Contains the filesystem-backed activity handlers (`read`, `write`) and the
//! `config.toml` loader, plus [`default_registry`] which wires every built-in
//! handler into a `HandlerRegistry`.

pub mod activity;
pub mod config;

use aq_core::activity::function::{FunctionActivity, ReturnActivity};
use aq_core::activity::{BoxActivityHandler, HandlerRegistry};
use aq_types::app::ActivityKind;
use aq_types::config::EngineConfig;

use activity::read::ReadActivity;
use activity::write::WriteActivity;

/// Registry with every built-in handler.
///
/// Kinds backed by external services (`store`, `retrieve`, `summarize`,
/// `extract`, `generate`) are left unregistered; runs of those kinds fail
/// with a definition error.
pub fn default_registry(config: &EngineConfig) -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    registry.register(ActivityKind::Read, BoxActivityHandler::new(ReadActivity));
    registry.register(
        ActivityKind::Write,
        BoxActivityHandler::new(WriteActivity::new(config.output.dir.clone())),
    );
    registry.register(ActivityKind::Function, BoxActivityHandler::new(FunctionActivity));
    registry.register(ActivityKind::Return, BoxActivityHandler::new(ReturnActivity));
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_registry_kinds() {
        let registry = default_registry(&EngineConfig::default());
        assert_eq!(
            registry.kinds(),
            vec![
                ActivityKind::Read,
                ActivityKind::Write,
                ActivityKind::Function,
                ActivityKind::Return,
            ]
        );
        assert!(registry.get(ActivityKind::Generate).is_none());
    }
}
