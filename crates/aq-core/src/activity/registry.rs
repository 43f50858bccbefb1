//! Handler registry for runtime dispatch by activity kind.

use std::collections::HashMap;

use aq_types::app::ActivityKind;

use super::box_handler::BoxActivityHandler;

/// Registry of activity handlers, indexed by `ActivityKind`.
///
/// `call` never needs an entry: the scheduler performs it directly.
pub struct HandlerRegistry {
    handlers: HashMap<ActivityKind, BoxActivityHandler>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler for `kind`, replacing any existing one.
    pub fn register(&mut self, kind: ActivityKind, handler: BoxActivityHandler) {
        if kind.is_scheduler_native() {
            tracing::warn!(%kind, "handler registered for a kind the scheduler performs itself");
        }
        self.handlers.insert(kind, handler);
    }

    pub fn get(&self, kind: ActivityKind) -> Option<&BoxActivityHandler> {
        self.handlers.get(&kind)
    }

    /// Registered kinds, in declaration order.
    pub fn kinds(&self) -> Vec<ActivityKind> {
        ActivityKind::ALL
            .into_iter()
            .filter(|kind| self.handlers.contains_key(kind))
            .collect()
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
