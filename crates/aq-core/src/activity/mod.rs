//! Activity handler capability.
//!
//! - `handler` -- the `ActivityHandler` trait and the `ActivityJob` record handlers mutate
//! - `box_handler` -- object-safe wrapper for runtime dispatch
//! - `registry` -- handlers keyed by `ActivityKind`
//! - `merge` -- input merging shared by text/JSON/YAML producing activities
//! - `function` -- the dependency-free `function` and `return` activities

pub mod box_handler;
pub mod function;
pub mod handler;
pub mod merge;
pub mod registry;

pub use box_handler::BoxActivityHandler;
pub use handler::{ActivityError, ActivityHandler, ActivityJob};
pub use registry::HandlerRegistry;
