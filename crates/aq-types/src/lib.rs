//! Shared domain types for the aq activity engine.
//!
//! This crate contains the app definition consumed by the engine, the job
//! entities it tracks while running, engine configuration, and the
//! definition error type shared by every layer.
//!
//! Zero infrastructure dependencies -- only serde, uuid, thiserror.

pub mod app;
pub mod config;
pub mod error;
pub mod job;
