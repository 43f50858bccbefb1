//! Dependency-resolution and concurrent-execution engine for aq apps.
//!
//! This crate defines the activity handler capability that concrete
//! activities implement, the job manager that tracks workflow instances and
//! activity runs, and the scheduler that drives a worker pool against a
//! shared queue. It depends only on `aq-types` -- never on `aq-infra` or any
//! filesystem/network crate.

pub mod activity;
pub mod app;
pub mod broker;
pub mod jobs;
