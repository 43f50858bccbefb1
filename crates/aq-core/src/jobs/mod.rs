//! Job tracking and execution.
//!
//! - `model` -- workflow instances, activity runs and the per-instance run table
//! - `fanout` -- pluggable fan-out (`map`) expression evaluation
//! - `manager` -- instance registry, readiness, input resolution, terminal outputs
//! - `queue` -- shared FIFO work queue with a drain barrier
//! - `scheduler` -- worker pool and the completion -> next-work algorithm

pub mod fanout;
pub mod manager;
pub mod model;
pub mod queue;
pub mod scheduler;
