//! Filesystem-backed activity handlers.

pub mod read;
pub mod write;
