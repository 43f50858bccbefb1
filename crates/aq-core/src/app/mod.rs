//! App definition parsing and validation.

pub mod definition;
