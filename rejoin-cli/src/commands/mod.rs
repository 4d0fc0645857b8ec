//! CLI command implementations.

pub mod expect;
pub mod run;
