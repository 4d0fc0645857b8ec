//! # rejoin-core
//!
//! Pure logic for the rejoin recovery harness (no I/O, instant tests).
//!
//! - [`SequenceGenerator`] - the deterministic, non-restartable workload
//! - [`SequenceWindow`] / [`ExpectedWindow`] - the windowed aggregate the
//!   cluster under test emits, and the final value a healthy run must produce
//! - [`ScenarioState`] - the recovery scenario state machine
//!
//! The actual I/O (processes, sockets, filesystem) is performed by
//! `rejoin-harness`, which drives these types.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod sequence;
pub mod state;
pub mod window;

pub use sequence::SequenceGenerator;
pub use state::{Event, Phase, ScenarioState, Transition};
pub use window::{ExpectedWindow, SequenceWindow, WindowError};
