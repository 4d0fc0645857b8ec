//! # rejoin-harness
//!
//! Crash/rejoin recovery harness for distributed stream-processing clusters.
//!
//! The harness starts a cluster of worker processes, streams a deterministic
//! sequence into it, kills one worker mid-delivery, restarts it with the same
//! identity and resilience directory, and checks the cluster's final output
//! byte-for-byte:
//! - [`ProcessRunner`] - worker process supervision and output capture
//! - [`Sender`] - paced delivery of the sequence
//! - [`Sink`] / [`MetricsReceiver`] - passive collection of cluster output
//! - [`ReadinessWatcher`] / [`ValueWatcher`] - bounded-deadline polling
//! - [`ResiliencePath`] - the staging directory workers persist state into
//! - [`Orchestrator`] - the scenario itself
//!
//! ## Example
//!
//! ```no_run
//! use rejoin_harness::{Orchestrator, ScenarioConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ScenarioConfig::from_file("scenario.toml".as_ref())?;
//! let report = Orchestrator::new(config).run().await;
//! if let Err(failure) = &report.verdict {
//!     eprintln!("{}\n{}", failure, failure.diagnostics);
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod capture;
pub mod codec;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod ports;
pub mod resilience;
pub mod runner;
pub mod sender;
pub mod sink;
pub mod task;
pub mod watcher;

pub use capture::SharedBuffer;
pub use config::{ConfigError, ScenarioConfig};
pub use error::{HarnessError, Result};
pub use orchestrator::{Diagnostics, Orchestrator, ScenarioFailure, ScenarioReport};
pub use ports::{ClusterPorts, WorkerPorts};
pub use resilience::ResiliencePath;
pub use runner::{CapturedOutput, ProcessRunner, ProcessState, Topology, WorkerRole, WorkerSpec};
pub use sender::{Sender, SenderConfig};
pub use sink::{MetricsReceiver, Sink, SinkMode};
pub use task::{BackgroundTask, TaskOutcome};
pub use watcher::{ReadinessWatcher, ValueWatcher};
