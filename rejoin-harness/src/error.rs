//! Error types for the recovery harness.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::config::ConfigError;

/// Errors raised by harness roles and recorded as the scenario verdict.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// Worker process could not be started.
    #[error("failed to launch {worker}: {source}")]
    Launch {
        /// Worker name.
        worker: String,
        /// Underlying spawn error.
        #[source]
        source: std::io::Error,
    },

    /// Readiness marker not observed before the deadline.
    #[error("{worker} did not print {marker:?} within {timeout:?}")]
    ReadinessTimeout {
        /// Worker name.
        worker: String,
        /// Marker that was awaited.
        marker: String,
        /// Deadline that elapsed.
        timeout: Duration,
    },

    /// Sender did not exhaust its sequence before the deadline.
    #[error("sender did not complete within {timeout:?} ({delivered} records delivered)")]
    DeliveryTimeout {
        /// Deadline that elapsed.
        timeout: Duration,
        /// Records written before the deadline.
        delivered: u64,
    },

    /// Sender was stopped before its sequence was exhausted.
    #[error("sender stopped after {delivered} records ({remaining} undelivered)")]
    DeliveryStopped {
        /// Records written before the stop.
        delivered: u64,
        /// Records never written.
        remaining: u64,
    },

    /// Connection to the delivery target was lost and reconnect is disabled
    /// (or the target never accepted a connection).
    #[error("connection to {target} lost: {reason}")]
    ConnectionLost {
        /// Target endpoint.
        target: String,
        /// Reason reported by the socket layer.
        reason: String,
    },

    /// Expected output never appeared in the sink.
    #[error("expected value {expected:?} not received within {timeout:?}")]
    ValidationTimeout {
        /// Expected payload, lossily rendered.
        expected: String,
        /// Deadline that elapsed.
        timeout: Duration,
    },

    /// A post-recovery assertion failed.
    #[error("assertion failed: {message}")]
    AssertionFailure {
        /// What was asserted and what was seen.
        message: String,
    },

    /// Staging cleanup failed. Logged, never masks an earlier failure.
    #[error("cleanup of {path} failed: {source}")]
    Cleanup {
        /// Path being removed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A listener was queried before `start()` returned.
    #[error("{0} not started")]
    NotStarted(&'static str),

    /// Invalid scenario configuration.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Malformed data on the wire.
    #[error("frame error: {0}")]
    Frame(#[from] rejoin_types::FrameError),

    /// Expected value could not be computed.
    #[error("window error: {0}")]
    Window(#[from] rejoin_core::WindowError),

    /// General I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl HarnessError {
    /// Short, stable name of the error kind (used in reports).
    pub fn kind(&self) -> &'static str {
        match self {
            HarnessError::Launch { .. } => "launch",
            HarnessError::ReadinessTimeout { .. } => "readiness_timeout",
            HarnessError::DeliveryTimeout { .. } => "delivery_timeout",
            HarnessError::DeliveryStopped { .. } => "delivery_stopped",
            HarnessError::ConnectionLost { .. } => "connection_lost",
            HarnessError::ValidationTimeout { .. } => "validation_timeout",
            HarnessError::AssertionFailure { .. } => "assertion_failure",
            HarnessError::Cleanup { .. } => "cleanup",
            HarnessError::NotStarted(_) => "not_started",
            HarnessError::Config(_) => "config",
            HarnessError::Frame(_) => "frame",
            HarnessError::Window(_) => "window",
            HarnessError::Io(_) => "io",
        }
    }
}

/// Result type alias for harness operations.
pub type Result<T> = std::result::Result<T, HarnessError>;
