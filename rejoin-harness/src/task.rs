//! Background tasks with an explicit result slot.
//!
//! A [`BackgroundTask`] wraps a spawned future. Its result is never
//! propagated into the caller's flow on its own: the owner calls
//! [`BackgroundTask::join`] with a deadline and then inspects
//! [`BackgroundTask::outcome`] and [`BackgroundTask::error`].

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::error::HarnessError;

/// Result of a background task as seen by its owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Still running (or never joined).
    Pending,
    /// Completed successfully.
    Satisfied,
    /// Its own deadline, or the join deadline, elapsed.
    TimedOut,
    /// Completed with an error other than a timeout.
    Errored,
}

impl TaskOutcome {
    /// True once the task has concluded, successfully or not.
    pub fn is_finished(&self) -> bool {
        !matches!(self, TaskOutcome::Pending)
    }
}

/// A spawned task plus the slot its result lands in.
#[derive(Debug)]
pub struct BackgroundTask {
    name: String,
    handle: Option<JoinHandle<Result<(), HarnessError>>>,
    outcome: TaskOutcome,
    error: Option<HarnessError>,
}

impl BackgroundTask {
    /// Spawn `future` on the current runtime.
    pub fn spawn<F>(name: impl Into<String>, future: F) -> Self
    where
        F: Future<Output = Result<(), HarnessError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            handle: Some(tokio::spawn(future)),
            outcome: TaskOutcome::Pending,
            error: None,
        }
    }

    /// A task that concluded with `error` without running.
    pub fn failed(name: impl Into<String>, error: HarnessError) -> Self {
        let mut task = Self {
            name: name.into(),
            handle: None,
            outcome: TaskOutcome::Pending,
            error: None,
        };
        task.record(Err(error));
        task
    }

    /// Task name used in logs.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wait up to `deadline` for the task to conclude.
    ///
    /// If the deadline elapses first the task keeps running and
    /// `TaskOutcome::Pending` is returned; the owner decides whether to
    /// [`expire`](Self::expire) it.
    pub async fn join(&mut self, deadline: Duration) -> TaskOutcome {
        let Some(handle) = self.handle.as_mut() else {
            return self.outcome;
        };

        match tokio::time::timeout(deadline, handle).await {
            Ok(Ok(result)) => {
                self.handle = None;
                self.record(result);
            }
            Ok(Err(join_error)) => {
                self.handle = None;
                self.record(Err(HarnessError::Io(std::io::Error::other(format!(
                    "task {} panicked or was cancelled: {}",
                    self.name, join_error
                )))));
            }
            Err(_) => {
                tracing::debug!("Join of {} timed out after {:?}", self.name, deadline);
            }
        }
        self.outcome
    }

    /// Abort a still-running task and record `error` as its result.
    ///
    /// Has no effect on a task that already concluded.
    pub fn expire(&mut self, error: HarnessError) {
        if self.outcome.is_finished() {
            return;
        }
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
        self.record(Err(error));
    }

    /// Abort the task without recording anything. Idempotent.
    pub fn abort(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    /// True if the task has concluded, even if not yet joined.
    pub fn is_finished(&self) -> bool {
        self.outcome.is_finished() || self.handle.as_ref().is_some_and(JoinHandle::is_finished)
    }

    /// Current outcome.
    pub fn outcome(&self) -> TaskOutcome {
        self.outcome
    }

    /// Error recorded by the task, if any.
    pub fn error(&self) -> Option<&HarnessError> {
        self.error.as_ref()
    }

    /// Move the recorded error out.
    pub fn take_error(&mut self) -> Option<HarnessError> {
        self.error.take()
    }

    fn record(&mut self, result: Result<(), HarnessError>) {
        match result {
            Ok(()) => self.outcome = TaskOutcome::Satisfied,
            Err(e) => {
                self.outcome = if is_timeout(&e) {
                    TaskOutcome::TimedOut
                } else {
                    TaskOutcome::Errored
                };
                tracing::debug!("Task {} concluded with error: {}", self.name, e);
                self.error = Some(e);
            }
        }
    }
}

impl Drop for BackgroundTask {
    fn drop(&mut self) {
        self.abort();
    }
}

fn is_timeout(error: &HarnessError) -> bool {
    matches!(
        error,
        HarnessError::ReadinessTimeout { .. }
            | HarnessError::DeliveryTimeout { .. }
            | HarnessError::ValidationTimeout { .. }
    )
}
