//! Bounded-deadline pollers over shared buffers.
//!
//! [`ReadinessWatcher`] waits for a marker line in a worker's captured
//! stdout; [`ValueWatcher`] waits for an exact framed value in a sink buffer.
//! Both poll every [`POLL_INTERVAL`] in a background task bounded by their
//! own timeout, and report through the task's result slot.

use std::time::Duration;

use tokio::time::Instant;

use crate::capture::SharedBuffer;
use crate::error::HarnessError;
use crate::task::{BackgroundTask, TaskOutcome};

/// Interval between buffer polls.
pub const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// What a watcher is waiting for; decides the error on timeout.
#[derive(Debug, Clone)]
enum Target {
    Marker { worker: String, marker: String },
    Value { expected: String },
}

impl Target {
    fn timeout_error(&self, timeout: Duration) -> HarnessError {
        match self {
            Target::Marker { worker, marker } => HarnessError::ReadinessTimeout {
                worker: worker.clone(),
                marker: marker.clone(),
                timeout,
            },
            Target::Value { expected } => HarnessError::ValidationTimeout {
                expected: expected.clone(),
                timeout,
            },
        }
    }

    fn label(&self) -> String {
        match self {
            Target::Marker { worker, .. } => format!("marker watcher ({})", worker),
            Target::Value { .. } => "value watcher".to_string(),
        }
    }
}

#[derive(Debug)]
struct PollWatcher {
    buffer: SharedBuffer,
    needle: Vec<u8>,
    timeout: Duration,
    target: Target,
    task: Option<BackgroundTask>,
}

impl PollWatcher {
    fn start(&mut self) {
        if self.task.is_some() {
            return;
        }
        let buffer = self.buffer.clone();
        let needle = self.needle.clone();
        let timeout = self.timeout;
        let target = self.target.clone();

        self.task = Some(BackgroundTask::spawn(self.target.label(), async move {
            let deadline = Instant::now() + timeout;
            loop {
                if buffer.contains(&needle) {
                    return Ok(());
                }
                if Instant::now() >= deadline {
                    return Err(target.timeout_error(timeout));
                }
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        }));
    }

    async fn join(&mut self, deadline: Duration) -> TaskOutcome {
        let target = self.target.clone();
        let task = self.task.get_or_insert_with(|| {
            BackgroundTask::failed(target.label(), HarnessError::NotStarted("watcher"))
        });
        let outcome = task.join(deadline).await;
        if outcome == TaskOutcome::Pending {
            task.expire(target.timeout_error(deadline));
        }
        task.outcome()
    }

    fn error(&self) -> Option<&HarnessError> {
        self.task.as_ref().and_then(BackgroundTask::error)
    }

    fn take_error(&mut self) -> Option<HarnessError> {
        self.task.as_mut().and_then(BackgroundTask::take_error)
    }
}

/// Waits for a marker substring in a worker's captured stdout.
#[derive(Debug)]
pub struct ReadinessWatcher {
    inner: PollWatcher,
}

impl ReadinessWatcher {
    /// Watch `stdout` of `worker` for `marker`, giving up after `timeout`.
    pub fn new(
        worker: impl Into<String>,
        stdout: SharedBuffer,
        marker: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        let marker = marker.into();
        Self {
            inner: PollWatcher {
                buffer: stdout,
                needle: marker.as_bytes().to_vec(),
                timeout,
                target: Target::Marker {
                    worker: worker.into(),
                    marker,
                },
                task: None,
            },
        }
    }

    /// Launch the poll in the background. Idempotent.
    pub fn start(&mut self) {
        self.inner.start();
    }

    /// Wait up to `deadline`; a join that runs out records a
    /// `ReadinessTimeout`. Joining an unstarted watcher records `NotStarted`.
    pub async fn join(&mut self, deadline: Duration) -> TaskOutcome {
        self.inner.join(deadline).await
    }

    /// Recorded error, if any.
    pub fn error(&self) -> Option<&HarnessError> {
        self.inner.error()
    }

    /// Move the recorded error out.
    pub fn take_error(&mut self) -> Option<HarnessError> {
        self.inner.take_error()
    }
}

/// Waits for an exact byte sequence in a sink's receive buffer.
#[derive(Debug)]
pub struct ValueWatcher {
    inner: PollWatcher,
}

impl ValueWatcher {
    /// Watch `sink_buffer` for the framed bytes `expected`.
    pub fn new(sink_buffer: SharedBuffer, expected: Vec<u8>, timeout: Duration) -> Self {
        let display = describe_frame(&expected);
        Self {
            inner: PollWatcher {
                buffer: sink_buffer,
                needle: expected,
                timeout,
                target: Target::Value { expected: display },
                task: None,
            },
        }
    }

    /// Launch the poll in the background. Idempotent.
    pub fn start(&mut self) {
        self.inner.start();
    }

    /// Wait up to `deadline`; a join that runs out records a
    /// `ValidationTimeout`.
    pub async fn join(&mut self, deadline: Duration) -> TaskOutcome {
        self.inner.join(deadline).await
    }

    /// Recorded error, if any.
    pub fn error(&self) -> Option<&HarnessError> {
        self.inner.error()
    }

    /// Move the recorded error out.
    pub fn take_error(&mut self) -> Option<HarnessError> {
        self.inner.take_error()
    }
}

/// Render a frame's payload for messages, falling back to the raw bytes.
fn describe_frame(framed: &[u8]) -> String {
    match rejoin_types::decode_frame(framed) {
        Ok((payload, _)) => String::from_utf8_lossy(payload).into_owned(),
        Err(_) => String::from_utf8_lossy(framed).into_owned(),
    }
}
