//! Worker process supervision.
//!
//! A [`ProcessRunner`] owns one worker process described by a [`WorkerSpec`]:
//! it spawns the process, captures stdout/stderr into shared buffers, and
//! stops (gracefully), kills (forcefully) or respawns it. Respawning clones
//! [`WorkerSpec`], so the replacement keeps the crashed worker's name, ports and
//! resilience directory.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

use crate::capture::SharedBuffer;
use crate::config::WorkerConfig;
use crate::error::HarnessError;
use crate::ports::{ClusterPorts, WorkerPorts};

/// How long to wait for capture tasks to drain after a process exits.
const CAPTURE_DRAIN: Duration = Duration::from_secs(2);

/// Worker role within the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerRole {
    /// Establishes the cluster topology.
    Initializer,
    /// Joins an existing cluster through the initializer.
    Joiner,
}

/// Lifecycle of a supervised process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// Not started, or stopped gracefully.
    Stopped,
    /// Spawned and not yet stopped.
    Running,
    /// Forcibly killed.
    Crashed,
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ProcessState::Stopped => "stopped",
            ProcessState::Running => "running",
            ProcessState::Crashed => "crashed",
        })
    }
}

/// Cluster-wide addresses every worker is told about.
#[derive(Debug, Clone)]
pub struct Topology {
    /// Comma-separated source (input) endpoints.
    pub sources: String,
    /// Sink endpoint receiving cluster output.
    pub sink: String,
    /// Metrics receiver endpoint.
    pub metrics: String,
    /// Allocated ports, index 0 is the initializer.
    pub ports: ClusterPorts,
    /// Shared resilience directory.
    pub resilience_dir: PathBuf,
}

impl Topology {
    /// Number of workers in the cluster.
    pub fn worker_count(&self) -> usize {
        self.ports.workers.len()
    }
}

/// Everything needed to (re)launch one worker.
#[derive(Debug, Clone)]
pub struct WorkerSpec {
    /// Worker name (`initializer`, `worker1`, ...).
    pub name: String,
    /// Role within the cluster.
    pub role: WorkerRole,
    /// Ports owned by this worker.
    pub ports: WorkerPorts,
    /// Shared resilience directory.
    pub resilience_dir: PathBuf,
    /// Executable.
    pub program: String,
    /// Full argument list.
    pub args: Vec<String>,
    /// Extra environment variables.
    pub env: BTreeMap<String, String>,
    /// Grace period between SIGTERM and SIGKILL.
    pub stop_grace: Duration,
}

impl WorkerSpec {
    /// Launch description for worker `index` of `topology` (0 is the initializer).
    ///
    /// Returns `None` if `index` is out of range or the command is empty.
    pub fn for_index(config: &WorkerConfig, topology: &Topology, index: usize) -> Option<Self> {
        let (program, mut args) = config.program_and_args()?;
        let own = *topology.ports.workers.get(index)?;
        let initializer = *topology.ports.workers.first()?;
        let endpoint = |port: u16| topology.ports.endpoint(port);
        let dir = topology.resilience_dir.display().to_string();

        let (name, role) = if index == 0 {
            ("initializer".to_string(), WorkerRole::Initializer)
        } else {
            (format!("worker{}", index), WorkerRole::Joiner)
        };

        args.extend([
            "--in".to_string(),
            topology.sources.clone(),
            "--out".to_string(),
            topology.sink.clone(),
            "--metrics".to_string(),
            topology.metrics.clone(),
        ]);
        match role {
            WorkerRole::Initializer => args.extend([
                "--control".to_string(),
                endpoint(own.control),
                "--data".to_string(),
                endpoint(own.data),
                "--external".to_string(),
                endpoint(own.external),
                "--worker-count".to_string(),
                topology.worker_count().to_string(),
                "--cluster-initializer".to_string(),
            ]),
            WorkerRole::Joiner => args.extend([
                "--control".to_string(),
                endpoint(initializer.control),
                "--my-control".to_string(),
                endpoint(own.control),
                "--my-data".to_string(),
                endpoint(own.data),
                "--external".to_string(),
                endpoint(own.external),
            ]),
        }
        args.extend([
            "--name".to_string(),
            name.clone(),
            "--resilience-dir".to_string(),
            dir,
        ]);
        args.extend(config.extra_args.iter().cloned());

        Some(Self {
            name,
            role,
            ports: own,
            resilience_dir: topology.resilience_dir.clone(),
            program,
            args,
            env: config.env.clone(),
            stop_grace: config.stop_grace(),
        })
    }
}

/// Snapshot of a runner's captured output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedOutput {
    /// Worker name.
    pub name: String,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl fmt::Display for CapturedOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "--- {} stdout ---", self.name)?;
        writeln!(f, "{}", self.stdout.trim_end())?;
        writeln!(f, "--- {} stderr ---", self.name)?;
        write!(f, "{}", self.stderr.trim_end())
    }
}

/// Supervises one worker process.
#[derive(Debug)]
pub struct ProcessRunner {
    spec: WorkerSpec,
    state: ProcessState,
    child: Option<Child>,
    stdout: SharedBuffer,
    stderr: SharedBuffer,
    capture: Vec<JoinHandle<()>>,
}

impl ProcessRunner {
    /// Runner for `spec`, not yet started.
    pub fn new(spec: WorkerSpec) -> Self {
        Self {
            spec,
            state: ProcessState::Stopped,
            child: None,
            stdout: SharedBuffer::new(),
            stderr: SharedBuffer::new(),
            capture: Vec::new(),
        }
    }

    /// Worker name.
    pub fn name(&self) -> &str {
        &self.spec.name
    }

    /// Launch specification.
    pub fn spec(&self) -> &WorkerSpec {
        &self.spec
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ProcessState {
        self.state
    }

    /// OS process id while running.
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Spawn the worker and begin capturing its output.
    ///
    /// Starting a running worker is a no-op.
    pub async fn start(&mut self) -> Result<(), HarnessError> {
        if self.state == ProcessState::Running {
            return Ok(());
        }

        let mut child = Command::new(&self.spec.program)
            .args(&self.spec.args)
            .envs(&self.spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| HarnessError::Launch {
                worker: self.spec.name.clone(),
                source,
            })?;

        if let Some(out) = child.stdout.take() {
            self.capture.push(spawn_capture(out, self.stdout.clone()));
        }
        if let Some(err) = child.stderr.take() {
            self.capture.push(spawn_capture(err, self.stderr.clone()));
        }

        tracing::info!(
            "Started {} ({:?}, pid {})",
            self.spec.name,
            self.spec.role,
            child.id().map_or_else(|| "?".to_string(), |p| p.to_string())
        );
        self.child = Some(child);
        self.state = ProcessState::Running;
        Ok(())
    }

    /// Terminate gracefully: SIGTERM, then SIGKILL after the grace period.
    ///
    /// Idempotent. A worker that already exited is simply reaped.
    pub async fn stop(&mut self) -> Result<(), HarnessError> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };

        if child.try_wait()?.is_none() {
            if let Some(pid) = child.id() {
                send_sigterm(pid).await;
            }
            match tokio::time::timeout(self.spec.stop_grace, child.wait()).await {
                Ok(status) => {
                    tracing::debug!("{} exited: {:?}", self.spec.name, status);
                }
                Err(_) => {
                    tracing::warn!(
                        "{} ignored SIGTERM for {:?}, killing",
                        self.spec.name,
                        self.spec.stop_grace
                    );
                    child.start_kill()?;
                    child.wait().await?;
                }
            }
        }

        self.drain_capture().await;
        if self.state == ProcessState::Running {
            self.state = ProcessState::Stopped;
        }
        tracing::info!("Stopped {}", self.spec.name);
        Ok(())
    }

    /// Kill immediately, simulating a crash.
    pub async fn kill(&mut self) -> Result<(), HarnessError> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };

        if child.try_wait()?.is_none() {
            child.start_kill()?;
        }
        let status = child.wait().await?;
        self.drain_capture().await;
        self.state = ProcessState::Crashed;
        tracing::info!("Killed {} ({})", self.spec.name, status);
        Ok(())
    }

    /// A new, not-yet-started runner with the same identity, ports and
    /// resilience directory. Captured output starts empty.
    pub fn respawn(&self) -> ProcessRunner {
        ProcessRunner::new(self.spec.clone())
    }

    // ========================================================================
    // Output
    // ========================================================================

    /// Snapshot of captured stdout and stderr.
    pub fn get_output(&self) -> CapturedOutput {
        CapturedOutput {
            name: self.spec.name.clone(),
            stdout: self.stdout.snapshot_string(),
            stderr: self.stderr.snapshot_string(),
        }
    }

    /// Shared handle to captured stdout, for watchers.
    pub fn output_handle(&self) -> SharedBuffer {
        self.stdout.clone()
    }

    async fn drain_capture(&mut self) {
        for mut handle in self.capture.drain(..) {
            if tokio::time::timeout(CAPTURE_DRAIN, &mut handle).await.is_err() {
                // A grandchild may still hold the pipe open
                handle.abort();
            }
        }
    }
}

fn spawn_capture<R>(mut reader: R, buffer: SharedBuffer) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut chunk = [0u8; 4096];
        loop {
            match reader.read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => buffer.append(&chunk[..n]),
                Err(e) => {
                    tracing::debug!("Output capture ended: {}", e);
                    break;
                }
            }
        }
    })
}

/// Ask a process to terminate via the `kill` utility.
async fn send_sigterm(pid: u32) {
    let result = Command::new("kill")
        .args(["-TERM", &pid.to_string()])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;
    match result {
        Ok(status) if status.success() => {}
        Ok(status) => tracing::debug!("kill -TERM {} exited with {}", pid, status),
        Err(e) => tracing::warn!("Failed to run kill -TERM {}: {}", pid, e),
    }
}
