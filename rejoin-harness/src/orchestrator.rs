//! Crash/rejoin recovery scenario.
//!
//! The [`Orchestrator`] brings up a staging directory, listeners and a
//! cluster of workers, streams the sequence into the initializer, kills the
//! last worker mid-delivery, starts a replacement with the same identity and
//! checks that the cluster still produces the expected final window and that
//! the replacement resumed from its resilience directory.
//!
//! Every wait is bounded. Teardown (workers, then listeners, then staging)
//! runs on every exit path.

use std::fmt;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use rejoin_core::{Event, ScenarioState, SequenceGenerator, Transition};

use crate::config::{ConfigError, ScenarioConfig};
use crate::error::HarnessError;
use crate::ports::ClusterPorts;
use crate::resilience::ResiliencePath;
use crate::runner::{CapturedOutput, ProcessRunner, Topology, WorkerSpec};
use crate::sender::{Sender, SenderConfig};
use crate::sink::{MetricsReceiver, Sink};
use crate::task::TaskOutcome;
use crate::watcher::{ReadinessWatcher, ValueWatcher};

/// Outputs and sink contents captured for a failed run.
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    /// Captured output of every runner, crashed ones included.
    pub outputs: Vec<CapturedOutput>,
    /// Everything the sink received.
    pub sink_data: Vec<u8>,
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for output in &self.outputs {
            writeln!(f, "{}", output)?;
        }
        write!(
            f,
            "--- sink ({} bytes) ---\n{}",
            self.sink_data.len(),
            String::from_utf8_lossy(&self.sink_data).escape_debug()
        )
    }
}

/// Why a scenario failed.
#[derive(Debug)]
pub struct ScenarioFailure {
    /// First error encountered.
    pub error: HarnessError,
    /// State captured at teardown.
    pub diagnostics: Diagnostics,
}

impl fmt::Display for ScenarioFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.error, self.error.kind())
    }
}

/// Result of one scenario run.
#[derive(Debug)]
pub struct ScenarioReport {
    /// `Ok` on `Complete`, otherwise the failure with diagnostics.
    pub verdict: Result<(), ScenarioFailure>,
    /// Terminal state.
    pub final_state: ScenarioState,
    /// State changes in order.
    pub transitions: Vec<Transition>,
    /// Unframed payload the sink had to receive.
    pub expected: Option<String>,
    /// Records written by the sender.
    pub delivered: u64,
    /// Frames the sink received.
    pub sink_frames: u64,
    /// Staging directory used (removed by now).
    pub resilience_dir: Option<PathBuf>,
    /// Wall-clock duration.
    pub elapsed: Duration,
}

impl ScenarioReport {
    /// True if the scenario reached `Complete`.
    pub fn passed(&self) -> bool {
        self.verdict.is_ok() && self.final_state.is_complete()
    }
}

/// Resources acquired during a run, released by [`Scene::teardown`].
struct Scene {
    staging: Option<ResiliencePath>,
    resilience_dir: Option<PathBuf>,
    sink: Sink,
    metrics: MetricsReceiver,
    runners: Vec<ProcessRunner>,
    sender: Option<Sender>,
    expected: Option<String>,
}

impl Scene {
    fn new(host: &str) -> Self {
        Self {
            staging: None,
            resilience_dir: None,
            sink: Sink::new(host),
            metrics: MetricsReceiver::new(host),
            runners: Vec::new(),
            sender: None,
            expected: None,
        }
    }

    async fn stop_workers(&mut self) {
        for runner in self.runners.iter_mut() {
            if let Err(e) = runner.stop().await {
                tracing::warn!("Failed to stop {}: {}", runner.name(), e);
            }
        }
    }

    async fn teardown(&mut self) {
        if let Some(sender) = &self.sender {
            sender.stop();
        }
        self.stop_workers().await;
        self.sink.stop().await;
        self.metrics.stop().await;
        if let Some(mut staging) = self.staging.take() {
            // Logged only; never replaces the verdict
            if let Err(e) = staging.cleanup() {
                tracing::warn!("{}", e);
            }
        }
    }

    fn diagnostics(&self) -> Diagnostics {
        Diagnostics {
            outputs: self.runners.iter().map(ProcessRunner::get_output).collect(),
            sink_data: self.sink.data(),
        }
    }
}

/// Drives one crash/rejoin scenario.
pub struct Orchestrator {
    config: ScenarioConfig,
    state: ScenarioState,
    transitions: Vec<Transition>,
}

impl Orchestrator {
    /// Orchestrator for `config`.
    pub fn new(config: ScenarioConfig) -> Self {
        Self {
            config,
            state: ScenarioState::new(),
            transitions: Vec::new(),
        }
    }

    /// Current state.
    pub fn state(&self) -> &ScenarioState {
        &self.state
    }

    /// Run the scenario to a terminal state and tear everything down.
    pub async fn run(mut self) -> ScenarioReport {
        let started = Instant::now();
        let mut scene = Scene::new(&self.config.cluster.host);

        let result = self.drive(&mut scene).await;
        if let Err(e) = &result {
            tracing::error!("Scenario failed: {}", e);
            self.apply(Event::Failed {
                reason: e.to_string(),
            });
        }

        scene.teardown().await;

        let resilience_dir = scene.resilience_dir.take();
        let verdict = result.map_err(|error| ScenarioFailure {
            error,
            diagnostics: scene.diagnostics(),
        });
        let delivered = scene.sender.as_ref().map_or(0, Sender::delivered);

        tracing::info!(
            "Scenario finished in {:?}: {}",
            started.elapsed(),
            self.state.phase()
        );
        ScenarioReport {
            verdict,
            final_state: self.state,
            transitions: self.transitions,
            expected: scene.expected.take(),
            delivered,
            sink_frames: scene.sink.frame_count(),
            resilience_dir,
            elapsed: started.elapsed(),
        }
    }

    fn apply(&mut self, event: Event) {
        let from = self.state.phase();
        self.state = std::mem::take(&mut self.state).on_event(event);
        let to = self.state.phase();
        if from != to {
            let transition = Transition { from, to };
            tracing::info!("Scenario {}", transition);
            self.transitions.push(transition);
        }
    }

    async fn drive(&mut self, scene: &mut Scene) -> Result<(), HarnessError> {
        let config = self.config.clone();
        config.validate()?;

        let expected = config.expected_payload()?;
        let expected_frame = rejoin_types::frame(expected.as_bytes())?;
        scene.expected = Some(expected.clone());

        // 1. Staging
        let staging = match &config.cluster.resilience_dir {
            Some(dir) => ResiliencePath::setup(dir)?,
            None => ResiliencePath::unique()?,
        };
        let resilience_dir = staging.path().to_path_buf();
        scene.resilience_dir = Some(resilience_dir.clone());
        scene.staging = Some(staging);

        // 2. Listeners
        let sink_addr = scene.sink.start().await?;
        let metrics_addr = scene.metrics.start().await?;

        // 3. Ports
        let ports = ClusterPorts::allocate(
            &config.cluster.host,
            config.cluster.sources,
            config.cluster.workers,
        )?;
        let source = ports
            .primary_source()
            .ok_or_else(|| ConfigError::Invalid("no source port allocated".into()))?;
        let topology = Topology {
            sources: ports.sources_arg(),
            sink: sink_addr.to_string(),
            metrics: metrics_addr.to_string(),
            ports,
            resilience_dir,
        };

        // 4. Workers, initializer first
        for index in 0..config.cluster.workers {
            let spec = WorkerSpec::for_index(&config.worker, &topology, index).ok_or_else(|| {
                ConfigError::Invalid(format!("cannot build worker {} from config", index))
            })?;
            let mut runner = ProcessRunner::new(spec);
            let launched = runner.start().await;
            scene.runners.push(runner);
            launched?;
        }

        // 5. Initializer readiness
        let initializer = &scene.runners[0];
        let mut readiness = ReadinessWatcher::new(
            initializer.name(),
            initializer.output_handle(),
            &config.worker.ready_marker,
            config.timeouts.readiness(),
        );
        readiness.start();
        if readiness.join(config.timeouts.readiness()).await != TaskOutcome::Satisfied {
            return Err(watch_error(readiness.take_error(), "readiness watcher"));
        }
        self.apply(Event::InitializerReady);

        // 6. Delivery
        let mut sender = Sender::new(
            SenderConfig {
                target: source,
                batch_size: config.delivery.batch_size,
                interval: config.delivery.send_interval(),
                reconnect: config.delivery.reconnect,
            },
            SequenceGenerator::new(config.delivery.sequence_length),
        );
        sender.start();
        let sender = scene.sender.insert(sender);

        // 7. Crash the last-started worker while delivery is in flight
        tokio::time::sleep(config.delivery.settle_delay()).await;
        if sender.is_finished() {
            sender.join(Duration::ZERO).await;
            return Err(sender.take_error().unwrap_or_else(|| {
                ConfigError::Invalid(format!(
                    "delivery finished before the crash; settle_delay_ms ({}) is too long \
                     for {} records at {} ms",
                    config.delivery.settle_delay_ms,
                    config.delivery.sequence_length,
                    config.delivery.send_interval_ms
                ))
                .into()
            }));
        }
        let victim_index = scene.runners.len() - 1;
        let victim = &mut scene.runners[victim_index];
        victim.kill().await?;
        let victim_name = victim.name().to_string();
        self.apply(Event::WorkerCrashed {
            worker: victim_name.clone(),
        });

        // 8. Replacement with the same identity
        let mut replacement = victim.respawn();
        let launched = replacement.start().await;
        let replacement_stdout = replacement.output_handle();
        scene.runners.push(replacement);
        launched?;
        self.apply(Event::ReplacementStarted {
            worker: victim_name.clone(),
        });

        // 9. Delivery completes
        if let Some(sender) = scene.sender.as_mut() {
            if sender.join(config.timeouts.delivery()).await != TaskOutcome::Satisfied {
                return Err(watch_error(sender.take_error(), "sender"));
            }
            tracing::info!("Delivered {} records", sender.delivered());
        }

        // 10. Expected value reaches the sink
        let mut value = ValueWatcher::new(
            scene.sink.buffer(),
            expected_frame,
            config.timeouts.validation(),
        );
        value.start();
        if value.join(config.timeouts.validation()).await != TaskOutcome::Satisfied {
            return Err(watch_error(value.take_error(), "value watcher"));
        }
        tracing::info!("Sink received expected value {}", expected);

        // 11. Replacement resumed from its resilience directory
        let mut reconnect = ReadinessWatcher::new(
            victim_name.as_str(),
            replacement_stdout,
            &config.worker.reconnect_marker,
            config.timeouts.recovery_marker(),
        );
        reconnect.start();
        if reconnect.join(config.timeouts.recovery_marker()).await != TaskOutcome::Satisfied {
            let output = scene
                .runners
                .last()
                .map(ProcessRunner::get_output)
                .map(|o| o.to_string())
                .unwrap_or_default();
            return Err(HarnessError::AssertionFailure {
                message: format!(
                    "replacement {} did not print {:?} within {:?}\n{}",
                    victim_name,
                    config.worker.reconnect_marker,
                    config.timeouts.recovery_marker(),
                    output
                ),
            });
        }
        self.apply(Event::Validated);

        scene.stop_workers().await;
        Ok(())
    }
}

fn watch_error(error: Option<HarnessError>, what: &'static str) -> HarnessError {
    error.unwrap_or(HarnessError::NotStarted(what))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rejoin_core::Phase;

    #[tokio::test]
    async fn invalid_config_fails_during_initializing() {
        let mut config = ScenarioConfig::default();
        config.cluster.workers = 1;

        let report = Orchestrator::new(config).run().await;
        assert!(!report.passed());
        let failure = report.verdict.unwrap_err();
        assert_eq!(failure.error.kind(), "config");
        assert!(failure.diagnostics.outputs.is_empty());
        assert_eq!(
            report.transitions,
            vec![Transition {
                from: Phase::Initializing,
                to: Phase::Failed
            }]
        );
    }

    #[tokio::test]
    async fn launch_failure_tears_down_staging() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("res-data");

        let mut config = ScenarioConfig::default();
        config.worker.command = "/nonexistent/worker-binary".into();
        config.cluster.resilience_dir = Some(dir.clone());

        let report = Orchestrator::new(config).run().await;
        let failure = report.verdict.unwrap_err();
        assert_eq!(failure.error.kind(), "launch");
        assert!(matches!(
            report.final_state,
            ScenarioState::Failed {
                during: Phase::Initializing,
                ..
            }
        ));
        assert!(!dir.exists());
        assert_eq!(report.resilience_dir, Some(dir));
    }

    #[tokio::test]
    async fn silent_initializer_is_a_readiness_timeout() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("res-data");

        let mut config = ScenarioConfig::default();
        // Exits at once without printing the marker
        config.worker.command = "sh -c sleep".into();
        config.cluster.resilience_dir = Some(dir.clone());
        config.timeouts.readiness_secs = 1;
        config.worker.stop_grace_ms = 100;

        let report = Orchestrator::new(config).run().await;
        let failure = report.verdict.unwrap_err();
        assert_eq!(failure.error.kind(), "readiness_timeout");
        assert_eq!(failure.diagnostics.outputs.len(), 2);
        assert_eq!(failure.diagnostics.outputs[0].name, "initializer");
        assert!(!dir.exists());
    }
}
